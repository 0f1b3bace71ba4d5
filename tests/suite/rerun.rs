//! Failed plates and the rerun path.

use strlab_engine::{BatchPolicy, LabEvent, TransitionContext, WorkflowError};
use strlab_store::LabRead;
use strlab_types::{BatchOutcome, SampleRole, StageType, WellStatus, WorkflowStatus};

use crate::common::Lab;

#[test]
fn failed_electrophoresis_plate_is_rerun_on_a_new_plate() {
    let mut lab = Lab::new();
    let mut engine = lab.engine().with_policy(BatchPolicy {
        min_batch_size: 2,
        max_batch_size: 96,
    });
    let tech = TransitionContext::new("tech-2");
    let ids = lab.register(
        &mut engine,
        &[("26_201", SampleRole::Child), ("26_202", SampleRole::AllegedFather)],
    );

    let pcr = engine.progress_ready_samples().unwrap().batches[0];
    engine
        .complete_batch(pcr, StageType::Pcr, BatchOutcome::Completed, &tech)
        .unwrap();
    let elec = engine.progress_ready_samples().unwrap().batches[0];
    lab.drain_events();

    let failed = engine
        .complete_batch(elec, StageType::Electrophoresis, BatchOutcome::Failed, &tech)
        .unwrap();
    assert_eq!(failed.batch.status, WorkflowStatus::RerunRequired);
    assert!(
        failed
            .batch
            .layout
            .iter()
            .all(|(_, well)| well.status == WellStatus::Failed)
    );
    assert!(lab.drain_events().contains(&LabEvent::BatchCompleted {
        batch_id: elec,
        stage: StageType::Electrophoresis,
        outcome: BatchOutcome::Failed,
    }));

    // Rerun from electrophoresis, not from PCR.
    let report = engine
        .batch_update_state(&ids, WorkflowStatus::ElectroReady, &tech)
        .unwrap();
    assert_eq!(report.updated.len(), 2);

    let sweep = engine.progress_ready_samples().unwrap();
    assert_eq!(sweep.batches.len(), 1);
    let rerun = engine.store().get_batch(sweep.batches[0]).unwrap().unwrap();
    assert_eq!(rerun.batch_number, "ELEC_20261015_002");
    assert_ne!(rerun.id, elec);

    let child = engine.store().get_sample(ids[0]).unwrap().unwrap();
    assert_eq!(child.status, WorkflowStatus::ElectroBatched);
    assert_eq!(child.plate.unwrap().batch_id, rerun.id);

    assert!(matches!(
        engine.complete_batch(elec, StageType::Electrophoresis, BatchOutcome::Completed, &tech),
        Err(WorkflowError::BatchClosed(_))
    ));
}

#[test]
fn archived_samples_stay_out_of_plates() {
    let lab = Lab::new();
    let mut engine = lab.engine().with_policy(BatchPolicy {
        min_batch_size: 2,
        max_batch_size: 96,
    });
    let ids = lab.register(
        &mut engine,
        &[
            ("26_301", SampleRole::Other),
            ("26_302", SampleRole::Other),
            ("26_303", SampleRole::Other),
        ],
    );
    engine.archive_sample(ids[1]).unwrap();

    let sweep = engine.progress_ready_samples().unwrap();
    assert_eq!(sweep.promoted, 2);
    let batch = engine.store().get_batch(sweep.batches[0]).unwrap().unwrap();
    assert_eq!(batch.layout.sample_ids(), vec![ids[0], ids[2]]);
    assert_eq!(
        engine.store().get_sample(ids[1]).unwrap().unwrap().status,
        WorkflowStatus::SampleCollected
    );
}
