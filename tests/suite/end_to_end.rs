//! A paternity trio from intake to a stored conclusion.

use strlab_analysis::Conclusion;
use strlab_engine::{IngestOutcome, LabEvent, TransitionContext};
use strlab_store::LabRead;
use strlab_types::{BatchOutcome, SampleRole, StageType, WorkflowStatus};

use crate::common::{Lab, trio_result};

#[test]
fn trio_moves_through_pcr_electrophoresis_and_ingestion() {
    let mut lab = Lab::new();
    let mut engine = lab.engine();
    let tech = TransitionContext::new("tech-1");

    let mut cohort = vec![
        ("26_001", SampleRole::Child),
        ("26_002", SampleRole::AllegedFather),
        ("26_003", SampleRole::Mother),
    ];
    let others: Vec<String> = (4..=8).map(|i| format!("26_{i:03}")).collect();
    cohort.extend(others.iter().map(|lab| (lab.as_str(), SampleRole::Other)));
    let ids = lab.register(&mut engine, &cohort);
    let trio = &ids[..3];

    // Intake -> PCR plate.
    let sweep = engine.progress_ready_samples().unwrap();
    assert_eq!(sweep.promoted, 8);
    assert_eq!(sweep.batches.len(), 1);
    let pcr = engine.store().get_batch(sweep.batches[0]).unwrap().unwrap();
    assert_eq!(pcr.batch_number, "PCR_20261015_001");
    assert_eq!(pcr.layout.sample_ids(), ids);

    engine
        .complete_batch(pcr.id, StageType::Pcr, BatchOutcome::Completed, &tech)
        .unwrap();

    // PCR done -> electrophoresis plate.
    let sweep = engine.progress_ready_samples().unwrap();
    assert_eq!(sweep.promoted, 8);
    assert_eq!(sweep.batches.len(), 1);
    let elec = engine.store().get_batch(sweep.batches[0]).unwrap().unwrap();
    assert_eq!(elec.batch_number, "ELEC_20261015_001");
    assert_eq!(elec.stage, StageType::Electrophoresis);

    engine
        .complete_batch(elec.id, StageType::Electrophoresis, BatchOutcome::Completed, &tech)
        .unwrap();

    // Electrophoresis done -> analysis starts in the same sweep.
    let sweep = engine.progress_ready_samples().unwrap();
    assert_eq!(sweep.promoted, 8);
    assert!(sweep.batches.is_empty());
    assert_eq!(sweep.analysis_started, 8);
    for &id in &ids {
        assert_eq!(
            engine.store().get_sample(id).unwrap().unwrap().status,
            WorkflowStatus::AnalysisInProgress
        );
    }
    lab.drain_events();

    // The instrument drops a result file.
    lab.write_result(
        "IDENTIFILER_20261015.json",
        &trio_result("26_001", "26_002", "26_003", ["13", "14"]),
    );
    let mut worker = lab.worker();
    let paths = worker.scan().unwrap();
    assert_eq!(paths.len(), 1);
    let IngestOutcome::Stored(run) = worker.ingest(&paths[0]).unwrap() else {
        panic!("expected the result to be stored");
    };
    assert_eq!(run.conclusion, Conclusion::Inclusion);
    assert_eq!(run.probability, Some(99.99));
    assert_eq!(run.sample_ids, trio.to_vec());

    for &id in trio {
        assert_eq!(
            engine.store().get_sample(id).unwrap().unwrap().status,
            WorkflowStatus::AnalysisCompleted
        );
    }
    for &id in &ids[3..] {
        assert_eq!(
            engine.store().get_sample(id).unwrap().unwrap().status,
            WorkflowStatus::AnalysisInProgress
        );
    }

    let conclusion = engine.store().conclusion_for_run(run.run_id).unwrap().unwrap();
    assert_eq!(conclusion.child_sample, "IDENTIFILER_CHILD_001");
    assert_eq!(conclusion.father_sample, "IDENTIFILER_AF_001");
    assert_eq!(conclusion.matching_loci, 13);
    let maternal = conclusion.maternal.unwrap();
    assert_eq!(maternal.loci_compared, 13);
    assert_eq!(maternal.matching_loci, 13);

    let events = lab.drain_events();
    assert!(events.iter().any(|event| matches!(
        event,
        LabEvent::ConclusionReady { run_id, conclusion: Conclusion::Inclusion, .. }
            if *run_id == run.run_id
    )));
    assert_eq!(
        events
            .iter()
            .filter(|event| matches!(
                event,
                LabEvent::SampleStatusChanged {
                    to: WorkflowStatus::AnalysisCompleted,
                    ..
                }
            ))
            .count(),
        3
    );

    // Reporting happens outside the pipeline.
    for target in [WorkflowStatus::ReportGenerated, WorkflowStatus::Completed] {
        let report = engine.batch_update_state(trio, target, &tech).unwrap();
        assert_eq!(report.updated.len(), 3);
        assert!(report.rejected.is_empty());
    }

    let history = engine.history(trio[0]).unwrap();
    let path: Vec<WorkflowStatus> = history.iter().map(|entry| entry.to).collect();
    assert_eq!(
        path,
        vec![
            WorkflowStatus::PcrReady,
            WorkflowStatus::PcrBatched,
            WorkflowStatus::PcrCompleted,
            WorkflowStatus::ElectroReady,
            WorkflowStatus::ElectroBatched,
            WorkflowStatus::ElectroCompleted,
            WorkflowStatus::AnalysisReady,
            WorkflowStatus::AnalysisInProgress,
            WorkflowStatus::AnalysisCompleted,
            WorkflowStatus::ReportGenerated,
            WorkflowStatus::Completed,
        ]
    );
}

#[test]
fn excluded_father_is_stored_as_exclusion() {
    let lab = Lab::new();
    let mut engine = lab.engine();
    lab.register(
        &mut engine,
        &[
            ("26_101", SampleRole::Child),
            ("26_102", SampleRole::AllegedFather),
        ],
    );

    let path = lab.write_result(
        "exclusion.json",
        &trio_result("26_101", "26_102", "26_999", ["8", "9"]),
    );
    let IngestOutcome::Stored(run) = lab.worker().ingest(&path).unwrap() else {
        panic!("expected the result to be stored");
    };
    assert_eq!(run.conclusion, Conclusion::Exclusion);
    assert_eq!(run.probability, Some(0.0));
    // The mother's lab number is not registered, so only two samples are linked.
    assert_eq!(run.sample_ids.len(), 2);
}
