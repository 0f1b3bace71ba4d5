use chrono::TimeZone;
use strlab_analysis::Conclusion;
use strlab_types::{RunId, SampleRole, WellPosition};
use tokio::sync::mpsc::UnboundedReceiver;

use super::*;
use crate::clock::FixedClock;
use crate::events::ChannelSink;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap()
}

fn engine() -> (WorkflowEngine, Arc<FixedClock>, UnboundedReceiver<LabEvent>) {
    let clock = Arc::new(FixedClock::new(start()));
    let (sink, rx) = ChannelSink::new();
    let engine = WorkflowEngine::new(
        LabStore::open_in_memory().unwrap(),
        clock.clone(),
        Arc::new(sink),
    );
    (engine, clock, rx)
}

fn register(engine: &mut WorkflowEngine, clock: &FixedClock, n: usize) -> Vec<SampleId> {
    register_from(engine, clock, 0, n)
}

fn register_from(
    engine: &mut WorkflowEngine,
    clock: &FixedClock,
    first: usize,
    n: usize,
) -> Vec<SampleId> {
    (first..first + n)
        .map(|i| {
            clock.advance(chrono::Duration::seconds(1));
            engine
                .register_sample(&NewSample::new(
                    format!("26_{i:03}"),
                    "CASE-1",
                    SampleRole::Other,
                ))
                .unwrap()
                .id
        })
        .collect()
}

/// Put a sample straight into `status`, bypassing the engine.
fn force_status(engine: &WorkflowEngine, id: SampleId, status: WorkflowStatus) {
    engine
        .store()
        .connection()
        .execute(
            &format!(
                "UPDATE samples SET status = '{}' WHERE id = {}",
                status.as_str(),
                id.value()
            ),
            [],
        )
        .unwrap();
}

fn status_of(engine: &WorkflowEngine, id: SampleId) -> WorkflowStatus {
    engine.store().get_sample(id).unwrap().unwrap().status
}

fn drain(rx: &mut UnboundedReceiver<LabEvent>) -> Vec<LabEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn operator() -> TransitionContext {
    TransitionContext::new("tech-7")
}

#[test]
fn every_edge_outside_the_table_is_rejected_without_effect() {
    let (mut engine, clock, _rx) = engine();
    let id = register(&mut engine, &clock, 1)[0];

    for from in WorkflowStatus::ALL {
        for to in WorkflowStatus::ALL {
            if from.allowed_next().contains(&to) {
                continue;
            }
            force_status(&engine, id, from);
            let err = engine.transition(id, to, &operator()).unwrap_err();
            assert!(
                matches!(
                    err,
                    WorkflowError::InvalidTransition { sample_id, from: f, to: t }
                        if sample_id == id && f == from && t == to
                ),
                "{from} -> {to}: {err}"
            );
            assert_eq!(status_of(&engine, id), from);
        }
    }
    assert!(engine.history(id).unwrap().is_empty());
}

#[test]
fn transition_writes_audit_and_emits_after_commit() {
    let (mut engine, clock, mut rx) = engine();
    let id = register(&mut engine, &clock, 1)[0];

    let ctx = operator().with_details(json!({"note": "manual intake"}));
    let sample = engine
        .transition(id, WorkflowStatus::PcrReady, &ctx)
        .unwrap();
    assert_eq!(sample.status, WorkflowStatus::PcrReady);
    assert_eq!(status_of(&engine, id), WorkflowStatus::PcrReady);

    let history = engine.history(id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from, WorkflowStatus::SampleCollected);
    assert_eq!(history[0].to, WorkflowStatus::PcrReady);
    assert_eq!(history[0].actor, "tech-7");
    assert_eq!(history[0].context, json!({"note": "manual intake"}));

    assert_eq!(
        drain(&mut rx),
        vec![LabEvent::SampleStatusChanged {
            sample_id: id,
            lab_number: "26_000".to_string(),
            from: WorkflowStatus::SampleCollected,
            to: WorkflowStatus::PcrReady,
        }]
    );
}

#[test]
fn unknown_and_archived_samples_cannot_move() {
    let (mut engine, clock, mut rx) = engine();
    let id = register(&mut engine, &clock, 1)[0];
    let missing = SampleId::new(999);

    assert!(matches!(
        engine.transition(missing, WorkflowStatus::PcrReady, &operator()),
        Err(WorkflowError::NotFound(Missing::Sample(m))) if m == missing
    ));
    assert!(matches!(
        engine.history(missing),
        Err(WorkflowError::NotFound(_))
    ));

    assert!(engine.archive_sample(id).unwrap().archived);
    assert!(matches!(
        engine.transition(id, WorkflowStatus::PcrReady, &operator()),
        Err(WorkflowError::Archived(a)) if a == id
    ));
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn duplicate_lab_number_is_its_own_error() {
    let (mut engine, _clock, _rx) = engine();
    let sample = NewSample::new("26_001", "CASE-1", SampleRole::Child);
    engine.register_sample(&sample).unwrap();
    assert!(matches!(
        engine.register_sample(&sample),
        Err(WorkflowError::DuplicateLabNumber(lab)) if lab == "26_001"
    ));
}

#[test]
fn bulk_update_reports_invalid_samples_and_commits_the_rest() {
    let (mut engine, clock, mut rx) = engine();
    let ids = register(&mut engine, &clock, 3);
    force_status(&engine, ids[1], WorkflowStatus::PcrCompleted);

    let report = engine
        .batch_update_state(&ids, WorkflowStatus::PcrReady, &operator())
        .unwrap();

    let updated: Vec<SampleId> = report.updated.iter().map(|s| s.id).collect();
    assert_eq!(updated, vec![ids[0], ids[2]]);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].0, ids[1]);
    assert!(matches!(
        report.rejected[0].1,
        WorkflowError::InvalidTransition { .. }
    ));

    assert_eq!(status_of(&engine, ids[0]), WorkflowStatus::PcrReady);
    assert_eq!(status_of(&engine, ids[1]), WorkflowStatus::PcrCompleted);
    assert_eq!(status_of(&engine, ids[2]), WorkflowStatus::PcrReady);
    assert_eq!(drain(&mut rx).len(), 2);
}

#[test]
fn bulk_update_storage_failure_rolls_back_every_sample() {
    let (mut engine, clock, mut rx) = engine();
    let ids = register(&mut engine, &clock, 3);
    engine
        .store()
        .connection()
        .execute_batch(&format!(
            "CREATE TRIGGER fail_third BEFORE UPDATE OF status ON samples
             WHEN NEW.id = {}
             BEGIN SELECT RAISE(ABORT, 'simulated disk failure'); END;",
            ids[2].value()
        ))
        .unwrap();

    let err = engine
        .batch_update_state(&ids, WorkflowStatus::PcrReady, &operator())
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Storage(_)));
    assert!(!err.is_rejection());

    for &id in &ids {
        assert_eq!(status_of(&engine, id), WorkflowStatus::SampleCollected);
        assert!(engine.history(id).unwrap().is_empty());
    }
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn sweep_promotes_and_batches_once_threshold_is_met() {
    let (mut engine, clock, _rx) = engine();
    let ids = register(&mut engine, &clock, 10);

    let report = engine.progress_ready_samples().unwrap();
    assert_eq!(report.promoted, 10);
    assert_eq!(report.batches.len(), 1);
    assert_eq!(report.analysis_started, 0);

    let batch = engine.store().get_batch(report.batches[0]).unwrap().unwrap();
    assert_eq!(batch.batch_number, "PCR_20261015_001");
    assert_eq!(batch.stage, StageType::Pcr);
    assert_eq!(batch.status, WorkflowStatus::PcrBatched);
    assert_eq!(batch.layout.sample_ids(), ids);

    let first = engine.store().get_sample(ids[0]).unwrap().unwrap();
    assert_eq!(first.status, WorkflowStatus::PcrBatched);
    let plate = first.plate.unwrap();
    assert_eq!(plate.batch_id, batch.id);
    assert_eq!(plate.well, "A1".parse::<WellPosition>().unwrap());

    let history = engine.history(ids[9]).unwrap();
    let actors: Vec<&str> = history.iter().map(|e| e.actor.as_str()).collect();
    assert_eq!(actors, vec![SWEEP_ACTOR, SWEEP_ACTOR]);
    assert_eq!(history[1].context["batch_number"], "PCR_20261015_001");
    assert_eq!(history[1].context["well"], "A10");

    // Nothing left to do.
    assert!(engine.progress_ready_samples().unwrap().is_empty());
}

#[test]
fn sweep_waits_below_minimum_batch_size() {
    let (mut engine, clock, _rx) = engine();
    let ids = register(&mut engine, &clock, 5);

    let report = engine.progress_ready_samples().unwrap();
    assert_eq!(report.promoted, 5);
    assert!(report.batches.is_empty());
    assert!(ids
        .iter()
        .all(|&id| status_of(&engine, id) == WorkflowStatus::PcrReady));
}

#[test]
fn sweep_splits_large_cohorts_across_plates() {
    let (mut engine, clock, _rx) = engine();
    let ids = register(&mut engine, &clock, 130);

    let report = engine.progress_ready_samples().unwrap();
    assert_eq!(report.batches.len(), 2);
    let first = engine.store().get_batch(report.batches[0]).unwrap().unwrap();
    let second = engine.store().get_batch(report.batches[1]).unwrap().unwrap();
    assert_eq!(first.layout.len(), 96);
    assert_eq!(second.layout.len(), 34);
    assert_eq!(second.batch_number, "PCR_20261015_002");
    assert_eq!(first.layout.sample_ids(), ids[..96].to_vec());
}

#[test]
fn sweep_without_auto_advance_only_batches_ready_samples() {
    let (engine, clock, _rx) = engine();
    let mut engine = engine.with_auto_advance(false).with_policy(BatchPolicy {
        min_batch_size: 2,
        max_batch_size: 96,
    });
    let ids = register(&mut engine, &clock, 3);
    engine
        .batch_update_state(&ids[..2], WorkflowStatus::PcrReady, &operator())
        .unwrap();

    let report = engine.progress_ready_samples().unwrap();
    assert_eq!(report.promoted, 0);
    assert_eq!(report.batches.len(), 1);
    assert_eq!(status_of(&engine, ids[2]), WorkflowStatus::SampleCollected);
}

#[test]
fn sweep_starts_analysis_per_sample() {
    let (mut engine, clock, _rx) = engine();
    let ids = register(&mut engine, &clock, 2);
    force_status(&engine, ids[0], WorkflowStatus::AnalysisReady);
    force_status(&engine, ids[1], WorkflowStatus::ElectroCompleted);

    let report = engine
        .with_policy(BatchPolicy::default())
        .progress_ready_samples()
        .unwrap();
    assert_eq!(report.promoted, 1);
    assert_eq!(report.analysis_started, 2);
}

#[test]
fn complete_batch_moves_members_and_closes_the_batch() {
    let (mut engine, clock, mut rx) = engine();
    let ids = register(&mut engine, &clock, 8);
    let batch_id = engine.progress_ready_samples().unwrap().batches[0];
    drain(&mut rx);

    let done = engine
        .complete_batch(batch_id, StageType::Pcr, BatchOutcome::Completed, &operator())
        .unwrap();
    assert_eq!(done.updated.len(), 8);
    assert!(done.skipped.is_empty());
    assert_eq!(done.batch.status, WorkflowStatus::PcrCompleted);

    let stored = engine.store().get_batch(batch_id).unwrap().unwrap();
    assert_eq!(stored.status, WorkflowStatus::PcrCompleted);
    assert!(!stored.is_open());
    assert!(
        stored
            .layout
            .iter()
            .all(|(_, well)| well.status == WellStatus::Completed)
    );
    assert!(ids
        .iter()
        .all(|&id| status_of(&engine, id) == WorkflowStatus::PcrCompleted));

    let events = drain(&mut rx);
    assert_eq!(events.len(), 9);
    assert_eq!(
        events.last(),
        Some(&LabEvent::BatchCompleted {
            batch_id,
            stage: StageType::Pcr,
            outcome: BatchOutcome::Completed,
        })
    );

    assert!(matches!(
        engine.complete_batch(batch_id, StageType::Pcr, BatchOutcome::Completed, &operator()),
        Err(WorkflowError::BatchClosed(b)) if b == batch_id
    ));
}

#[test]
fn complete_batch_rejects_wrong_stage_and_unknown_batch() {
    let (mut engine, clock, _rx) = engine();
    register(&mut engine, &clock, 8);
    let batch_id = engine.progress_ready_samples().unwrap().batches[0];

    assert!(matches!(
        engine.complete_batch(
            batch_id,
            StageType::Electrophoresis,
            BatchOutcome::Completed,
            &operator()
        ),
        Err(WorkflowError::StageMismatch {
            requested: StageType::Electrophoresis,
            actual: StageType::Pcr,
            ..
        })
    ));
    assert!(matches!(
        engine.complete_batch(
            BatchId::new(404),
            StageType::Pcr,
            BatchOutcome::Completed,
            &operator()
        ),
        Err(WorkflowError::NotFound(Missing::Batch(_)))
    ));
    assert_eq!(
        engine.store().get_batch(batch_id).unwrap().unwrap().status,
        WorkflowStatus::PcrBatched
    );
}

#[test]
fn failed_batch_sends_samples_to_rerun_and_they_can_be_rebatched() {
    let (mut engine, clock, _rx) = engine();
    let ids = register(&mut engine, &clock, 8);
    let batch_id = engine.progress_ready_samples().unwrap().batches[0];

    let done = engine
        .complete_batch(batch_id, StageType::Pcr, BatchOutcome::Failed, &operator())
        .unwrap();
    assert_eq!(done.batch.status, WorkflowStatus::RerunRequired);
    assert!(ids
        .iter()
        .all(|&id| status_of(&engine, id) == WorkflowStatus::RerunRequired));

    engine
        .batch_update_state(&ids, WorkflowStatus::PcrReady, &operator())
        .unwrap();
    let report = engine.progress_ready_samples().unwrap();
    assert_eq!(report.batches.len(), 1);
    let rerun = engine.store().get_batch(report.batches[0]).unwrap().unwrap();
    assert_eq!(rerun.batch_number, "PCR_20261015_002");
}

#[test]
fn sample_pulled_off_an_open_plate_joins_the_next_batch() {
    let (mut engine, clock, _rx) = engine();
    let ids = register(&mut engine, &clock, 8);
    let first = engine.progress_ready_samples().unwrap().batches[0];

    let pulled = engine
        .transition(ids[0], WorkflowStatus::RerunRequired, &operator())
        .unwrap();
    assert!(pulled.plate.is_none());
    engine
        .transition(ids[0], WorkflowStatus::PcrReady, &operator())
        .unwrap();
    let fresh = register_from(&mut engine, &clock, 100, 7);

    let report = engine.progress_ready_samples().unwrap();
    assert_eq!(report.batches.len(), 1);
    let second = engine.store().get_batch(report.batches[0]).unwrap().unwrap();
    assert_eq!(second.batch_number, "PCR_20261015_002");
    assert_eq!(second.layout.len(), 8);
    assert_eq!(second.layout.sample_ids()[0], ids[0]);
    let plate = engine.store().get_sample(ids[0]).unwrap().unwrap().plate.unwrap();
    assert_eq!(plate.batch_id, second.id);
    assert!(fresh
        .iter()
        .all(|&id| status_of(&engine, id) == WorkflowStatus::PcrBatched));

    // The first plate completes without the sample it lost.
    let done = engine
        .complete_batch(first, StageType::Pcr, BatchOutcome::Completed, &operator())
        .unwrap();
    assert_eq!(done.updated.len(), 7);
    assert!(done.skipped.is_empty());
    assert_eq!(status_of(&engine, ids[0]), WorkflowStatus::PcrBatched);
}

#[test]
fn stage_that_cannot_batch_does_not_stall_the_sweep() {
    let (mut engine, clock, _rx) = engine();
    let ids = register(&mut engine, &clock, 8);
    engine.progress_ready_samples().unwrap();

    // Back to ready while its well is still open, as an older database could hold.
    force_status(&engine, ids[0], WorkflowStatus::PcrReady);
    let fresh = register_from(&mut engine, &clock, 100, 7);
    let analysis = register_from(&mut engine, &clock, 200, 1)[0];
    force_status(&engine, analysis, WorkflowStatus::AnalysisReady);

    for _ in 0..2 {
        let report = engine.progress_ready_samples().unwrap();
        assert!(report.batches.is_empty());
    }
    assert_eq!(status_of(&engine, analysis), WorkflowStatus::AnalysisInProgress);
    assert!(fresh
        .iter()
        .all(|&id| status_of(&engine, id) == WorkflowStatus::PcrReady));
}

#[test]
fn complete_batch_skips_archived_members() {
    let (mut engine, clock, _rx) = engine();
    let ids = register(&mut engine, &clock, 8);
    let batch_id = engine.progress_ready_samples().unwrap().batches[0];
    engine.archive_sample(ids[3]).unwrap();

    let done = engine
        .complete_batch(batch_id, StageType::Pcr, BatchOutcome::Completed, &operator())
        .unwrap();
    assert_eq!(done.updated.len(), 7);
    assert_eq!(done.skipped.len(), 1);
    assert_eq!(done.skipped[0].0, ids[3]);
    assert_eq!(status_of(&engine, ids[3]), WorkflowStatus::PcrBatched);
}

#[test]
fn manual_batch_is_all_or_nothing() {
    let (mut engine, clock, _rx) = engine();
    let ids = register(&mut engine, &clock, 3);
    force_status(&engine, ids[1], WorkflowStatus::Completed);

    let err = engine
        .create_batch(StageType::Pcr, &ids, &operator())
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition { sample_id, .. } if sample_id == ids[1]));
    assert_eq!(status_of(&engine, ids[0]), WorkflowStatus::SampleCollected);
    assert_eq!(
        engine
            .store()
            .next_batch_number(StageType::Pcr, start().date_naive())
            .unwrap(),
        "PCR_20261015_001"
    );

    let batch = engine
        .create_batch(StageType::Pcr, &[ids[2], ids[0]], &operator())
        .unwrap();
    assert_eq!(batch.layout.sample_ids(), vec![ids[2], ids[0]]);
    assert_eq!(status_of(&engine, ids[0]), WorkflowStatus::PcrBatched);

    assert!(matches!(
        engine.create_batch(StageType::Pcr, &[ids[0]], &operator()),
        Err(WorkflowError::InvalidTransition { .. })
    ));
    assert!(matches!(
        engine.create_batch(StageType::Pcr, &[], &operator()),
        Err(WorkflowError::Assign(crate::error::AssignError::EmptyBatch))
    ));
}

#[test]
fn analysis_result_completes_ready_and_running_samples() {
    let (mut engine, clock, mut rx) = engine();
    let ids = register(&mut engine, &clock, 4);
    force_status(&engine, ids[0], WorkflowStatus::AnalysisReady);
    force_status(&engine, ids[1], WorkflowStatus::AnalysisInProgress);
    force_status(&engine, ids[2], WorkflowStatus::AnalysisCompleted);

    let run = StoredRun {
        run_id: RunId::new(1),
        conclusion: Conclusion::Inclusion,
        probability: Some(99.99),
        case_number: Some("CASE-1".to_string()),
        sample_ids: ids.clone(),
    };
    let report = engine.apply_analysis_result(&run).unwrap();

    let updated: Vec<SampleId> = report.updated.iter().map(|s| s.id).collect();
    assert_eq!(updated, vec![ids[0], ids[1]]);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].0, ids[3]);
    assert_eq!(status_of(&engine, ids[0]), WorkflowStatus::AnalysisCompleted);
    assert_eq!(status_of(&engine, ids[2]), WorkflowStatus::AnalysisCompleted);
    assert_eq!(status_of(&engine, ids[3]), WorkflowStatus::SampleCollected);

    let history = engine.history(ids[0]).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].actor, INGESTION_ACTOR);
    assert_eq!(history[1].context["conclusion"], "INCLUSION");
    assert_eq!(drain(&mut rx).len(), 3);

    // Applying the same run again changes nothing.
    let again = engine.apply_analysis_result(&run).unwrap();
    assert!(again.updated.is_empty());
    assert_eq!(again.rejected.len(), 1);
}

#[test]
fn context_fields_merge_into_details() {
    let ctx = TransitionContext::new("sweep")
        .with_details(json!("legacy"))
        .with_field("well", "B2");
    assert_eq!(ctx.details, json!({"details": "legacy", "well": "B2"}));
    assert_eq!(
        TransitionContext::new("x").with_field("n", 3).details,
        json!({"n": 3})
    );
}
