//! Ingestion across watcher restarts and file rewrites.

use strlab_engine::IngestOutcome;
use strlab_store::{LabRead, LedgerStatus};
use strlab_types::{SampleRole, WorkflowStatus};

use crate::common::{Lab, trio_result};

fn count(lab: &Lab, table: &str) -> i64 {
    lab.services
        .open_store()
        .unwrap()
        .connection()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .unwrap()
}

#[test]
fn restart_rescans_but_never_duplicates() {
    let lab = Lab::new();
    let mut engine = lab.engine();
    lab.register(
        &mut engine,
        &[
            ("26_001", SampleRole::Child),
            ("26_002", SampleRole::AllegedFather),
        ],
    );
    let document = trio_result("26_001", "26_002", "26_003", ["13", "14"]);
    lab.write_result("a.json", &document);

    let mut first = lab.worker();
    let paths = first.scan().unwrap();
    let stored = first.ingest(&paths[0]).unwrap();
    assert!(matches!(stored, IngestOutcome::Stored(_)));
    assert!(first.scan().unwrap().is_empty());

    // A fresh worker has no memory of the directory; the ledger does.
    let mut restarted = lab.worker();
    let paths = restarted.scan().unwrap();
    assert_eq!(paths.len(), 1);
    assert_eq!(
        restarted.ingest(&paths[0]).unwrap(),
        IngestOutcome::Duplicate {
            run_id: stored.run_id()
        }
    );

    assert_eq!(count(&lab, "analysis_runs"), 1);
    assert_eq!(count(&lab, "paternity_conclusions"), 1);
    assert_eq!(count(&lab, "locus_comparisons"), 13);
}

#[test]
fn rewritten_file_is_a_new_run() {
    let lab = Lab::new();
    let mut worker = lab.worker();

    let path = lab.write_result(
        "a.json",
        &trio_result("26_001", "26_002", "26_003", ["13", "14"]),
    );
    let first = worker.ingest(&path).unwrap();

    lab.write_result(
        "a.json",
        &trio_result("26_001", "26_002", "26_003", ["8", "9"]),
    );
    let second = worker.ingest(&path).unwrap();
    assert_ne!(first.run_id(), second.run_id());
    assert!(matches!(second, IngestOutcome::Stored(ref run)
        if run.conclusion == strlab_analysis::Conclusion::Exclusion));

    let store = lab.services.open_store().unwrap();
    assert_eq!(
        store
            .ledger_entries_with_status(LedgerStatus::Stored)
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn malformed_file_is_recorded_and_retried_after_fix() {
    let lab = Lab::new();
    let mut worker = lab.worker();
    let dir = &lab.services.settings.output_dir;
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join("broken.json");
    std::fs::write(&path, "{\"samples\": [{\"sample_name\": \"X_CHILD\"").unwrap();

    let outcome = worker.ingest(&path).unwrap();
    assert!(matches!(outcome, IngestOutcome::Failed { .. }));
    let store = lab.services.open_store().unwrap();
    let errors = store.ledger_entries_with_status(LedgerStatus::Error).unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].error.is_some());

    // The instrument rewrites the file; the watcher reports the change.
    worker.scan().unwrap();
    lab.write_result(
        "broken.json",
        &trio_result("26_001", "26_002", "26_003", ["13", "14"]),
    );
    let changed = worker.scan().unwrap();
    assert_eq!(changed, vec![path.clone()]);
    assert!(matches!(
        worker.ingest(&path).unwrap(),
        IngestOutcome::Stored(_)
    ));
}

#[test]
fn stored_run_left_unapplied_is_applied_on_rescan() {
    let lab = Lab::new();
    let mut engine = lab.engine();
    let ids = lab.register(
        &mut engine,
        &[
            ("26_001", SampleRole::Child),
            ("26_002", SampleRole::AllegedFather),
        ],
    );
    for id in &ids {
        engine
            .store()
            .connection()
            .execute(
                "UPDATE samples SET status = 'analysis_in_progress' WHERE id = ?1",
                [id.value()],
            )
            .unwrap();
    }
    let path = lab.write_result(
        "a.json",
        &trio_result("26_001", "26_002", "26_003", ["13", "14"]),
    );

    // Stored, then the process stops before the samples move.
    let mut cache = lab.services.open_cache().unwrap();
    let stored = cache.on_file_event(&path).unwrap();
    assert!(matches!(stored, IngestOutcome::Stored(_)));
    for &id in &ids {
        assert_eq!(
            engine.store().get_sample(id).unwrap().unwrap().status,
            WorkflowStatus::AnalysisInProgress
        );
    }

    let mut restarted = lab.worker();
    let paths = restarted.scan().unwrap();
    assert_eq!(
        restarted.ingest(&paths[0]).unwrap(),
        IngestOutcome::Duplicate {
            run_id: stored.run_id()
        }
    );
    for &id in &ids {
        assert_eq!(
            engine.store().get_sample(id).unwrap().unwrap().status,
            WorkflowStatus::AnalysisCompleted
        );
    }

    // Once applied, another rescan changes nothing.
    let mut again = lab.worker();
    let paths = again.scan().unwrap();
    again.ingest(&paths[0]).unwrap();
    assert_eq!(engine.history(ids[0]).unwrap().len(), 1);
}
