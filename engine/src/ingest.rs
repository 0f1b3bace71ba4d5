//! Result file ingestion: fingerprint, dedupe, parse, compare, store.
//!
//! Per file: `discovered -> hashed -> (duplicate | parsing) -> (stored | error)`.
//! The processing ledger is the only record of what has been handled; this
//! type keeps no state of its own between events.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use strlab_analysis::{AnalysisResult, compare, parse_file};
use strlab_store::{LabRead, LabStore, LedgerStatus, RunStatus, StoredRun};
use strlab_types::{RunId, SampleRole};

use crate::clock::Clock;
use crate::error::IngestError;
use crate::events::{EventSink, LabEvent};
use crate::fingerprint::Fingerprinter;

/// How long a pending run may sit before another event may take it over.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Parsed, compared and committed.
    Stored(StoredRun),
    /// These bytes were already stored, under this path or another.
    Duplicate { run_id: RunId },
    /// Another worker is processing these bytes right now.
    InFlight { run_id: RunId },
    /// Parse or storage failed; the ledger holds the reason and the file
    /// will be retried on its next event.
    Failed { run_id: RunId, reason: String },
}

impl IngestOutcome {
    #[must_use]
    pub fn run_id(&self) -> RunId {
        match self {
            Self::Stored(run) => run.run_id,
            Self::Duplicate { run_id } | Self::InFlight { run_id } | Self::Failed { run_id, .. } => {
                *run_id
            }
        }
    }
}

pub struct ResultsIngestionCache {
    store: LabStore,
    fingerprinter: Arc<dyn Fingerprinter>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    stale_after: TimeDelta,
}

impl ResultsIngestionCache {
    pub fn new(
        store: LabStore,
        fingerprinter: Arc<dyn Fingerprinter>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            fingerprinter,
            clock,
            events,
            stale_after: to_delta(DEFAULT_STALE_AFTER),
        }
    }

    /// Treat pending runs older than `after` as abandoned.
    #[must_use]
    pub fn with_stale_after(mut self, after: Duration) -> Self {
        self.stale_after = to_delta(after);
        self
    }

    #[must_use]
    pub fn store(&self) -> &LabStore {
        &self.store
    }

    /// Handle one watcher report for `path`.
    pub fn on_file_event(&mut self, path: &Path) -> Result<IngestOutcome, IngestError> {
        let fingerprint =
            self.fingerprinter
                .fingerprint(path)
                .map_err(|source| IngestError::Fingerprint {
                    path: path.to_path_buf(),
                    source,
                })?;
        let key = path.to_string_lossy();
        let now = self.clock.now();

        let tx = self.store.begin()?;
        if let Some(entry) = tx.ledger_entry(&key, &fingerprint)?
            && entry.status == LedgerStatus::Stored
            && let Some(run_id) = entry.run_id
        {
            tracing::debug!(path = %key, run_id = %run_id, "Result file already stored");
            return Ok(IngestOutcome::Duplicate { run_id });
        }

        if let Some(run) = tx.run_by_fingerprint(&fingerprint)? {
            match run.status {
                RunStatus::Processed => {
                    tx.link_duplicate(&key, &fingerprint, run.id, now)?;
                    tx.commit()?;
                    tracing::info!(
                        path = %key,
                        run_id = %run.id,
                        original = %run.source_path,
                        "Result file duplicates a stored run"
                    );
                    return Ok(IngestOutcome::Duplicate { run_id: run.id });
                }
                RunStatus::Pending if now - run.updated_at < self.stale_after => {
                    tracing::debug!(path = %key, run_id = %run.id, "Result file already in flight");
                    return Ok(IngestOutcome::InFlight { run_id: run.id });
                }
                RunStatus::Pending => {
                    tracing::warn!(
                        path = %key,
                        run_id = %run.id,
                        since = %run.updated_at,
                        "Taking over stale pending run"
                    );
                }
                RunStatus::Error => {
                    tracing::info!(
                        path = %key,
                        run_id = %run.id,
                        previous_error = ?run.error,
                        "Retrying failed result file"
                    );
                }
            }
        }

        let run_id = tx.begin_run(&key, &fingerprint, now)?;
        tx.commit()?;

        let result = match parse_file(path) {
            Ok(result) => result,
            Err(err) => return self.fail(run_id, &key, &fingerprint, &err.to_string()),
        };
        warn_on_extra_roles(&key, &result);
        let trio = match result.trio() {
            Ok(trio) => trio,
            Err(err) => return self.fail(run_id, &key, &fingerprint, &err.to_string()),
        };
        let report = compare(
            &trio.child.profile,
            &trio.alleged_father.profile,
            trio.mother.map(|mother| &mother.profile),
        );

        let now = self.clock.now();
        let stored = {
            let tx = self.store.begin()?;
            match tx.record_results(run_id, &key, &fingerprint, &result, &trio, &report, now) {
                Ok(stored) => tx.commit().map(|()| stored),
                Err(err) => Err(err),
            }
        };
        let stored = match stored {
            Ok(stored) => stored,
            Err(err) => return self.fail(run_id, &key, &fingerprint, &err.to_string()),
        };

        tracing::info!(
            path = %key,
            run_id = %run_id,
            conclusion = %stored.conclusion,
            loci_compared = report.loci_compared,
            matching = report.matching_loci,
            excluding = report.excluding_loci,
            "Stored analysis run"
        );
        self.events.emit(LabEvent::ConclusionReady {
            run_id,
            conclusion: stored.conclusion,
            probability: stored.probability,
        });
        Ok(IngestOutcome::Stored(stored))
    }

    /// Retry every ledger entry in `error` whose file is still on disk.
    pub fn reprocess_failed(&mut self) -> Result<Vec<(PathBuf, IngestOutcome)>, IngestError> {
        let paths: BTreeSet<PathBuf> = self
            .store
            .ledger_entries_with_status(LedgerStatus::Error)?
            .into_iter()
            .map(|entry| PathBuf::from(entry.path))
            .filter(|path| path.is_file())
            .collect();

        let mut outcomes = Vec::with_capacity(paths.len());
        for path in paths {
            match self.on_file_event(&path) {
                Ok(outcome) => outcomes.push((path, outcome)),
                Err(IngestError::Fingerprint { path, source }) => {
                    tracing::warn!(path = %path.display(), error = %source, "Skipping unreadable file");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(outcomes)
    }

    /// Flip the pending ledger rows of `path` (and their runs) to `error`.
    pub fn mark_timed_out(&mut self, path: &Path, reason: &str) -> Result<usize, IngestError> {
        let key = path.to_string_lossy();
        let tx = self.store.begin()?;
        let changed = tx.mark_pending_as_error(&key, reason, self.clock.now())?;
        tx.commit()?;
        if changed > 0 {
            tracing::warn!(path = %key, reason, "Marked pending ingestion as failed");
        }
        Ok(changed)
    }

    fn fail(
        &mut self,
        run_id: RunId,
        key: &str,
        fingerprint: &str,
        reason: &str,
    ) -> Result<IngestOutcome, IngestError> {
        tracing::warn!(path = %key, run_id = %run_id, reason, "Result file ingestion failed");
        let tx = self.store.begin()?;
        tx.fail_run(Some(run_id), key, fingerprint, reason, self.clock.now())?;
        tx.commit()?;
        Ok(IngestOutcome::Failed {
            run_id,
            reason: reason.to_string(),
        })
    }
}

fn warn_on_extra_roles(key: &str, result: &AnalysisResult) {
    for role in [SampleRole::Child, SampleRole::AllegedFather, SampleRole::Mother] {
        let count = result.count_role(role);
        if count > 1 {
            tracing::warn!(
                path = %key,
                role = role.as_str(),
                count,
                "Several samples share a role; comparing the first"
            );
        }
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
