//! The two long-running loops: result watching and the periodic sweep.
//!
//! Each loop owns its own store connection and moves its state into
//! `spawn_blocking` for every unit of work, getting it back when the work
//! finishes. The store's write lock is the only coordination between them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use strlab_store::LabStore;
use tokio::sync::watch;
use tokio::task::spawn_blocking;
use tokio::time::MissedTickBehavior;

use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::error::{RuntimeError, WatchError};
use crate::events::EventSink;
use crate::fingerprint::{Fingerprinter, Sha256Fingerprinter};
use crate::ingest::{IngestOutcome, ResultsIngestionCache};
use crate::watcher::ResultFileWatcher;
use crate::workflow::WorkflowEngine;

/// Everything needed to open a component on its own connection.
#[derive(Clone)]
pub struct Services {
    pub settings: Settings,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventSink>,
    pub fingerprinter: Arc<dyn Fingerprinter>,
}

impl Services {
    pub fn new(settings: Settings, events: Arc<dyn EventSink>) -> Self {
        Self {
            settings,
            clock: Arc::new(SystemClock),
            events,
            fingerprinter: Arc::new(Sha256Fingerprinter),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn open_store(&self) -> Result<LabStore, RuntimeError> {
        LabStore::open(&self.settings.db_path).map_err(RuntimeError::Open)
    }

    pub fn open_engine(&self) -> Result<WorkflowEngine, RuntimeError> {
        Ok(
            WorkflowEngine::new(self.open_store()?, self.clock.clone(), self.events.clone())
                .with_policy(self.settings.batch_policy)
                .with_auto_advance(self.settings.auto_advance),
        )
    }

    pub fn open_cache(&self) -> Result<ResultsIngestionCache, RuntimeError> {
        Ok(ResultsIngestionCache::new(
            self.open_store()?,
            self.fingerprinter.clone(),
            self.clock.clone(),
            self.events.clone(),
        )
        .with_stale_after(self.settings.ingest_timeout))
    }

    pub fn open_worker(&self) -> Result<IngestWorker, RuntimeError> {
        Ok(IngestWorker::new(
            ResultFileWatcher::new(&self.settings.output_dir, &self.settings.extension),
            self.open_cache()?,
            self.open_engine()?,
        ))
    }
}

/// Watcher, ingestion and the workflow reaction, driven by the watch loop.
pub struct IngestWorker {
    watcher: ResultFileWatcher,
    cache: ResultsIngestionCache,
    engine: WorkflowEngine,
}

impl IngestWorker {
    pub fn new(
        watcher: ResultFileWatcher,
        cache: ResultsIngestionCache,
        engine: WorkflowEngine,
    ) -> Self {
        Self {
            watcher,
            cache,
            engine,
        }
    }

    pub fn scan(&mut self) -> Result<Vec<PathBuf>, WatchError> {
        self.watcher.scan()
    }

    /// Ingest `path` and advance the samples it names. A duplicate re-applies
    /// the stored run, since storing and advancing commit separately.
    pub fn ingest(&mut self, path: &Path) -> Result<IngestOutcome, RuntimeError> {
        let outcome = self.cache.on_file_event(path)?;
        let report = match &outcome {
            IngestOutcome::Stored(run) => self.engine.apply_analysis_result(run)?,
            IngestOutcome::Duplicate { run_id } => self.engine.resume_analysis_result(*run_id)?,
            IngestOutcome::InFlight { .. } | IngestOutcome::Failed { .. } => return Ok(outcome),
        };
        if !report.updated.is_empty() || !report.rejected.is_empty() {
            tracing::info!(
                run_id = %outcome.run_id(),
                advanced = report.updated.len(),
                rejected = report.rejected.len(),
                "Applied analysis result to samples"
            );
        }
        Ok(outcome)
    }

    pub fn forget(&mut self, path: &Path) {
        self.watcher.forget(path);
    }
}

/// Run both loops until `shutdown` flips to `true` or its sender is dropped.
pub async fn run(services: Services, shutdown: watch::Receiver<bool>) -> Result<(), RuntimeError> {
    let engine = services.open_engine()?;
    let worker = services.open_worker()?;
    tracing::info!(
        db = %services.settings.db_path.display(),
        output_dir = %services.settings.output_dir.display(),
        "Lab pipeline started"
    );

    let sweep_task = tokio::spawn(sweep_loop(
        engine,
        services.settings.sweep_interval,
        shutdown.clone(),
    ));
    let watch_task = tokio::spawn(watch_loop(worker, services, shutdown));
    let (swept, watched) = tokio::join!(sweep_task, watch_task);
    swept?;
    watched?;
    tracing::info!("Lab pipeline stopped");
    Ok(())
}

pub async fn sweep_loop(
    mut engine: WorkflowEngine,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        // A tick runs to completion; shutdown is only seen between ticks.
        let joined = spawn_blocking(move || {
            let result = engine.progress_ready_samples();
            (engine, result)
        })
        .await;
        match joined {
            Ok((back, result)) => {
                engine = back;
                if let Err(err) = result {
                    tracing::error!(error = %err, "Sweep failed; retrying next tick");
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "Sweep task died; stopping sweep loop");
                break;
            }
        }
    }
    tracing::debug!("Sweep loop stopped");
}

pub async fn watch_loop(
    mut worker: IngestWorker,
    services: Services,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(services.settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    'poll: loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let joined = spawn_blocking(move || {
            let result = worker.scan();
            (worker, result)
        })
        .await;
        let paths = match joined {
            Ok((back, result)) => {
                worker = back;
                match result {
                    Ok(paths) => paths,
                    Err(err) => {
                        tracing::error!(error = %err, "Result directory scan failed");
                        continue;
                    }
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "Scan task died; stopping watch loop");
                break;
            }
        };

        for path in paths {
            if *shutdown.borrow() {
                break 'poll;
            }
            match ingest_with_deadline(worker, path, &services).await {
                Some(back) => worker = back,
                None => break 'poll,
            }
        }
    }
    tracing::debug!("Watch loop stopped");
}

/// Ingest one file on the blocking pool. Past the deadline the file's pending
/// entries are marked `error`; the worker is still awaited and returned.
/// `None` means the worker was lost to a panic.
async fn ingest_with_deadline(
    mut worker: IngestWorker,
    path: PathBuf,
    services: &Services,
) -> Option<IngestWorker> {
    let task_path = path.clone();
    let mut handle = spawn_blocking(move || {
        let result = worker.ingest(&task_path);
        (worker, result)
    });

    let deadline = services.settings.ingest_timeout;
    let timed = tokio::time::timeout(deadline, &mut handle).await;
    let joined = match timed {
        Ok(joined) => joined,
        Err(_) => {
            tracing::warn!(
                path = %path.display(),
                timeout_secs = deadline.as_secs(),
                "Ingestion exceeded its deadline"
            );
            mark_timed_out(services, &path).await;
            handle.await
        }
    };

    match joined {
        Ok((mut worker, result)) => {
            match result {
                Ok(IngestOutcome::InFlight { .. }) => worker.forget(&path),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "Will retry result file");
                    worker.forget(&path);
                }
            }
            Some(worker)
        }
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "Ingest task died");
            None
        }
    }
}

async fn mark_timed_out(services: &Services, path: &Path) {
    let services = services.clone();
    let path = path.to_path_buf();
    let reason = format!(
        "ingestion exceeded {}s deadline",
        services.settings.ingest_timeout.as_secs()
    );
    let joined = spawn_blocking(move || -> Result<usize, RuntimeError> {
        let mut cache = services.open_cache()?;
        Ok(cache.mark_timed_out(&path, &reason)?)
    })
    .await;
    match joined {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => tracing::error!(error = %err, "Failed to record ingestion timeout"),
        Err(err) => tracing::error!(error = %err, "Timeout task died"),
    }
}
