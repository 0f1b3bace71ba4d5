//! Workflow engine and result ingestion for the STR lab pipeline.
//!
//! [`WorkflowEngine`] owns sample and batch transitions, [`ResultsIngestionCache`]
//! turns instrument result files into stored paternity conclusions, and
//! [`runtime`] drives both from two tokio loops. Every component is built from
//! an injected store connection, clock and event sink.

mod assigner;
mod clock;
mod config;
mod error;
mod events;
mod fingerprint;
mod ingest;
pub mod runtime;
mod watcher;
mod workflow;

pub use assigner::{BatchAssigner, BatchPolicy, PlannedBatch, layout_for};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    CONFIG_ENV_VAR, ConfigError, LabConfig, ResultsConfig, Settings, StoreConfig, WorkflowConfig,
    config_path, data_dir, expand_env_vars, expand_path,
};
pub use error::{AssignError, IngestError, Missing, RuntimeError, WatchError, WorkflowError};
pub use events::{ChannelSink, EventSink, LabEvent, NoopSink, TracingSink};
pub use fingerprint::{Fingerprinter, Sha256Fingerprinter, sha256_file};
pub use ingest::{DEFAULT_STALE_AFTER, IngestOutcome, ResultsIngestionCache};
pub use runtime::{IngestWorker, Services};
pub use watcher::ResultFileWatcher;
pub use workflow::{
    BatchCompletion, BulkReport, INGESTION_ACTOR, SWEEP_ACTOR, SweepReport, TransitionContext,
    WorkflowEngine,
};
