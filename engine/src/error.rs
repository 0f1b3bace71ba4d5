use std::fmt;
use std::path::PathBuf;

use strlab_store::StoreError;
use strlab_types::{BatchId, PLATE_CAPACITY, PlateError, SampleId, StageType, WorkflowStatus};
use thiserror::Error;

/// The record a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Sample(SampleId),
    Batch(BatchId),
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sample(id) => write!(f, "sample {id}"),
            Self::Batch(id) => write!(f, "batch {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssignError {
    #[error("no samples to batch")]
    EmptyBatch,
    #[error("batch exceeds plate capacity of {PLATE_CAPACITY} wells")]
    BatchCapacityExceeded,
    #[error("sample {0} is listed twice")]
    DuplicateSample(SampleId),
    #[error(transparent)]
    Plate(PlateError),
}

impl From<PlateError> for AssignError {
    fn from(err: PlateError) -> Self {
        match err {
            PlateError::CapacityExceeded => Self::BatchCapacityExceeded,
            PlateError::DuplicateSample(id) => Self::DuplicateSample(id),
            other => Self::Plate(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("sample {sample_id}: transition {from} -> {to} is not allowed")]
    InvalidTransition {
        sample_id: SampleId,
        from: WorkflowStatus,
        to: WorkflowStatus,
    },
    #[error("{0} not found")]
    NotFound(Missing),
    #[error("batch {batch_id} belongs to stage {actual}, not {requested}")]
    StageMismatch {
        batch_id: BatchId,
        requested: StageType,
        actual: StageType,
    },
    #[error("sample {0} is archived")]
    Archived(SampleId),
    #[error("batch {0} is already closed")]
    BatchClosed(BatchId),
    #[error("lab number {0} is already registered")]
    DuplicateLabNumber(String),
    #[error("sample {sample_id} is already on open batch {batch_id}")]
    AlreadyBatched {
        sample_id: SampleId,
        batch_id: BatchId,
    },
    #[error(transparent)]
    Assign(#[from] AssignError),
    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),
}

impl WorkflowError {
    /// Whether the error concerns the request itself rather than the store.
    /// Rejections are reported per sample; storage failures abort the call.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateLabNumber(lab) => Self::DuplicateLabNumber(lab),
            StoreError::SampleAlreadyBatched {
                sample_id,
                batch_id,
            } => Self::AlreadyBatched {
                sample_id,
                batch_id,
            },
            other => Self::Storage(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to fingerprint {path}: {source}")]
    Fingerprint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to create watch directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to open lab store: {0}")]
    Open(#[source] StoreError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
