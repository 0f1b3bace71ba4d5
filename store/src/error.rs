use std::path::PathBuf;

use strlab_types::{BatchId, PLATE_CAPACITY, SampleId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode or decode {what}: {source}")]
    Json {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("lab number {0} is already registered")]
    DuplicateLabNumber(String),
    #[error("sample {sample_id} is already on open batch {batch_id}")]
    SampleAlreadyBatched {
        sample_id: SampleId,
        batch_id: BatchId,
    },
    #[error("batch layout holds {0} samples, plate capacity is {PLATE_CAPACITY}")]
    CapacityExceeded(usize),
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: i64 },
    #[error("corrupt {table} row: {detail}")]
    Corrupt { table: &'static str, detail: String },
}

impl StoreError {
    pub(crate) fn corrupt(table: &'static str, detail: impl ToString) -> Self {
        Self::Corrupt {
            table,
            detail: detail.to_string(),
        }
    }

    pub(crate) fn json(what: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Json { what, source }
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
