//! Sample and batch records as the rest of the pipeline sees them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{BatchId, PlateLayout, SampleId, StageType, WellPosition, WorkflowStatus};

/// Who a sample was taken from, relative to the case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleRole {
    Child,
    AllegedFather,
    Mother,
    Other,
}

impl SampleRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Child => "child",
            Self::AllegedFather => "alleged_father",
            Self::Mother => "mother",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for SampleRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown sample role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for SampleRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "child" => Ok(Self::Child),
            "alleged_father" | "father" | "af" => Ok(Self::AllegedFather),
            "mother" => Ok(Self::Mother),
            "other" => Ok(Self::Other),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// Where a sample currently sits on a plate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlateAssignment {
    pub batch_id: BatchId,
    pub well: WellPosition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: SampleId,
    pub lab_number: String,
    pub case_number: String,
    pub role: SampleRole,
    pub status: WorkflowStatus,
    pub plate: Option<PlateAssignment>,
    pub archived: bool,
    pub collected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Intake payload; a sample always starts at `sample_collected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSample {
    pub lab_number: String,
    pub case_number: String,
    pub role: SampleRole,
}

impl NewSample {
    pub fn new(
        lab_number: impl Into<String>,
        case_number: impl Into<String>,
        role: SampleRole,
    ) -> Self {
        Self {
            lab_number: lab_number.into(),
            case_number: case_number.into(),
            role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub batch_number: String,
    pub stage: StageType,
    pub status: WorkflowStatus,
    pub layout: PlateLayout,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    /// A batch is open until its stage completes or fails.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == self.stage.batched_status()
    }
}

/// A batch that has been laid out but not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBatch {
    pub stage: StageType,
    pub layout: PlateLayout,
}
