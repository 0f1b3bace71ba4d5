//! Sample workflow states and the closed transition table.
//!
//! The table is a `match`, not data: adding a state without deciding where it
//! may go is a compile error.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a sample sits in the laboratory workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    SampleCollected,
    PcrReady,
    PcrBatched,
    PcrCompleted,
    ElectroReady,
    ElectroBatched,
    ElectroCompleted,
    AnalysisReady,
    AnalysisInProgress,
    AnalysisCompleted,
    RerunRequired,
    ReportGenerated,
    Completed,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 13] = [
        WorkflowStatus::SampleCollected,
        WorkflowStatus::PcrReady,
        WorkflowStatus::PcrBatched,
        WorkflowStatus::PcrCompleted,
        WorkflowStatus::ElectroReady,
        WorkflowStatus::ElectroBatched,
        WorkflowStatus::ElectroCompleted,
        WorkflowStatus::AnalysisReady,
        WorkflowStatus::AnalysisInProgress,
        WorkflowStatus::AnalysisCompleted,
        WorkflowStatus::RerunRequired,
        WorkflowStatus::ReportGenerated,
        WorkflowStatus::Completed,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SampleCollected => "sample_collected",
            Self::PcrReady => "pcr_ready",
            Self::PcrBatched => "pcr_batched",
            Self::PcrCompleted => "pcr_completed",
            Self::ElectroReady => "electro_ready",
            Self::ElectroBatched => "electro_batched",
            Self::ElectroCompleted => "electro_completed",
            Self::AnalysisReady => "analysis_ready",
            Self::AnalysisInProgress => "analysis_in_progress",
            Self::AnalysisCompleted => "analysis_completed",
            Self::RerunRequired => "rerun_required",
            Self::ReportGenerated => "report_generated",
            Self::Completed => "completed",
        }
    }

    /// States reachable in one step from `self`.
    #[must_use]
    pub const fn allowed_next(self) -> &'static [WorkflowStatus] {
        use WorkflowStatus::{
            AnalysisCompleted, AnalysisInProgress, AnalysisReady, Completed, ElectroBatched,
            ElectroCompleted, ElectroReady, PcrBatched, PcrCompleted, PcrReady, RerunRequired,
            ReportGenerated, SampleCollected,
        };

        match self {
            SampleCollected => &[PcrReady, PcrBatched],
            PcrReady => &[PcrBatched],
            PcrBatched => &[PcrCompleted, RerunRequired],
            PcrCompleted => &[ElectroReady, ElectroBatched],
            ElectroReady => &[ElectroBatched],
            ElectroBatched => &[ElectroCompleted, RerunRequired],
            ElectroCompleted => &[AnalysisReady, AnalysisInProgress],
            AnalysisReady => &[AnalysisInProgress],
            AnalysisInProgress => &[AnalysisCompleted, RerunRequired],
            AnalysisCompleted => &[ReportGenerated],
            RerunRequired => &[PcrReady, ElectroReady],
            ReportGenerated => &[Completed],
            Completed => &[],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, target: WorkflowStatus) -> bool {
        self.allowed_next().contains(&target)
    }

    /// Validate a single step. Self-loops are never in the table, so they fail here too.
    pub fn check_transition(self, target: WorkflowStatus) -> Result<(), InvalidTransition> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self,
                to: target,
            })
        }
    }

    /// Whether the state can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }

    /// The stage whose open batch holds a sample in this state, if any.
    #[must_use]
    pub const fn batched_stage(self) -> Option<StageType> {
        match self {
            Self::PcrBatched => Some(StageType::Pcr),
            Self::ElectroBatched => Some(StageType::Electrophoresis),
            Self::AnalysisInProgress => Some(StageType::Analysis),
            _ => None,
        }
    }

    /// The stage whose batch a sample in this state is waiting for, if any.
    #[must_use]
    pub const fn ready_for_stage(self) -> Option<StageType> {
        match self {
            Self::PcrReady => Some(StageType::Pcr),
            Self::ElectroReady => Some(StageType::Electrophoresis),
            Self::AnalysisReady => Some(StageType::Analysis),
            _ => None,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown workflow status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for WorkflowStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A rejected `from -> to` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transition {from} -> {to} is not allowed")]
pub struct InvalidTransition {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
}

// ── Stages ───────────────────────────────────────────────────

/// A physical processing stage that can own a plate batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    Pcr,
    Electrophoresis,
    Analysis,
}

impl StageType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pcr => "pcr",
            Self::Electrophoresis => "electrophoresis",
            Self::Analysis => "analysis",
        }
    }

    /// Prefix used in batch numbers (`PCR_20261015_001`).
    #[must_use]
    pub const fn batch_prefix(self) -> &'static str {
        match self {
            Self::Pcr => "PCR",
            Self::Electrophoresis => "ELEC",
            Self::Analysis => "ANAL",
        }
    }

    /// State a sample waits in before this stage picks it up.
    #[must_use]
    pub const fn ready_status(self) -> WorkflowStatus {
        match self {
            Self::Pcr => WorkflowStatus::PcrReady,
            Self::Electrophoresis => WorkflowStatus::ElectroReady,
            Self::Analysis => WorkflowStatus::AnalysisReady,
        }
    }

    /// State of samples (and of the batch itself) while the batch is open.
    #[must_use]
    pub const fn batched_status(self) -> WorkflowStatus {
        match self {
            Self::Pcr => WorkflowStatus::PcrBatched,
            Self::Electrophoresis => WorkflowStatus::ElectroBatched,
            Self::Analysis => WorkflowStatus::AnalysisInProgress,
        }
    }

    #[must_use]
    pub const fn completed_status(self) -> WorkflowStatus {
        match self {
            Self::Pcr => WorkflowStatus::PcrCompleted,
            Self::Electrophoresis => WorkflowStatus::ElectroCompleted,
            Self::Analysis => WorkflowStatus::AnalysisCompleted,
        }
    }

    /// Resulting sample state when a batch of this stage finishes.
    #[must_use]
    pub const fn outcome_status(self, outcome: BatchOutcome) -> WorkflowStatus {
        match outcome {
            BatchOutcome::Completed => self.completed_status(),
            BatchOutcome::Failed => WorkflowStatus::RerunRequired,
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown stage type: {0}")]
pub struct UnknownStage(pub String);

impl FromStr for StageType {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pcr" => Ok(Self::Pcr),
            "electrophoresis" | "electro" => Ok(Self::Electrophoresis),
            "analysis" => Ok(Self::Analysis),
            other => Err(UnknownStage(other.to_string())),
        }
    }
}

/// How a physical batch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    Completed,
    Failed,
}

impl BatchOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
