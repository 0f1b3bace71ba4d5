//! Fire-and-forget notifications for collaborators outside the core.
//!
//! Events are emitted only after the transaction that caused them commits. A
//! sink must never block or fail the caller.

use serde::Serialize;
use strlab_analysis::Conclusion;
use strlab_types::{BatchId, BatchOutcome, RunId, SampleId, StageType, WorkflowStatus};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum LabEvent {
    #[serde(rename = "sample.status_changed")]
    SampleStatusChanged {
        sample_id: SampleId,
        lab_number: String,
        from: WorkflowStatus,
        to: WorkflowStatus,
    },
    #[serde(rename = "batch.completed")]
    BatchCompleted {
        batch_id: BatchId,
        stage: StageType,
        outcome: BatchOutcome,
    },
    #[serde(rename = "analysis.conclusion_ready")]
    ConclusionReady {
        run_id: RunId,
        conclusion: Conclusion,
        probability: Option<f64>,
    },
}

impl LabEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SampleStatusChanged { .. } => "sample.status_changed",
            Self::BatchCompleted { .. } => "batch.completed",
            Self::ConclusionReady { .. } => "analysis.conclusion_ready",
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: LabEvent);
}

/// Writes one structured log line per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: LabEvent) {
        match &event {
            LabEvent::SampleStatusChanged {
                sample_id,
                lab_number,
                from,
                to,
            } => tracing::info!(
                event = event.name(),
                sample_id = %sample_id,
                lab_number = %lab_number,
                from = %from,
                to = %to,
            ),
            LabEvent::BatchCompleted {
                batch_id,
                stage,
                outcome,
            } => tracing::info!(
                event = event.name(),
                batch_id = %batch_id,
                stage = %stage,
                outcome = %outcome,
            ),
            LabEvent::ConclusionReady {
                run_id,
                conclusion,
                probability,
            } => tracing::info!(
                event = event.name(),
                run_id = %run_id,
                conclusion = %conclusion,
                probability = ?probability,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: LabEvent) {}
}

/// Forwards events to an unbounded tokio channel, e.g. for a notifier task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LabEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LabEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: LabEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Event receiver dropped; discarding event");
        }
    }
}
