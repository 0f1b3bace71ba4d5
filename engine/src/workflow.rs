//! Sample and batch state transitions.
//!
//! Every public operation runs in one store transaction. Validation happens
//! before any write, so a rejected request leaves nothing behind, and a
//! storage failure rolls back everything the call wrote. Events go out only
//! after the transaction commits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use strlab_store::{AuditEntry, LabRead, LabStore, LabTx, NewAuditEntry, StoredRun};
use strlab_types::{
    Batch, BatchId, BatchOutcome, NewBatch, NewSample, PlateAssignment, RunId, Sample,
    SampleId, StageType, WellStatus, WorkflowStatus,
};

use crate::assigner::{BatchAssigner, BatchPolicy, layout_for};
use crate::clock::Clock;
use crate::error::{Missing, WorkflowError};
use crate::events::{EventSink, LabEvent};

/// Actor recorded for transitions made by [`WorkflowEngine::progress_ready_samples`].
pub const SWEEP_ACTOR: &str = "sweep";
/// Actor recorded for transitions made in reaction to a stored analysis run.
pub const INGESTION_ACTOR: &str = "ingestion";

/// Stages the sweep promotes on its own, in the order it runs them.
const AUTO_ADVANCE: [(WorkflowStatus, WorkflowStatus); 3] = [
    (WorkflowStatus::SampleCollected, WorkflowStatus::PcrReady),
    (WorkflowStatus::PcrCompleted, WorkflowStatus::ElectroReady),
    (WorkflowStatus::ElectroCompleted, WorkflowStatus::AnalysisReady),
];

/// Stages the sweep forms plate batches for.
const BATCHED_STAGES: [StageType; 2] = [StageType::Pcr, StageType::Electrophoresis];

/// Who asked for a transition, and anything worth keeping with the audit row.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionContext {
    pub actor: String,
    pub details: Value,
}

impl TransitionContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            details: Value::Object(Map::new()),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Add one key to the details object. Non-object details are kept under `"details"`.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        let mut map = match std::mem::take(&mut self.details) {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("details".to_string(), other);
                map
            }
        };
        map.insert(key.to_string(), value.into());
        self.details = Value::Object(map);
        self
    }
}

/// Outcome of a bulk request: what changed and what was refused.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub updated: Vec<Sample>,
    pub rejected: Vec<(SampleId, WorkflowError)>,
}

/// Outcome of [`WorkflowEngine::complete_batch`].
#[derive(Debug)]
pub struct BatchCompletion {
    pub batch: Batch,
    pub updated: Vec<Sample>,
    /// Members that could not take the outcome status, e.g. archived samples.
    pub skipped: Vec<(SampleId, WorkflowError)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub promoted: usize,
    pub batches: Vec<BatchId>,
    pub analysis_started: usize,
}

impl SweepReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.promoted == 0 && self.batches.is_empty() && self.analysis_started == 0
    }
}

pub struct WorkflowEngine {
    store: LabStore,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    assigner: BatchAssigner,
    auto_advance: bool,
}

impl WorkflowEngine {
    pub fn new(store: LabStore, clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            clock,
            events,
            assigner: BatchAssigner::default(),
            auto_advance: true,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: BatchPolicy) -> Self {
        self.assigner = BatchAssigner::new(policy);
        self
    }

    #[must_use]
    pub fn with_auto_advance(mut self, enabled: bool) -> Self {
        self.auto_advance = enabled;
        self
    }

    #[must_use]
    pub fn store(&self) -> &LabStore {
        &self.store
    }

    #[must_use]
    pub fn policy(&self) -> BatchPolicy {
        self.assigner.policy()
    }

    /// Intake a sample at `sample_collected`.
    pub fn register_sample(&mut self, sample: &NewSample) -> Result<Sample, WorkflowError> {
        let now = self.clock.now();
        let tx = self.store.begin()?;
        let stored = tx.insert_sample(sample, now)?;
        tx.commit()?;
        tracing::info!(
            sample_id = %stored.id,
            lab_number = %stored.lab_number,
            case_number = %stored.case_number,
            role = %stored.role.as_str(),
            "Registered sample"
        );
        Ok(stored)
    }

    /// Archived samples keep their status but no longer move.
    pub fn archive_sample(&mut self, id: SampleId) -> Result<Sample, WorkflowError> {
        let now = self.clock.now();
        let tx = self.store.begin()?;
        let mut sample = tx
            .get_sample(id)?
            .ok_or(WorkflowError::NotFound(Missing::Sample(id)))?;
        if !sample.archived {
            tx.archive_sample(id, now)?;
            sample.archived = true;
            sample.updated_at = now;
        }
        tx.commit()?;
        tracing::info!(sample_id = %id, "Archived sample");
        Ok(sample)
    }

    pub fn transition(
        &mut self,
        id: SampleId,
        target: WorkflowStatus,
        ctx: &TransitionContext,
    ) -> Result<Sample, WorkflowError> {
        let now = self.clock.now();
        let tx = self.store.begin()?;
        let sample = load_for_transition(&tx, id, target)?;
        let sample = leave_open_batch(&tx, sample, now)?;
        let (updated, event) = write_transition(&tx, sample, target, ctx, now)?;
        tx.commit()?;
        self.events.emit(event);
        Ok(updated)
    }

    /// Move every id to `target` in one transaction. Per-sample rejections
    /// are reported without stopping the rest; a storage failure undoes all.
    pub fn batch_update_state(
        &mut self,
        ids: &[SampleId],
        target: WorkflowStatus,
        ctx: &TransitionContext,
    ) -> Result<BulkReport, WorkflowError> {
        let now = self.clock.now();
        let tx = self.store.begin()?;
        let mut report = BulkReport::default();
        let mut events = Vec::with_capacity(ids.len());

        for &id in ids {
            match load_for_transition(&tx, id, target) {
                Ok(sample) => {
                    let sample = leave_open_batch(&tx, sample, now)?;
                    let (updated, event) = write_transition(&tx, sample, target, ctx, now)?;
                    report.updated.push(updated);
                    events.push(event);
                }
                Err(err) if err.is_rejection() => report.rejected.push((id, err)),
                Err(err) => return Err(err),
            }
        }

        tx.commit()?;
        if !report.rejected.is_empty() {
            tracing::warn!(
                target_status = %target,
                updated = report.updated.len(),
                rejected = report.rejected.len(),
                "Bulk transition rejected some samples"
            );
        }
        self.emit_all(events);
        Ok(report)
    }

    /// Close an open batch with `outcome`. Members move to the stage's
    /// completed status, or to `rerun_required` on failure, and the batch
    /// takes the same status.
    pub fn complete_batch(
        &mut self,
        batch_id: BatchId,
        stage: StageType,
        outcome: BatchOutcome,
        ctx: &TransitionContext,
    ) -> Result<BatchCompletion, WorkflowError> {
        let now = self.clock.now();
        let tx = self.store.begin()?;
        let mut batch = tx
            .get_batch(batch_id)?
            .ok_or(WorkflowError::NotFound(Missing::Batch(batch_id)))?;
        if batch.stage != stage {
            return Err(WorkflowError::StageMismatch {
                batch_id,
                requested: stage,
                actual: batch.stage,
            });
        }
        if !batch.is_open() {
            return Err(WorkflowError::BatchClosed(batch_id));
        }

        let target = stage.outcome_status(outcome);
        let ctx = ctx
            .clone()
            .with_field("batch_number", batch.batch_number.as_str())
            .with_field("outcome", outcome.as_str());
        let mut updated = Vec::new();
        let mut skipped = Vec::new();
        let mut events = Vec::new();

        for sample_id in tx.batch_sample_ids(batch_id)? {
            if !still_on_plate(&tx, sample_id, batch_id)? {
                tracing::info!(
                    batch_id = %batch_id,
                    sample_id = %sample_id,
                    "Batch member already left the plate"
                );
                continue;
            }
            match load_for_transition(&tx, sample_id, target) {
                Ok(sample) => {
                    let (sample, event) = write_transition(&tx, sample, target, &ctx, now)?;
                    updated.push(sample);
                    events.push(event);
                }
                Err(err) if err.is_rejection() => {
                    tracing::warn!(
                        batch_id = %batch_id,
                        sample_id = %sample_id,
                        error = %err,
                        "Skipping batch member"
                    );
                    skipped.push((sample_id, err));
                }
                Err(err) => return Err(err),
            }
        }

        batch.layout.set_all_status(match outcome {
            BatchOutcome::Completed => WellStatus::Completed,
            BatchOutcome::Failed => WellStatus::Failed,
        });
        tx.close_batch(batch_id, target, &batch.layout, now)?;
        tx.commit()?;
        batch.status = target;
        batch.updated_at = now;

        tracing::info!(
            batch_id = %batch_id,
            batch_number = %batch.batch_number,
            stage = %stage,
            outcome = %outcome,
            samples = updated.len(),
            "Completed batch"
        );
        self.emit_all(events);
        self.events.emit(LabEvent::BatchCompleted {
            batch_id,
            stage,
            outcome,
        });
        Ok(BatchCompletion {
            batch,
            updated,
            skipped,
        })
    }

    /// Put exactly `ids` on a new batch, in the given order. Any sample that
    /// cannot move to the stage's batched status rejects the whole batch.
    pub fn create_batch(
        &mut self,
        stage: StageType,
        ids: &[SampleId],
        ctx: &TransitionContext,
    ) -> Result<Batch, WorkflowError> {
        let layout = layout_for(ids)?;
        let now = self.clock.now();
        let tx = self.store.begin()?;
        let target = stage.batched_status();
        let mut members = Vec::with_capacity(ids.len());
        for &id in ids {
            members.push(load_for_transition(&tx, id, target)?);
        }

        let (batch, events) = place_batch(&tx, NewBatch { stage, layout }, members, ctx, now)?;
        tx.commit()?;
        tracing::info!(
            batch_id = %batch.id,
            batch_number = %batch.batch_number,
            samples = batch.layout.len(),
            "Created batch"
        );
        self.emit_all(events);
        Ok(batch)
    }

    /// One tick of the sweep: auto-advance, then batching, then analysis start.
    /// Safe to re-run; a tick that fails midway leaves earlier steps committed.
    /// A stage that cannot form its batch is logged and retried next tick.
    pub fn progress_ready_samples(&mut self) -> Result<SweepReport, WorkflowError> {
        let ctx = TransitionContext::new(SWEEP_ACTOR);
        let mut report = SweepReport::default();

        if self.auto_advance {
            for (from, to) in AUTO_ADVANCE {
                report.promoted += self.promote_all(from, to, &ctx)?;
            }
        }

        for stage in BATCHED_STAGES {
            loop {
                match self.form_batch(stage, &ctx) {
                    Ok(Some(batch_id)) => report.batches.push(batch_id),
                    Ok(None) => break,
                    Err(err) => {
                        tracing::error!(
                            stage = %stage,
                            error = %err,
                            "Sweep could not form batch"
                        );
                        break;
                    }
                }
            }
        }

        report.analysis_started = self.promote_all(
            WorkflowStatus::AnalysisReady,
            WorkflowStatus::AnalysisInProgress,
            &ctx,
        )?;

        if !report.is_empty() {
            tracing::info!(
                promoted = report.promoted,
                batches = report.batches.len(),
                analysis_started = report.analysis_started,
                "Sweep progressed samples"
            );
        }
        Ok(report)
    }

    /// Advance the samples named by a stored run to `analysis_completed`,
    /// passing through `analysis_in_progress` when they were still ready.
    /// Samples already completed are left alone.
    pub fn apply_analysis_result(&mut self, run: &StoredRun) -> Result<BulkReport, WorkflowError> {
        let now = self.clock.now();
        let ctx = TransitionContext::new(INGESTION_ACTOR).with_details(json!({
            "run_id": run.run_id.value(),
            "conclusion": run.conclusion.as_str(),
        }));
        let tx = self.store.begin()?;
        let mut report = BulkReport::default();
        let mut events = Vec::new();

        for &id in &run.sample_ids {
            let path: &[WorkflowStatus] = match tx.get_sample(id)? {
                Some(sample) if sample.status == WorkflowStatus::AnalysisCompleted => continue,
                Some(sample) if sample.status == WorkflowStatus::AnalysisReady => &[
                    WorkflowStatus::AnalysisInProgress,
                    WorkflowStatus::AnalysisCompleted,
                ],
                _ => &[WorkflowStatus::AnalysisCompleted],
            };

            let mut last = None;
            let mut rejected = None;
            for &target in path {
                match load_for_transition(&tx, id, target) {
                    Ok(sample) => {
                        let sample = leave_open_batch(&tx, sample, now)?;
                        let (sample, event) = write_transition(&tx, sample, target, &ctx, now)?;
                        events.push(event);
                        last = Some(sample);
                    }
                    Err(err) if err.is_rejection() => {
                        rejected = Some(err);
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
            match (rejected, last) {
                (Some(err), _) => report.rejected.push((id, err)),
                (None, Some(sample)) => report.updated.push(sample),
                (None, None) => {}
            }
        }

        // A sample rejected on its second step keeps the first one.
        tx.commit()?;
        for (id, err) in &report.rejected {
            tracing::warn!(
                run_id = %run.run_id,
                sample_id = %id,
                error = %err,
                "Analysis result could not advance sample"
            );
        }
        self.emit_all(events);
        Ok(report)
    }

    /// Re-apply an already stored run to the samples still waiting on
    /// analysis. Covers a result whose samples were never advanced, e.g.
    /// when the process stopped between storing and applying it.
    pub fn resume_analysis_result(&mut self, run_id: RunId) -> Result<BulkReport, WorkflowError> {
        let Some(mut run) = self.store.stored_run(run_id)? else {
            return Ok(BulkReport::default());
        };
        let mut waiting = Vec::with_capacity(run.sample_ids.len());
        for id in run.sample_ids {
            if let Some(sample) = self.store.get_sample(id)?
                && matches!(
                    sample.status,
                    WorkflowStatus::AnalysisReady | WorkflowStatus::AnalysisInProgress
                )
                && !sample.archived
            {
                waiting.push(id);
            }
        }
        if waiting.is_empty() {
            return Ok(BulkReport::default());
        }
        tracing::info!(
            run_id = %run_id,
            samples = waiting.len(),
            "Resuming stored analysis result"
        );
        run.sample_ids = waiting;
        self.apply_analysis_result(&run)
    }

    /// Audit trail of `id`, oldest first.
    pub fn history(&self, id: SampleId) -> Result<Vec<AuditEntry>, WorkflowError> {
        if self.store.get_sample(id)?.is_none() {
            return Err(WorkflowError::NotFound(Missing::Sample(id)));
        }
        Ok(self.store.sample_history(id)?)
    }

    fn promote_all(
        &mut self,
        from: WorkflowStatus,
        to: WorkflowStatus,
        ctx: &TransitionContext,
    ) -> Result<usize, WorkflowError> {
        let now = self.clock.now();
        let tx = self.store.begin()?;
        let mut events = Vec::new();
        for sample in tx.samples_by_status(from)? {
            let id = sample.id;
            match check_movable(&sample, to) {
                Ok(()) => {
                    let (_, event) = write_transition(&tx, sample, to, ctx, now)?;
                    events.push(event);
                }
                Err(err) => {
                    tracing::warn!(sample_id = %id, error = %err, "Sweep skipped sample");
                }
            }
        }
        tx.commit()?;
        let promoted = events.len();
        self.emit_all(events);
        Ok(promoted)
    }

    /// Form at most one batch for `stage` if enough samples are ready.
    fn form_batch(
        &mut self,
        stage: StageType,
        ctx: &TransitionContext,
    ) -> Result<Option<BatchId>, WorkflowError> {
        let now = self.clock.now();
        let tx = self.store.begin()?;
        let candidates = tx.samples_by_status(stage.ready_status())?;
        if !self.assigner.policy().is_ready(candidates.len()) {
            return Ok(None);
        }

        let plan = self.assigner.assign(stage, &candidates)?;
        let placed = plan.batch.layout.sample_ids();
        let members: Vec<Sample> = candidates
            .into_iter()
            .filter(|sample| placed.contains(&sample.id))
            .collect();
        let (batch, events) = place_batch(&tx, plan.batch, members, ctx, now)?;
        tx.commit()?;

        tracing::info!(
            batch_id = %batch.id,
            batch_number = %batch.batch_number,
            stage = %stage,
            samples = batch.layout.len(),
            overflow = plan.overflow.len(),
            "Formed batch"
        );
        self.emit_all(events);
        Ok(Some(batch.id))
    }

    fn emit_all(&self, events: Vec<LabEvent>) {
        for event in events {
            self.events.emit(event);
        }
    }
}

/// Read `id` and check it may move to `target`. Writes nothing.
fn load_for_transition(
    tx: &LabTx<'_>,
    id: SampleId,
    target: WorkflowStatus,
) -> Result<Sample, WorkflowError> {
    let sample = tx
        .get_sample(id)?
        .ok_or(WorkflowError::NotFound(Missing::Sample(id)))?;
    check_movable(&sample, target)?;
    Ok(sample)
}

fn check_movable(sample: &Sample, target: WorkflowStatus) -> Result<(), WorkflowError> {
    if sample.archived {
        return Err(WorkflowError::Archived(sample.id));
    }
    sample
        .status
        .check_transition(target)
        .map_err(|err| WorkflowError::InvalidTransition {
            sample_id: sample.id,
            from: err.from,
            to: err.to,
        })
}

/// A sample moved off a batched status outside [`WorkflowEngine::complete_batch`]
/// gives up its well; the rest of the batch stays open.
fn leave_open_batch(
    tx: &LabTx<'_>,
    mut sample: Sample,
    now: DateTime<Utc>,
) -> Result<Sample, WorkflowError> {
    let Some(stage) = sample.status.batched_stage() else {
        return Ok(sample);
    };
    if tx.release_plate(sample.id, stage, now)? {
        tracing::info!(
            sample_id = %sample.id,
            batch_id = ?sample.plate.map(|plate| plate.batch_id.value()),
            stage = %stage,
            "Sample left its open batch"
        );
        sample.plate = None;
    }
    Ok(sample)
}

/// Unknown samples count as on the plate so the transition reports them.
fn still_on_plate(
    tx: &LabTx<'_>,
    sample_id: SampleId,
    batch_id: BatchId,
) -> Result<bool, WorkflowError> {
    Ok(match tx.get_sample(sample_id)? {
        Some(sample) => sample.plate.map(|plate| plate.batch_id) == Some(batch_id),
        None => true,
    })
}

/// Apply a checked transition and its audit row.
fn write_transition(
    tx: &LabTx<'_>,
    mut sample: Sample,
    target: WorkflowStatus,
    ctx: &TransitionContext,
    now: DateTime<Utc>,
) -> Result<(Sample, LabEvent), WorkflowError> {
    let from = sample.status;
    tx.update_sample_status(sample.id, target, now)?;
    tx.insert_audit(&NewAuditEntry {
        sample_id: sample.id,
        from,
        to: target,
        actor: &ctx.actor,
        context: &ctx.details,
        at: now,
    })?;
    tracing::debug!(
        sample_id = %sample.id,
        lab_number = %sample.lab_number,
        from = %from,
        to = %target,
        actor = %ctx.actor,
        "Sample transition"
    );

    sample.status = target;
    sample.updated_at = now;
    let event = LabEvent::SampleStatusChanged {
        sample_id: sample.id,
        lab_number: sample.lab_number.clone(),
        from,
        to: target,
    };
    Ok((sample, event))
}

/// Insert `batch` and move its already-checked members to the batched status.
fn place_batch(
    tx: &LabTx<'_>,
    batch: NewBatch,
    members: Vec<Sample>,
    ctx: &TransitionContext,
    now: DateTime<Utc>,
) -> Result<(Batch, Vec<LabEvent>), WorkflowError> {
    let stored = tx.insert_batch(&batch, now.date_naive(), now)?;
    let target = batch.stage.batched_status();
    let mut events = Vec::with_capacity(members.len());

    for mut sample in members {
        let Some(well) = stored.layout.well_of(sample.id) else {
            continue;
        };
        let ctx = ctx
            .clone()
            .with_field("batch_number", stored.batch_number.as_str())
            .with_field("well", well.to_string());
        sample.plate = Some(PlateAssignment {
            batch_id: stored.id,
            well,
        });
        let (_, event) = write_transition(tx, sample, target, &ctx, now)?;
        events.push(event);
    }
    Ok((stored, events))
}

#[cfg(test)]
mod tests;
