//! The single authoritative SQLite store for the lab pipeline.
//!
//! Each long-running loop opens its own [`LabStore`] on the same database
//! file. Every multi-row mutation goes through [`LabStore::begin`], which
//! takes SQLite's write lock up front (`BEGIN IMMEDIATE`); that lock is the
//! only mutual exclusion between loops. Dropping a [`LabTx`] without calling
//! [`LabTx::commit`] rolls everything back.

mod batches;
mod error;
mod runs;
mod samples;
mod schema;
mod sqlite_security;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use strlab_analysis::{
    AnalysisResult, ComparisonReport, LocusComparison, StrProfile, Trio,
};
use strlab_types::{
    Batch, BatchId, NewBatch, NewSample, PlateLayout, RunId, Sample, SampleId,
    StageType, WorkflowStatus,
};

pub use error::{Result, StoreError};
pub use runs::{AnalysisRun, LedgerEntry, LedgerStatus, RunStatus, StoredConclusion, StoredRun};
pub use samples::{AuditEntry, NewAuditEntry};

/// How long a writer waits on another connection's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LabStore {
    db: Connection,
}

impl LabStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        sqlite_security::prepare_db_path(path)?;
        let db = Connection::open(path)?;
        Self::initialize(db)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(db: Connection) -> Result<Self> {
        db.busy_timeout(BUSY_TIMEOUT)?;
        db.execute_batch(schema::PRAGMAS)?;
        db.execute_batch(schema::SCHEMA)?;
        Ok(Self { db })
    }

    /// Start an `IMMEDIATE` transaction.
    pub fn begin(&mut self) -> Result<LabTx<'_>> {
        let tx = self
            .db
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(LabTx { tx })
    }

    /// Raw connection, for maintenance and tests.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.db
    }
}

/// A write transaction. Writes are only reachable from here.
pub struct LabTx<'a> {
    tx: Transaction<'a>,
}

impl LabTx<'_> {
    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    // ── Samples ──────────────────────────────────────────────

    pub fn insert_sample(&self, sample: &NewSample, now: DateTime<Utc>) -> Result<Sample> {
        samples::insert_sample(&self.tx, sample, now)
    }

    pub fn update_sample_status(
        &self,
        id: SampleId,
        status: WorkflowStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        samples::update_sample_status(&self.tx, id, status, now)
    }

    /// Take `id` off its open `stage` plate and clear its plate reference.
    /// Returns whether the sample was on an open plate.
    pub fn release_plate(
        &self,
        id: SampleId,
        stage: StageType,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if batches::release_sample_wells(&self.tx, id, stage)? == 0 {
            return Ok(false);
        }
        samples::set_sample_plate(&self.tx, id, None, now)?;
        Ok(true)
    }

    pub fn archive_sample(&self, id: SampleId, now: DateTime<Utc>) -> Result<()> {
        samples::set_sample_archived(&self.tx, id, now)
    }

    pub fn insert_audit(&self, entry: &NewAuditEntry<'_>) -> Result<i64> {
        samples::insert_audit(&self.tx, entry)
    }

    // ── Batches ──────────────────────────────────────────────

    /// Insert a batch under the next free batch number for `date`.
    pub fn insert_batch(
        &self,
        batch: &NewBatch,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Batch> {
        let number = batches::next_batch_number(&self.tx, batch.stage, date)?;
        batches::insert_batch(&self.tx, batch, &number, now)
    }

    pub fn close_batch(
        &self,
        id: BatchId,
        status: WorkflowStatus,
        layout: &PlateLayout,
        now: DateTime<Utc>,
    ) -> Result<()> {
        batches::close_batch(&self.tx, id, status, layout, now)
    }

    // ── Runs and ledger ──────────────────────────────────────

    pub fn begin_run(&self, path: &str, fingerprint: &str, now: DateTime<Utc>) -> Result<RunId> {
        runs::begin_run(&self.tx, path, fingerprint, now)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_results(
        &self,
        run_id: RunId,
        path: &str,
        fingerprint: &str,
        result: &AnalysisResult,
        trio: &Trio<'_>,
        report: &ComparisonReport,
        now: DateTime<Utc>,
    ) -> Result<StoredRun> {
        runs::record_results(&self.tx, run_id, path, fingerprint, result, trio, report, now)
    }

    pub fn fail_run(
        &self,
        run_id: Option<RunId>,
        path: &str,
        fingerprint: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        runs::fail_run(&self.tx, run_id, path, fingerprint, reason, now)
    }

    pub fn link_duplicate(
        &self,
        path: &str,
        fingerprint: &str,
        run_id: RunId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        runs::link_duplicate(&self.tx, path, fingerprint, run_id, now)
    }

    pub fn mark_pending_as_error(
        &self,
        path: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        runs::mark_pending_as_error(&self.tx, path, reason, now)
    }
}

/// Queries shared by the store and an open transaction, so a transaction
/// sees its own uncommitted writes.
pub trait LabRead {
    fn conn(&self) -> &Connection;

    fn get_sample(&self, id: SampleId) -> Result<Option<Sample>> {
        samples::get_sample(self.conn(), id)
    }

    fn sample_by_lab_number(&self, lab_number: &str) -> Result<Option<Sample>> {
        samples::sample_by_lab_number(self.conn(), lab_number)
    }

    /// Unarchived samples in `status`, oldest intake first.
    fn samples_by_status(&self, status: WorkflowStatus) -> Result<Vec<Sample>> {
        samples::samples_by_status(self.conn(), status)
    }

    fn samples_in_case(&self, case_number: &str) -> Result<Vec<Sample>> {
        samples::samples_in_case(self.conn(), case_number)
    }

    fn sample_history(&self, id: SampleId) -> Result<Vec<AuditEntry>> {
        samples::sample_history(self.conn(), id)
    }

    fn get_batch(&self, id: BatchId) -> Result<Option<Batch>> {
        batches::get_batch(self.conn(), id)
    }

    fn batch_sample_ids(&self, id: BatchId) -> Result<Vec<SampleId>> {
        batches::batch_sample_ids(self.conn(), id)
    }

    fn next_batch_number(&self, stage: StageType, date: NaiveDate) -> Result<String> {
        batches::next_batch_number(self.conn(), stage, date)
    }

    fn get_run(&self, id: RunId) -> Result<Option<AnalysisRun>> {
        runs::get_run(self.conn(), id)
    }

    fn run_by_fingerprint(&self, fingerprint: &str) -> Result<Option<AnalysisRun>> {
        runs::run_by_fingerprint(self.conn(), fingerprint)
    }

    fn ledger_entry(&self, path: &str, fingerprint: &str) -> Result<Option<LedgerEntry>> {
        runs::ledger_entry(self.conn(), path, fingerprint)
    }

    fn ledger_entries_with_status(&self, status: LedgerStatus) -> Result<Vec<LedgerEntry>> {
        runs::ledger_entries_with_status(self.conn(), status)
    }

    fn conclusion_for_run(&self, run_id: RunId) -> Result<Option<StoredConclusion>> {
        runs::conclusion_for_run(self.conn(), run_id)
    }

    /// The run's conclusion and linked samples, once it is processed.
    fn stored_run(&self, run_id: RunId) -> Result<Option<StoredRun>> {
        runs::stored_run(self.conn(), run_id)
    }

    fn locus_comparisons(&self, run_id: RunId) -> Result<Vec<LocusComparison>> {
        runs::locus_comparisons(self.conn(), run_id)
    }

    fn str_profile(&self, sample_id: SampleId) -> Result<StrProfile> {
        runs::str_profile(self.conn(), sample_id)
    }
}

impl LabRead for LabStore {
    fn conn(&self) -> &Connection {
        &self.db
    }
}

impl LabRead for LabTx<'_> {
    fn conn(&self) -> &Connection {
        &self.tx
    }
}
