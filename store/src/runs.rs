//! Analysis runs, their derived rows, and the processing ledger.
//!
//! The ledger is keyed by `(path, fingerprint)`. A run is keyed by fingerprint
//! alone, so the same bytes under two paths share one run.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use strlab_analysis::{
    Allele, AllelePair, AnalysisResult, ComparisonReport, Conclusion, LocusComparison,
    MaternalCheck, RunMetadata, StrProfile, Trio,
};
use strlab_types::{RunId, SampleId};

use crate::error::{Result, StoreError};
use crate::samples::sample_by_lab_number;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Processed,
    Error,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Error => "error",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processed" => Ok(Self::Processed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown run status {other:?}")),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Pending,
    Stored,
    Error,
}

impl LedgerStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Stored => "stored",
            Self::Error => "error",
        }
    }
}

impl FromStr for LedgerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "stored" => Ok(Self::Stored),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown ledger status {other:?}")),
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: RunId,
    pub source_path: String,
    pub fingerprint: String,
    pub status: RunStatus,
    pub error: Option<String>,
    pub metadata: RunMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub path: String,
    pub fingerprint: String,
    pub status: LedgerStatus,
    pub run_id: Option<RunId>,
    pub error: Option<String>,
    pub attempts: u32,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredConclusion {
    pub run_id: RunId,
    pub child_sample: String,
    pub father_sample: String,
    pub loci_compared: u32,
    pub matching_loci: u32,
    pub excluding_loci: u32,
    pub conclusion: Conclusion,
    pub probability: Option<f64>,
    pub maternal: Option<MaternalCheck>,
    pub created_at: DateTime<Utc>,
}

/// What a successful store hands back to the workflow side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    pub run_id: RunId,
    pub conclusion: Conclusion,
    pub probability: Option<f64>,
    pub case_number: Option<String>,
    /// Registered samples named in the file, in file order.
    pub sample_ids: Vec<SampleId>,
}

fn parse_col<T: FromStr>(table: &'static str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value.parse().map_err(|e| StoreError::corrupt(table, e))
}

// ── Reads ────────────────────────────────────────────────────

const RUN_COLUMNS: &str = "id, source_path, fingerprint, status, error, kit, instrument, run_date, \
                           case_number, created_at, updated_at";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<(AnalysisRun, String)> {
    let status: String = row.get(3)?;
    Ok((
        AnalysisRun {
            id: RunId::new(row.get(0)?),
            source_path: row.get(1)?,
            fingerprint: row.get(2)?,
            status: RunStatus::Pending,
            error: row.get(4)?,
            metadata: RunMetadata {
                kit: row.get(5)?,
                instrument: row.get(6)?,
                run_date: row.get(7)?,
                case_number: row.get(8)?,
            },
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        },
        status,
    ))
}

fn finish_run_row(row: Option<(AnalysisRun, String)>) -> Result<Option<AnalysisRun>> {
    row.map(|(mut run, status)| {
        run.status = parse_col("analysis_runs", &status)?;
        Ok(run)
    })
    .transpose()
}

pub(crate) fn get_run(conn: &Connection, id: RunId) -> Result<Option<AnalysisRun>> {
    let row = conn
        .query_row(
            &format!("SELECT {RUN_COLUMNS} FROM analysis_runs WHERE id = ?1"),
            params![id.value()],
            run_from_row,
        )
        .optional()?;
    finish_run_row(row)
}

pub(crate) fn run_by_fingerprint(conn: &Connection, fingerprint: &str) -> Result<Option<AnalysisRun>> {
    let row = conn
        .query_row(
            &format!("SELECT {RUN_COLUMNS} FROM analysis_runs WHERE fingerprint = ?1"),
            params![fingerprint],
            run_from_row,
        )
        .optional()?;
    finish_run_row(row)
}

const LEDGER_COLUMNS: &str =
    "path, fingerprint, status, run_id, error, attempts, first_seen_at, updated_at";

fn ledger_from_row(row: &Row<'_>) -> rusqlite::Result<(LedgerEntry, String)> {
    let status: String = row.get(2)?;
    Ok((
        LedgerEntry {
            path: row.get(0)?,
            fingerprint: row.get(1)?,
            status: LedgerStatus::Pending,
            run_id: row.get::<_, Option<i64>>(3)?.map(RunId::new),
            error: row.get(4)?,
            attempts: row.get(5)?,
            first_seen_at: row.get(6)?,
            updated_at: row.get(7)?,
        },
        status,
    ))
}

fn finish_ledger_row((mut entry, status): (LedgerEntry, String)) -> Result<LedgerEntry> {
    entry.status = parse_col("processing_ledger", &status)?;
    Ok(entry)
}

pub(crate) fn ledger_entry(
    conn: &Connection,
    path: &str,
    fingerprint: &str,
) -> Result<Option<LedgerEntry>> {
    conn.query_row(
        &format!("SELECT {LEDGER_COLUMNS} FROM processing_ledger WHERE path = ?1 AND fingerprint = ?2"),
        params![path, fingerprint],
        ledger_from_row,
    )
    .optional()?
    .map(finish_ledger_row)
    .transpose()
}

pub(crate) fn ledger_entries_with_status(
    conn: &Connection,
    status: LedgerStatus,
) -> Result<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LEDGER_COLUMNS} FROM processing_ledger WHERE status = ?1 ORDER BY updated_at ASC, path ASC"
    ))?;
    let rows = stmt.query_map(params![status.as_str()], ledger_from_row)?;
    rows.map(|row| finish_ledger_row(row?)).collect()
}

pub(crate) fn conclusion_for_run(conn: &Connection, run_id: RunId) -> Result<Option<StoredConclusion>> {
    let row = conn
        .query_row(
            "SELECT child_sample, father_sample, loci_compared, matching_loci, excluding_loci,
                    conclusion, probability, maternal_loci_compared, maternal_matching_loci,
                    maternal_match_rate, created_at
             FROM paternity_conclusions WHERE run_id = ?1",
            params![run_id.value()],
            |row| {
                let maternal = match (
                    row.get::<_, Option<u32>>(7)?,
                    row.get::<_, Option<u32>>(8)?,
                    row.get::<_, Option<f64>>(9)?,
                ) {
                    (Some(loci_compared), Some(matching_loci), Some(match_rate)) => {
                        Some(MaternalCheck {
                            loci_compared,
                            matching_loci,
                            match_rate,
                        })
                    }
                    _ => None,
                };
                Ok((
                    StoredConclusion {
                        run_id,
                        child_sample: row.get(0)?,
                        father_sample: row.get(1)?,
                        loci_compared: row.get(2)?,
                        matching_loci: row.get(3)?,
                        excluding_loci: row.get(4)?,
                        conclusion: Conclusion::Inconclusive,
                        probability: row.get(6)?,
                        maternal,
                        created_at: row.get(10)?,
                    },
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    row.map(|(mut stored, conclusion)| {
        stored.conclusion = parse_col("paternity_conclusions", &conclusion)?;
        Ok(stored)
    })
    .transpose()
}

/// Rebuild what [`record_results`] returned for a processed run. Samples
/// registered since then are included.
pub(crate) fn stored_run(conn: &Connection, run_id: RunId) -> Result<Option<StoredRun>> {
    let Some(conclusion) = conclusion_for_run(conn, run_id)? else {
        return Ok(None);
    };
    let case_number: Option<String> = conn
        .query_row(
            "SELECT case_number FROM analysis_runs WHERE id = ?1",
            params![run_id.value()],
            |row| row.get(0),
        )
        .optional()?
        .flatten();

    let mut stmt = conn.prepare(
        "SELECT s.id FROM sample_results r
         JOIN samples s ON s.lab_number = r.lab_number
         WHERE r.run_id = ?1
         ORDER BY r.id ASC",
    )?;
    let mut sample_ids = Vec::new();
    for id in stmt.query_map(params![run_id.value()], |row| row.get::<_, i64>(0))? {
        let id = SampleId::new(id?);
        if !sample_ids.contains(&id) {
            sample_ids.push(id);
        }
    }

    Ok(Some(StoredRun {
        run_id,
        conclusion: conclusion.conclusion,
        probability: conclusion.probability,
        case_number,
        sample_ids,
    }))
}

fn pair_from_cols(table: &'static str, a: &str, b: &str) -> Result<AllelePair> {
    let allele = |v: &str| Allele::new(v).map_err(|e| StoreError::corrupt(table, e));
    Ok(AllelePair::new(allele(a)?, allele(b)?))
}

pub(crate) fn locus_comparisons(conn: &Connection, run_id: RunId) -> Result<Vec<LocusComparison>> {
    const TABLE: &str = "locus_comparisons";
    let mut stmt = conn.prepare(
        "SELECT locus, child_allele_1, child_allele_2, father_allele_1, father_allele_2,
                mother_allele_1, mother_allele_2, verdict
         FROM locus_comparisons WHERE run_id = ?1 ORDER BY locus ASC",
    )?;
    let rows = stmt.query_map(params![run_id.value()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            [row.get::<_, String>(1)?, row.get::<_, String>(2)?],
            [row.get::<_, String>(3)?, row.get::<_, String>(4)?],
            (row.get::<_, Option<String>>(5)?, row.get::<_, Option<String>>(6)?),
            row.get::<_, String>(7)?,
        ))
    })?;

    rows.map(|row| {
        let (locus, [c1, c2], [f1, f2], mother, verdict) = row?;
        let mother = match mother {
            (Some(m1), Some(m2)) => Some(pair_from_cols(TABLE, &m1, &m2)?),
            _ => None,
        };
        Ok(LocusComparison {
            locus,
            child: pair_from_cols(TABLE, &c1, &c2)?,
            alleged_father: pair_from_cols(TABLE, &f1, &f2)?,
            mother,
            verdict: parse_col(TABLE, &verdict)?,
        })
    })
    .collect()
}

pub(crate) fn str_profile(conn: &Connection, sample_id: SampleId) -> Result<StrProfile> {
    let mut stmt =
        conn.prepare("SELECT locus, allele_1, allele_2 FROM str_profiles WHERE sample_id = ?1")?;
    let rows = stmt.query_map(params![sample_id.value()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    let mut profile = StrProfile::new();
    for row in rows {
        let (locus, a, b) = row?;
        profile.insert(&locus, pair_from_cols("str_profiles", &a, &b)?);
    }
    Ok(profile)
}

// ── Writes ───────────────────────────────────────────────────

/// Open (or reopen) the run for `fingerprint` and mark the ledger entry pending.
pub(crate) fn begin_run(
    conn: &Connection,
    path: &str,
    fingerprint: &str,
    now: DateTime<Utc>,
) -> Result<RunId> {
    let run_id = match run_by_fingerprint(conn, fingerprint)? {
        Some(run) => {
            conn.execute(
                "UPDATE analysis_runs
                 SET status = ?1, error = NULL, source_path = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![RunStatus::Pending.as_str(), path, now, run.id.value()],
            )?;
            run.id
        }
        None => {
            conn.execute(
                "INSERT INTO analysis_runs (source_path, fingerprint, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![path, fingerprint, RunStatus::Pending.as_str(), now],
            )?;
            RunId::new(conn.last_insert_rowid())
        }
    };

    conn.execute(
        "INSERT INTO processing_ledger
             (path, fingerprint, status, run_id, error, attempts, first_seen_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, NULL, 1, ?5, ?5)
         ON CONFLICT(path, fingerprint) DO UPDATE SET
             status = excluded.status,
             run_id = excluded.run_id,
             error = NULL,
             attempts = attempts + 1,
             updated_at = excluded.updated_at",
        params![
            path,
            fingerprint,
            LedgerStatus::Pending.as_str(),
            run_id.value(),
            now
        ],
    )?;
    Ok(run_id)
}

/// Write every row derived from a parsed file and flip run and ledger to done.
#[allow(clippy::too_many_arguments)]
pub(crate) fn record_results(
    conn: &Connection,
    run_id: RunId,
    path: &str,
    fingerprint: &str,
    result: &AnalysisResult,
    trio: &Trio<'_>,
    report: &ComparisonReport,
    now: DateTime<Utc>,
) -> Result<StoredRun> {
    // A taken-over run may race a late writer; whichever commits last wins.
    for table in ["sample_results", "locus_comparisons", "paternity_conclusions"] {
        conn.execute(
            &format!("DELETE FROM {table} WHERE run_id = ?1"),
            params![run_id.value()],
        )?;
    }

    let metadata = &result.metadata;
    conn.execute(
        "UPDATE analysis_runs
         SET kit = ?1, instrument = ?2, run_date = ?3, case_number = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            metadata.kit,
            metadata.instrument,
            metadata.run_date,
            metadata.case_number,
            now,
            run_id.value()
        ],
    )?;

    let mut sample_ids = Vec::new();
    for finding in &result.samples {
        let issues_json =
            serde_json::to_string(&finding.issues).map_err(StoreError::json("sample issues"))?;
        conn.execute(
            "INSERT INTO sample_results
                 (run_id, sample_name, lab_number, role, status, confidence, loci_detected, issues_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id.value(),
                &finding.sample_name,
                finding.lab_number.as_deref(),
                finding.role.as_str(),
                finding.status.as_str(),
                finding.confidence,
                finding.loci_detected,
                issues_json
            ],
        )?;

        let Some(lab_number) = finding.lab_number.as_deref() else {
            continue;
        };
        let Some(sample) = sample_by_lab_number(conn, lab_number)? else {
            tracing::debug!(lab_number, run_id = %run_id, "Result names an unregistered lab number");
            continue;
        };
        replace_profile(conn, sample.id, &finding.profile, run_id, now)?;
        if !sample_ids.contains(&sample.id) {
            sample_ids.push(sample.id);
        }
    }

    for comparison in &report.comparisons {
        let mother = comparison.mother.as_ref();
        conn.execute(
            "INSERT INTO locus_comparisons
                 (run_id, locus, child_allele_1, child_allele_2, father_allele_1, father_allele_2,
                  mother_allele_1, mother_allele_2, verdict)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run_id.value(),
                &comparison.locus,
                comparison.child.first().as_str(),
                comparison.child.second().as_str(),
                comparison.alleged_father.first().as_str(),
                comparison.alleged_father.second().as_str(),
                mother.map(|m| m.first().as_str()),
                mother.map(|m| m.second().as_str()),
                comparison.verdict.as_str()
            ],
        )?;
    }

    let maternal = report.maternal.as_ref();
    conn.execute(
        "INSERT INTO paternity_conclusions
             (run_id, child_sample, father_sample, loci_compared, matching_loci, excluding_loci,
              conclusion, probability, maternal_loci_compared, maternal_matching_loci,
              maternal_match_rate, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            run_id.value(),
            &trio.child.sample_name,
            &trio.alleged_father.sample_name,
            report.loci_compared,
            report.matching_loci,
            report.excluding_loci,
            report.conclusion.as_str(),
            report.probability,
            maternal.map(|m| m.loci_compared),
            maternal.map(|m| m.matching_loci),
            maternal.map(|m| m.match_rate),
            now
        ],
    )?;

    conn.execute(
        "UPDATE analysis_runs SET status = ?1, error = NULL, updated_at = ?2 WHERE id = ?3",
        params![RunStatus::Processed.as_str(), now, run_id.value()],
    )?;
    set_ledger(conn, path, fingerprint, LedgerStatus::Stored, Some(run_id), None, now)?;

    Ok(StoredRun {
        run_id,
        conclusion: report.conclusion,
        probability: Some(report.probability),
        case_number: metadata.case_number.clone(),
        sample_ids,
    })
}

fn replace_profile(
    conn: &Connection,
    sample_id: SampleId,
    profile: &StrProfile,
    run_id: RunId,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "DELETE FROM str_profiles WHERE sample_id = ?1",
        params![sample_id.value()],
    )?;
    for (locus, pair) in profile.iter() {
        conn.execute(
            "INSERT INTO str_profiles (sample_id, locus, allele_1, allele_2, run_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                sample_id.value(),
                locus,
                pair.first().as_str(),
                pair.second().as_str(),
                run_id.value(),
                now
            ],
        )?;
    }
    Ok(())
}

/// Upsert a ledger row without touching its attempt count.
fn set_ledger(
    conn: &Connection,
    path: &str,
    fingerprint: &str,
    status: LedgerStatus,
    run_id: Option<RunId>,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO processing_ledger
             (path, fingerprint, status, run_id, error, attempts, first_seen_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
         ON CONFLICT(path, fingerprint) DO UPDATE SET
             status = excluded.status,
             run_id = COALESCE(excluded.run_id, run_id),
             error = excluded.error,
             updated_at = excluded.updated_at",
        params![
            path,
            fingerprint,
            status.as_str(),
            run_id.map(RunId::value),
            error,
            now
        ],
    )?;
    Ok(())
}

pub(crate) fn fail_run(
    conn: &Connection,
    run_id: Option<RunId>,
    path: &str,
    fingerprint: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    if let Some(run_id) = run_id {
        conn.execute(
            "UPDATE analysis_runs SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
            params![RunStatus::Error.as_str(), reason, now, run_id.value()],
        )?;
    }
    set_ledger(conn, path, fingerprint, LedgerStatus::Error, run_id, Some(reason), now)
}

/// Point a new `(path, fingerprint)` at an already processed run.
pub(crate) fn link_duplicate(
    conn: &Connection,
    path: &str,
    fingerprint: &str,
    run_id: RunId,
    now: DateTime<Utc>,
) -> Result<()> {
    set_ledger(conn, path, fingerprint, LedgerStatus::Stored, Some(run_id), None, now)
}

/// Flip a path's pending ledger rows, and their runs, to `error`.
pub(crate) fn mark_pending_as_error(
    conn: &Connection,
    path: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<usize> {
    conn.execute(
        "UPDATE analysis_runs SET status = ?1, error = ?2, updated_at = ?3
         WHERE status = ?4
           AND id IN (SELECT run_id FROM processing_ledger WHERE path = ?5 AND status = ?6)",
        params![
            RunStatus::Error.as_str(),
            reason,
            now,
            RunStatus::Pending.as_str(),
            path,
            LedgerStatus::Pending.as_str()
        ],
    )?;
    let changed = conn.execute(
        "UPDATE processing_ledger SET status = ?1, error = ?2, updated_at = ?3
         WHERE path = ?4 AND status = ?5",
        params![
            LedgerStatus::Error.as_str(),
            reason,
            now,
            path,
            LedgerStatus::Pending.as_str()
        ],
    )?;
    Ok(changed)
}
