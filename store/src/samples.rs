//! Sample rows and their transition audit trail.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use strlab_types::{BatchId, NewSample, PlateAssignment, Sample, SampleId, WorkflowStatus};

use crate::error::{Result, StoreError};

const SAMPLE_COLUMNS: &str =
    "id, lab_number, case_number, role, status, batch_id, well, archived, collected_at, updated_at";

/// One applied transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub sample_id: SampleId,
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    pub actor: String,
    pub context: serde_json::Value,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct NewAuditEntry<'a> {
    pub sample_id: SampleId,
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    pub actor: &'a str,
    pub context: &'a serde_json::Value,
    pub at: DateTime<Utc>,
}

struct SampleRow {
    id: i64,
    lab_number: String,
    case_number: String,
    role: String,
    status: String,
    batch_id: Option<i64>,
    well: Option<String>,
    archived: bool,
    collected_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SampleRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            lab_number: row.get(1)?,
            case_number: row.get(2)?,
            role: row.get(3)?,
            status: row.get(4)?,
            batch_id: row.get(5)?,
            well: row.get(6)?,
            archived: row.get(7)?,
            collected_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_sample(self) -> Result<Sample> {
        let corrupt = |detail: String| StoreError::corrupt("samples", detail);
        let plate = match (self.batch_id, self.well) {
            (Some(batch_id), Some(well)) => Some(PlateAssignment {
                batch_id: BatchId::new(batch_id),
                well: well.parse().map_err(|e| corrupt(format!("{e}")))?,
            }),
            (None, None) => None,
            _ => {
                return Err(corrupt(format!(
                    "sample {} has a partial plate assignment",
                    self.id
                )));
            }
        };
        Ok(Sample {
            id: SampleId::new(self.id),
            role: self.role.parse().map_err(|e| corrupt(format!("{e}")))?,
            status: self.status.parse().map_err(|e| corrupt(format!("{e}")))?,
            lab_number: self.lab_number,
            case_number: self.case_number,
            plate,
            archived: self.archived,
            collected_at: self.collected_at,
            updated_at: self.updated_at,
        })
    }
}

fn query_samples(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Sample>> {
    let mut stmt = conn.prepare(&format!("SELECT {SAMPLE_COLUMNS} FROM samples {filter}"))?;
    let rows = stmt.query_map(params, SampleRow::from_row)?;
    rows.map(|row| row?.into_sample()).collect()
}

pub(crate) fn get_sample(conn: &Connection, id: SampleId) -> Result<Option<Sample>> {
    conn.query_row(
        &format!("SELECT {SAMPLE_COLUMNS} FROM samples WHERE id = ?1"),
        params![id.value()],
        SampleRow::from_row,
    )
    .optional()?
    .map(SampleRow::into_sample)
    .transpose()
}

pub(crate) fn sample_by_lab_number(conn: &Connection, lab_number: &str) -> Result<Option<Sample>> {
    conn.query_row(
        &format!("SELECT {SAMPLE_COLUMNS} FROM samples WHERE lab_number = ?1"),
        params![lab_number],
        SampleRow::from_row,
    )
    .optional()?
    .map(SampleRow::into_sample)
    .transpose()
}

/// Unarchived samples in `status`, oldest intake first.
pub(crate) fn samples_by_status(conn: &Connection, status: WorkflowStatus) -> Result<Vec<Sample>> {
    query_samples(
        conn,
        "WHERE status = ?1 AND archived = 0 ORDER BY collected_at ASC, id ASC",
        params![status.as_str()],
    )
}

pub(crate) fn samples_in_case(conn: &Connection, case_number: &str) -> Result<Vec<Sample>> {
    query_samples(
        conn,
        "WHERE case_number = ?1 ORDER BY id ASC",
        params![case_number],
    )
}

pub(crate) fn sample_history(conn: &Connection, id: SampleId) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, sample_id, from_status, to_status, actor, context_json, created_at
         FROM sample_audit
         WHERE sample_id = ?1
         ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![id.value()], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, DateTime<Utc>>(6)?,
        ))
    })?;

    rows.map(|row| {
        let (id, sample_id, from, to, actor, context_json, at) = row?;
        let corrupt = |detail: String| StoreError::corrupt("sample_audit", detail);
        Ok(AuditEntry {
            id,
            sample_id: SampleId::new(sample_id),
            from: from.parse().map_err(|e| corrupt(format!("{e}")))?,
            to: to.parse().map_err(|e| corrupt(format!("{e}")))?,
            actor,
            context: serde_json::from_str(&context_json)
                .map_err(StoreError::json("audit context"))?,
            at,
        })
    })
    .collect()
}

// ── Writes ───────────────────────────────────────────────────

pub(crate) fn insert_sample(
    conn: &Connection,
    sample: &NewSample,
    now: DateTime<Utc>,
) -> Result<Sample> {
    if sample_by_lab_number(conn, &sample.lab_number)?.is_some() {
        return Err(StoreError::DuplicateLabNumber(sample.lab_number.clone()));
    }
    conn.execute(
        "INSERT INTO samples (lab_number, case_number, role, status, archived, collected_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
        params![
            &sample.lab_number,
            &sample.case_number,
            sample.role.as_str(),
            WorkflowStatus::SampleCollected.as_str(),
            now
        ],
    )?;
    let id = SampleId::new(conn.last_insert_rowid());
    get_sample(conn, id)?.ok_or(StoreError::NotFound {
        what: "sample",
        id: id.value(),
    })
}

fn expect_one(changed: usize, id: SampleId) -> Result<()> {
    if changed == 0 {
        return Err(StoreError::NotFound {
            what: "sample",
            id: id.value(),
        });
    }
    Ok(())
}

pub(crate) fn update_sample_status(
    conn: &Connection,
    id: SampleId,
    status: WorkflowStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE samples SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now, id.value()],
    )?;
    expect_one(changed, id)
}

pub(crate) fn set_sample_plate(
    conn: &Connection,
    id: SampleId,
    plate: Option<PlateAssignment>,
    now: DateTime<Utc>,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE samples SET batch_id = ?1, well = ?2, updated_at = ?3 WHERE id = ?4",
        params![
            plate.map(|p| p.batch_id.value()),
            plate.map(|p| p.well.to_string()),
            now,
            id.value()
        ],
    )?;
    expect_one(changed, id)
}

pub(crate) fn set_sample_archived(conn: &Connection, id: SampleId, now: DateTime<Utc>) -> Result<()> {
    let changed = conn.execute(
        "UPDATE samples SET archived = 1, updated_at = ?1 WHERE id = ?2",
        params![now, id.value()],
    )?;
    expect_one(changed, id)
}

pub(crate) fn insert_audit(conn: &Connection, entry: &NewAuditEntry<'_>) -> Result<i64> {
    let context_json =
        serde_json::to_string(entry.context).map_err(StoreError::json("audit context"))?;
    conn.execute(
        "INSERT INTO sample_audit (sample_id, from_status, to_status, actor, context_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.sample_id.value(),
            entry.from.as_str(),
            entry.to.as_str(),
            entry.actor,
            context_json,
            entry.at
        ],
    )?;
    Ok(conn.last_insert_rowid())
}
