//! Plate batches and their well rows.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use strlab_types::{
    Batch, BatchId, NewBatch, PLATE_CAPACITY, PlateAssignment, PlateLayout, SampleId, StageType,
    WellPosition, WorkflowStatus,
};

use crate::error::{Result, StoreError};
use crate::samples::set_sample_plate;

/// Next free `{PREFIX}_{YYYYMMDD}_{NNN}` for the stage and day.
pub(crate) fn next_batch_number(
    conn: &Connection,
    stage: StageType,
    date: NaiveDate,
) -> Result<String> {
    let prefix = format!("{}_{}_", stage.batch_prefix(), date.format("%Y%m%d"));
    let mut stmt = conn.prepare("SELECT batch_number FROM batches WHERE batch_number LIKE ?1")?;
    let numbers = stmt.query_map(params![format!("{prefix}%")], |row| row.get::<_, String>(0))?;

    let mut highest = 0u32;
    for number in numbers {
        let number = number?;
        if let Some(seq) = number
            .strip_prefix(&prefix)
            .and_then(|rest| rest.parse::<u32>().ok())
        {
            highest = highest.max(seq);
        }
    }
    Ok(format!("{prefix}{:03}", highest + 1))
}

/// Persist a laid-out batch, its wells, and each member's plate assignment.
pub(crate) fn insert_batch(
    conn: &Connection,
    batch: &NewBatch,
    batch_number: &str,
    now: DateTime<Utc>,
) -> Result<Batch> {
    if batch.layout.len() > PLATE_CAPACITY {
        return Err(StoreError::CapacityExceeded(batch.layout.len()));
    }

    for sample_id in batch.layout.sample_ids() {
        let open: Option<i64> = conn
            .query_row(
                "SELECT batch_id FROM batch_wells WHERE stage = ?1 AND sample_id = ?2 AND open = 1",
                params![batch.stage.as_str(), sample_id.value()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(batch_id) = open {
            return Err(StoreError::SampleAlreadyBatched {
                sample_id,
                batch_id: BatchId::new(batch_id),
            });
        }
    }

    let layout_json =
        serde_json::to_string(&batch.layout).map_err(StoreError::json("plate layout"))?;
    let status = batch.stage.batched_status();
    conn.execute(
        "INSERT INTO batches (batch_number, stage, status, layout_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![batch_number, batch.stage.as_str(), status.as_str(), layout_json, now],
    )?;
    let id = BatchId::new(conn.last_insert_rowid());

    for (well, assignment) in batch.layout.iter() {
        conn.execute(
            "INSERT INTO batch_wells (batch_id, well, sample_id, stage, open)
             VALUES (?1, ?2, ?3, ?4, 1)",
            params![
                id.value(),
                well.to_string(),
                assignment.sample_id.value(),
                batch.stage.as_str()
            ],
        )?;
        set_sample_plate(
            conn,
            assignment.sample_id,
            Some(PlateAssignment { batch_id: id, well }),
            now,
        )?;
    }

    Ok(Batch {
        id,
        batch_number: batch_number.to_string(),
        stage: batch.stage,
        status,
        layout: batch.layout.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub(crate) fn get_batch(conn: &Connection, id: BatchId) -> Result<Option<Batch>> {
    let row = conn
        .query_row(
            "SELECT id, batch_number, stage, status, layout_json, created_at, updated_at
             FROM batches WHERE id = ?1",
            params![id.value()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, DateTime<Utc>>(5)?,
                    row.get::<_, DateTime<Utc>>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((id, batch_number, stage, status, layout_json, created_at, updated_at)) = row else {
        return Ok(None);
    };
    let corrupt = |detail: String| StoreError::corrupt("batches", detail);
    Ok(Some(Batch {
        id: BatchId::new(id),
        batch_number,
        stage: stage.parse().map_err(|e| corrupt(format!("{e}")))?,
        status: status.parse().map_err(|e| corrupt(format!("{e}")))?,
        layout: serde_json::from_str(&layout_json).map_err(StoreError::json("plate layout"))?,
        created_at,
        updated_at,
    }))
}

/// Sample ids on a batch's wells, in well order.
pub(crate) fn batch_sample_ids(conn: &Connection, id: BatchId) -> Result<Vec<SampleId>> {
    let mut stmt =
        conn.prepare("SELECT well, sample_id FROM batch_wells WHERE batch_id = ?1")?;
    let rows = stmt.query_map(params![id.value()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut wells = Vec::new();
    for row in rows {
        let (well, sample_id) = row?;
        let well: WellPosition = well
            .parse()
            .map_err(|e| StoreError::corrupt("batch_wells", format!("{e}")))?;
        wells.push((well, SampleId::new(sample_id)));
    }
    wells.sort_by_key(|(well, _)| *well);
    Ok(wells.into_iter().map(|(_, id)| id).collect())
}

/// Record a batch's final status and release its wells.
pub(crate) fn close_batch(
    conn: &Connection,
    id: BatchId,
    status: WorkflowStatus,
    layout: &PlateLayout,
    now: DateTime<Utc>,
) -> Result<()> {
    let layout_json = serde_json::to_string(layout).map_err(StoreError::json("plate layout"))?;
    let changed = conn.execute(
        "UPDATE batches SET status = ?1, layout_json = ?2, updated_at = ?3 WHERE id = ?4",
        params![status.as_str(), layout_json, now, id.value()],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            what: "batch",
            id: id.value(),
        });
    }
    conn.execute(
        "UPDATE batch_wells SET open = 0 WHERE batch_id = ?1",
        params![id.value()],
    )?;
    Ok(())
}

/// Close the open `stage` well of one sample, leaving the rest of its batch open.
pub(crate) fn release_sample_wells(
    conn: &Connection,
    sample_id: SampleId,
    stage: StageType,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE batch_wells SET open = 0 WHERE sample_id = ?1 AND stage = ?2 AND open = 1",
        params![sample_id.value(), stage.as_str()],
    )?)
}
