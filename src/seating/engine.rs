use crate::seating::allocate::{allocate_seats, effective_capacity, AllocationRecord};
use crate::seating::error::SeatingError;
use crate::seating::normalize::{normalize_rows, RawRow};
use crate::seating::report::{write_allocation_workbook, Artifact};
use crate::seating::store::{self, RunMeta};
use crate::seating::summary::{summarize, AllocationSummary};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

pub const PREVIEW_LIMIT: usize = 200;

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub capacity: i64,
    pub processed_rows: usize,
    pub saved_allocations: usize,
    pub artifact: Artifact,
    pub records: Vec<AllocationRecord>,
    pub summary: Vec<AllocationSummary>,
}

impl RunOutcome {
    pub fn preview(&self) -> &[AllocationRecord] {
        &self.records[..self.records.len().min(PREVIEW_LIMIT)]
    }
}

/// Normalize, allocate, persist, then export.
///
/// Nothing touches the store until normalization has succeeded, and the
/// workbook is only written once every row is committed.
pub fn run_allocation(
    conn: &Connection,
    out_dir: &Path,
    rows: &[RawRow],
    requested_capacity: i64,
    at: DateTime<Utc>,
) -> Result<RunOutcome, SeatingError> {
    let capacity = effective_capacity(requested_capacity);
    if capacity != requested_capacity {
        warn!(
            requested = requested_capacity,
            capacity, "invalid hall capacity, using default"
        );
    }

    let normalized = normalize_rows(rows).inspect_err(|e| warn!(error = %e, "timetable rejected"))?;
    let records = allocate_seats(&normalized, capacity);

    let run = RunMeta {
        run_id: Uuid::new_v4().to_string(),
        created_at: at.to_rfc3339_opts(SecondsFormat::Secs, true),
        capacity,
        processed_rows: normalized.len(),
    };
    let saved = store::insert_allocations(conn, &run, &records).inspect_err(|e| {
        warn!(run_id = %run.run_id, error = %e, "allocation batch not persisted")
    })?;
    info!(
        run_id = %run.run_id,
        processed_rows = run.processed_rows,
        saved,
        capacity,
        "allocation persisted"
    );

    let artifact = write_allocation_workbook(out_dir, &records, at).map_err(|source| {
        warn!(run_id = %run.run_id, error = %format!("{source:#}"), "export failed after save");
        SeatingError::Export {
            saved,
            run_id: run.run_id.clone(),
            source,
        }
    })?;
    if let Err(e) = store::attach_artifact(conn, &run.run_id, &artifact.filename, &artifact.sha256) {
        warn!(run_id = %run.run_id, error = %e, "could not record artifact on run");
    }
    info!(
        run_id = %run.run_id,
        artifact = %artifact.filename,
        path = %artifact.path.to_string_lossy(),
        "allocation exported"
    );

    let summary = summarize(&records);
    Ok(RunOutcome {
        run_id: run.run_id,
        capacity,
        processed_rows: run.processed_rows,
        saved_allocations: saved,
        artifact,
        records,
        summary,
    })
}
