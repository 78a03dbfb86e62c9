use serde::Serialize;
use thiserror::Error;

/// A new row whose (date, session, hall, seat) was already taken when it was inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatConflict {
    pub index: usize,
    pub date: String,
    pub sess: String,
    pub hall_no: i64,
    pub seat_no: i64,
    pub reg_no: String,
}

#[derive(Debug, Error)]
pub enum SeatingError {
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("{} allocation(s) reuse a (date, session, hall, seat) that is already taken", .0.len())]
    Conflict(Vec<SeatConflict>),

    #[error("allocation store failed: {0}")]
    Store(#[from] rusqlite::Error),

    /// Rows were committed but the workbook could not be written.
    #[error("saved {saved} allocation(s) but export failed: {source:#}")]
    Export {
        saved: usize,
        run_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl SeatingError {
    pub fn code(&self) -> &'static str {
        match self {
            SeatingError::MissingColumns(_) => "missing_columns",
            SeatingError::Conflict(_) => "allocation_conflict",
            SeatingError::Store(_) => "db_insert_failed",
            SeatingError::Export { .. } => "export_failed",
        }
    }

    /// Rows that made it into the store before the failure.
    pub fn saved(&self) -> usize {
        match self {
            SeatingError::Export { saved, .. } => *saved,
            _ => 0,
        }
    }
}
