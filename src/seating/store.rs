use crate::seating::allocate::AllocationRecord;
use crate::seating::error::{SeatConflict, SeatingError};
use crate::seating::summary::{summarize, AllocationSummary};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ErrorCode, Row};
use serde::Serialize;

pub const DEFAULT_PAGE_LIMIT: i64 = 100;
pub const MAX_PAGE_LIMIT: i64 = 500;

const RECORD_COLUMNS: &str = "hall_no, seat_no, reg_no, name, sub_code, sub_title, class_code, dept,
     exam_date, session, hall_key, run_id, created_at";

pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS allocation_runs(
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            capacity INTEGER NOT NULL,
            processed_rows INTEGER NOT NULL,
            saved_allocations INTEGER NOT NULL,
            artifact TEXT,
            artifact_sha256 TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS seating_allocations(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            hall_no INTEGER NOT NULL,
            seat_no INTEGER NOT NULL,
            reg_no TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            sub_code TEXT NOT NULL DEFAULT '',
            sub_title TEXT NOT NULL DEFAULT '',
            class_code TEXT NOT NULL DEFAULT '',
            dept TEXT NOT NULL DEFAULT '',
            exam_date TEXT NOT NULL,
            session TEXT NOT NULL,
            hall_key TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(exam_date, session, hall_no, seat_no)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_seating_allocations_reg ON seating_allocations(reg_no)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_seating_allocations_sub ON seating_allocations(sub_code)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_seating_allocations_hall_key ON seating_allocations(hall_key)",
        [],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredAllocation {
    #[serde(flatten)]
    pub record: AllocationRecord,
    pub run_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct RunMeta {
    pub run_id: String,
    pub created_at: String,
    pub capacity: i64,
    pub processed_rows: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AllocationFilter {
    pub date: Option<String>,
    pub sess: Option<String>,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationPage {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub rows: Vec<StoredAllocation>,
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == ErrorCode::ConstraintViolation
                && f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn stored_from_row(r: &Row<'_>) -> rusqlite::Result<StoredAllocation> {
    Ok(StoredAllocation {
        record: AllocationRecord {
            hall_no: r.get(0)?,
            seat_no: r.get(1)?,
            reg_no: r.get(2)?,
            name: r.get(3)?,
            sub_code: r.get(4)?,
            sub_title: r.get(5)?,
            class_code: r.get(6)?,
            dept: r.get(7)?,
            date: r.get(8)?,
            sess: r.get(9)?,
            hall_key: r.get(10)?,
        },
        run_id: r.get(11)?,
        created_at: r.get(12)?,
    })
}

/// Persist one run atomically: every record plus its ledger row, or nothing.
///
/// Rows whose (date, session, hall, seat) is already taken are all
/// collected before rolling back so the caller sees every offending record.
pub fn insert_allocations(
    conn: &Connection,
    run: &RunMeta,
    records: &[AllocationRecord],
) -> Result<usize, SeatingError> {
    let tx = conn.unchecked_transaction()?;
    let mut conflicts = Vec::new();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO seating_allocations(
                run_id, hall_no, seat_no, reg_no, name, sub_code, sub_title,
                class_code, dept, exam_date, session, hall_key, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for (index, r) in records.iter().enumerate() {
            let res = stmt.execute(rusqlite::params![
                run.run_id,
                r.hall_no,
                r.seat_no,
                r.reg_no,
                r.name,
                r.sub_code,
                r.sub_title,
                r.class_code,
                r.dept,
                r.date,
                r.sess,
                r.hall_key,
                run.created_at,
            ]);
            match res {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => conflicts.push(SeatConflict {
                    index,
                    date: r.date.clone(),
                    sess: r.sess.clone(),
                    hall_no: r.hall_no,
                    seat_no: r.seat_no,
                    reg_no: r.reg_no.clone(),
                }),
                // Dropping the transaction rolls it back.
                Err(e) => return Err(e.into()),
            }
        }
    }
    if !conflicts.is_empty() {
        tx.rollback()?;
        return Err(SeatingError::Conflict(conflicts));
    }

    tx.execute(
        "INSERT INTO allocation_runs(id, created_at, capacity, processed_rows, saved_allocations)
         VALUES(?, ?, ?, ?, ?)",
        rusqlite::params![
            run.run_id,
            run.created_at,
            run.capacity,
            run.processed_rows as i64,
            records.len() as i64,
        ],
    )?;
    tx.commit()?;
    Ok(records.len())
}

pub fn attach_artifact(
    conn: &Connection,
    run_id: &str,
    filename: &str,
    sha256: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE allocation_runs SET artifact = ?, artifact_sha256 = ? WHERE id = ?",
        (filename, sha256, run_id),
    )?;
    Ok(())
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: Vec<Value>,
) -> rusqlite::Result<Vec<StoredAllocation>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), stored_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn by_reg_no(conn: &Connection, reg_no: &str) -> rusqlite::Result<Vec<StoredAllocation>> {
    query_records(
        conn,
        &format!(
            "SELECT {} FROM seating_allocations WHERE reg_no = ?
             ORDER BY exam_date, session, hall_no, seat_no",
            RECORD_COLUMNS
        ),
        vec![Value::Text(reg_no.to_string())],
    )
}

pub fn by_subject(conn: &Connection, sub_code: &str) -> rusqlite::Result<Vec<StoredAllocation>> {
    query_records(
        conn,
        &format!(
            "SELECT {} FROM seating_allocations WHERE sub_code = ?
             ORDER BY exam_date, session, hall_no, seat_no",
            RECORD_COLUMNS
        ),
        vec![Value::Text(sub_code.to_string())],
    )
}

pub fn by_hall(
    conn: &Connection,
    date: &str,
    sess: &str,
    hall_no: i64,
) -> rusqlite::Result<Vec<StoredAllocation>> {
    query_records(
        conn,
        &format!(
            "SELECT {} FROM seating_allocations
             WHERE exam_date = ? AND session = ? AND hall_no = ?
             ORDER BY seat_no",
            RECORD_COLUMNS
        ),
        vec![
            Value::Text(date.to_string()),
            Value::Text(sess.to_string()),
            Value::Integer(hall_no),
        ],
    )
}

fn where_clause(filter: &AllocationFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    if let Some(d) = &filter.date {
        clauses.push("exam_date = ?");
        params.push(Value::Text(d.clone()));
    }
    if let Some(s) = &filter.sess {
        clauses.push("session = ?");
        params.push(Value::Text(s.clone()));
    }
    if let Some(s) = &filter.subject {
        clauses.push("sub_code = ?");
        params.push(Value::Text(s.clone()));
    }
    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), params)
    }
}

pub fn list(
    conn: &Connection,
    filter: &AllocationFilter,
    page: i64,
    limit: i64,
) -> rusqlite::Result<AllocationPage> {
    let page = page.max(1);
    let limit = limit.clamp(1, MAX_PAGE_LIMIT);
    let (where_sql, params) = where_clause(filter);

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM seating_allocations {}", where_sql),
        params_from_iter(params.clone()),
        |r| r.get(0),
    )?;

    let mut page_params = params;
    page_params.push(Value::Integer(limit));
    // Pages past the end come back empty.
    page_params.push(Value::Integer((page - 1).saturating_mul(limit)));
    let rows = query_records(
        conn,
        &format!(
            "SELECT {} FROM seating_allocations {}
             ORDER BY exam_date, session, hall_no, seat_no
             LIMIT ? OFFSET ?",
            RECORD_COLUMNS, where_sql
        ),
        page_params,
    )?;

    Ok(AllocationPage {
        total,
        page,
        limit,
        rows,
    })
}

/// Per-subject summary straight from the store.
pub fn summary(
    conn: &Connection,
    date: Option<&str>,
    sess: Option<&str>,
) -> rusqlite::Result<Vec<AllocationSummary>> {
    let filter = AllocationFilter {
        date: date.map(str::to_string),
        sess: sess.map(str::to_string),
        subject: None,
    };
    let (where_sql, params) = where_clause(&filter);
    let rows = query_records(
        conn,
        &format!(
            "SELECT {} FROM seating_allocations {}",
            RECORD_COLUMNS, where_sql
        ),
        params,
    )?;
    Ok(summarize(rows.iter().map(|s| &s.record)))
}

/// Remove every stored allocation and the run ledger; returns rows deleted.
pub fn clear_all(conn: &Connection) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let deleted = tx.execute("DELETE FROM seating_allocations", [])?;
    tx.execute("DELETE FROM allocation_runs", [])?;
    tx.commit()?;
    Ok(deleted)
}
