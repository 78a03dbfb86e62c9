use crate::seating::store;
use anyhow::Context;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

pub const DB_FILE: &str = "examseat.sqlite3";
pub const OUTPUTS_DIR: &str = "outputs";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // A second daemon on the same workspace waits instead of failing outright.
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    store::ensure_schema(&conn).context("failed to create allocation schema")?;
    Ok(conn)
}

pub fn outputs_dir(workspace: &Path) -> PathBuf {
    workspace.join(OUTPUTS_DIR)
}
