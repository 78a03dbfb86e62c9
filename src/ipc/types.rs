use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::Deserialize;

use crate::db;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub default_capacity: i64,
}

impl AppState {
    pub fn new(default_capacity: i64) -> Self {
        Self {
            workspace: None,
            db: None,
            default_capacity,
        }
    }

    pub fn open_workspace(&mut self, path: &Path) -> anyhow::Result<()> {
        let conn = db::open_db(path)?;
        self.workspace = Some(path.to_path_buf());
        self.db = Some(conn);
        Ok(())
    }

    pub fn outputs_dir(&self) -> Option<PathBuf> {
        self.workspace.as_deref().map(db::outputs_dir)
    }
}
