use clap::Parser;
use std::path::PathBuf;
use tracing::Level;

use crate::seating::DEFAULT_HALL_CAPACITY;

/// Exam seating sidecar: newline-delimited JSON requests on stdin, one JSON
/// response per line on stdout. Logs go to stderr.
#[derive(Debug, Clone, Parser)]
#[command(name = "examseatd", version, about, long_about = None)]
pub struct Config {
    /// Workspace directory to open at start-up (same as `workspace.select`)
    #[arg(long, env = "EXAMSEATD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Seats per hall when a request does not name a capacity
    #[arg(long, env = "EXAMSEATD_DEFAULT_CAPACITY", default_value_t = DEFAULT_HALL_CAPACITY)]
    pub default_capacity: i64,

    /// Emit newline-delimited JSON logs
    #[arg(long, env = "EXAMSEATD_LOG_JSON")]
    pub log_json: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "EXAMSEATD_LOG_LEVEL", default_value = "info")]
    pub log_level: Level,
}
