mod config;
mod db;
mod ipc;
mod seating;
mod telemetry;

use clap::Parser;
use std::io::{self, BufRead, Write};
use tracing::{debug, error, info};

fn main() {
    let cfg = config::Config::parse();
    telemetry::init_tracing(cfg.log_json, cfg.log_level);

    let mut state = ipc::AppState::new(cfg.default_capacity);
    if let Some(path) = cfg.workspace.as_ref() {
        match state.open_workspace(path) {
            Ok(()) => info!(workspace = %path.to_string_lossy(), "workspace opened"),
            Err(e) => error!(workspace = %path.to_string_lossy(), error = %format!("{e:#}"), "workspace open failed"),
        }
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        default_capacity = state.default_capacity,
        "examseatd ready"
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                let _ = writeln!(
                    stdout,
                    "{}",
                    serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    })
                );
                let _ = stdout.flush();
                continue;
            }
        };

        debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
