use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::seating::allocate::parse_capacity;
use crate::seating::report::{latest_artifact, read_allocation_sheet, resolve_artifact};
use crate::seating::store::{self, AllocationFilter, DEFAULT_PAGE_LIMIT};
use crate::seating::{run_allocation, RawRow, SeatingError};
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    fn query(e: impl std::fmt::Display) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<SeatingError> for HandlerErr {
    fn from(e: SeatingError) -> Self {
        let saved = e.saved();
        let details = match &e {
            SeatingError::MissingColumns(cols) => json!({ "missing": cols, "saved": saved }),
            SeatingError::Conflict(conflicts) => json!({ "conflicts": conflicts, "saved": saved }),
            SeatingError::Store(_) => json!({ "saved": saved }),
            SeatingError::Export { run_id, .. } => json!({
                "saved": saved,
                "saved_allocations": saved,
                "run_id": run_id,
            }),
        };
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details: Some(details),
        }
    }
}

fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or(HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".to_string(),
        details: None,
    })
}

fn outputs_dir(state: &AppState) -> Result<PathBuf, HandlerErr> {
    state.outputs_dir().ok_or(HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".to_string(),
        details: None,
    })
}

fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn optional_i64(params: &serde_json::Value, key: &str, default: i64) -> Result<i64, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(v) => v
            .as_i64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

/// Accepts `rows: [{header: cell}]` or `headers: [..]` with `rows: [[cell, ..]]`.
fn parse_raw_rows(params: &serde_json::Value) -> Result<Vec<RawRow>, HandlerErr> {
    let Some(rows) = params.get("rows").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing rows"));
    };

    if let Some(headers) = params.get("headers") {
        let headers: Vec<String> = headers
            .as_array()
            .ok_or_else(|| HandlerErr::bad_params("headers must be an array"))?
            .iter()
            .map(|h| match h {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        return rows
            .iter()
            .enumerate()
            .map(|(i, r)| {
                r.as_array()
                    .map(|cells| RawRow::from_cells(&headers, cells))
                    .ok_or_else(|| {
                        HandlerErr::bad_params(format!("rows[{}] must be an array of cells", i))
                    })
            })
            .collect();
    }

    rows.iter()
        .enumerate()
        .map(|(i, r)| {
            r.as_object().map(RawRow::from_object).ok_or_else(|| {
                HandlerErr::bad_params(format!("rows[{}] must be an object", i))
            })
        })
        .collect()
}

fn seating_allocate(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let out_dir = outputs_dir(state)?;
    let rows = parse_raw_rows(params)?;
    // Unreadable capacities become 0 and are repaired to the default downstream.
    let capacity = match params.get("capacity") {
        None | Some(serde_json::Value::Null) => state.default_capacity,
        Some(v) => parse_capacity(v).unwrap_or(0),
    };

    let outcome = run_allocation(conn, &out_dir, &rows, capacity, chrono::Utc::now())?;
    Ok(json!({
        "message": format!("Generated allocation for {} rows", outcome.saved_allocations),
        "processed_rows": outcome.processed_rows,
        "saved_allocations": outcome.saved_allocations,
        "download_url": format!("/outputs/{}", outcome.artifact.filename),
        "run_id": outcome.run_id,
        "capacity": outcome.capacity,
        "artifact_sha256": outcome.artifact.sha256,
        "preview": outcome.preview(),
        "summary": outcome.summary,
    }))
}

fn seating_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let filter = AllocationFilter {
        date: optional_str(params, "date"),
        sess: optional_str(params, "sess"),
        subject: optional_str(params, "subject"),
    };
    let page = optional_i64(params, "page", 1)?;
    let limit = optional_i64(params, "limit", DEFAULT_PAGE_LIMIT)?;
    let listed = store::list(conn, &filter, page, limit).map_err(HandlerErr::query)?;
    Ok(json!(listed))
}

fn seating_summary(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let date = optional_str(params, "date");
    let sess = optional_str(params, "sess");
    let summary = store::summary(conn, date.as_deref(), sess.as_deref()).map_err(HandlerErr::query)?;
    Ok(json!({ "summary": summary }))
}

fn seating_clear(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let deleted = store::clear_all(conn).map_err(|e| HandlerErr {
        code: "db_delete_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "seating_allocations" })),
    })?;
    tracing::info!(deleted, "seating allocations cleared");
    Ok(json!({
        "message": "All seating allocations cleared",
        "deleted": deleted,
    }))
}

fn seating_latest_output(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let out_dir = outputs_dir(state)?;
    let latest = latest_artifact(&out_dir).map_err(|e| HandlerErr {
        code: "io_failed",
        message: format!("{e:#}"),
        details: None,
    })?;
    Ok(match latest {
        Some(name) => json!({ "filename": name, "url": format!("/outputs/{}", name) }),
        None => json!({ "filename": null, "url": null }),
    })
}

fn seating_read_output(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let out_dir = outputs_dir(state)?;
    let filename = optional_str(params, "filename")
        .ok_or_else(|| HandlerErr::bad_params("missing filename"))?;
    let path = resolve_artifact(&out_dir, &filename).map_err(|e| HandlerErr {
        code: "not_found",
        message: format!("{e:#}"),
        details: None,
    })?;
    let rows = read_allocation_sheet(&path).map_err(|e| HandlerErr {
        code: "io_failed",
        message: format!("{e:#}"),
        details: Some(json!({ "filename": filename })),
    })?;
    Ok(json!({ "filename": filename, "rows": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "seating.allocate" => seating_allocate(state, &req.params),
        "seating.list" => seating_list(state, &req.params),
        "seating.summary" => seating_summary(state, &req.params),
        "seating.clear" => seating_clear(state),
        "seating.latestOutput" => seating_latest_output(state),
        "seating.readOutput" => seating_read_output(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
