use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::seating::store;
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn required_hall_no(req: &Request) -> Result<i64, serde_json::Value> {
    let v = req.params.get("hallNo");
    v.and_then(|v| v.as_i64())
        .or_else(|| v.and_then(|v| v.as_str()).and_then(|s| s.trim().parse().ok()))
        .filter(|n| *n >= 1)
        .ok_or_else(|| err(&req.id, "bad_params", "hallNo must be a positive integer", None))
}

fn handle_lookup(state: &AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let Some(conn) = state.db.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };

    let rows = match req.method.as_str() {
        "hallTickets.student" => store::by_reg_no(conn, &required_str(req, "regNo")?),
        "hallTickets.subject" => store::by_subject(conn, &required_str(req, "subCode")?),
        _ => {
            let date = required_str(req, "date")?;
            let sess = required_str(req, "sess")?;
            let hall_no = required_hall_no(req)?;
            store::by_hall(conn, &date, &sess, hall_no)
        }
    }
    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    Ok(ok(&req.id, json!({ "rows": rows })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "hallTickets.student" | "hallTickets.subject" | "hallTickets.hall" => {
            Some(handle_lookup(state, req).unwrap_or_else(|e| e))
        }
        _ => None,
    }
}
