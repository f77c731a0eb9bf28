use rusqlite::Connection;
use serde_json::json;

use crate::ipc::helpers::{get_required_str, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn clones_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let dataset_id = get_required_str(params, "datasetId")?;
    let clones = store::clones_for_dataset(conn, &dataset_id).map_err(HandlerErr::query)?;
    Ok(json!({ "clones": clones }))
}

fn clones_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let dataset_id = get_required_str(params, "datasetId")?;
    let clone_id = get_required_str(params, "cloneId")?;
    let clone = store::get_clone(conn, &dataset_id, &clone_id).map_err(HandlerErr::query)?;
    Ok(json!({ "clone": clone }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "clones.list" => Some(with_conn(state, req, |_, conn, p| clones_list(conn, p))),
        "clones.get" => Some(with_conn(state, req, |_, conn, p| clones_get(conn, p))),
        _ => None,
    }
}
