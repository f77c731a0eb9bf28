use rusqlite::Connection;
use serde_json::json;

use crate::ipc::helpers::{get_required_str, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn trees_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let ident = get_required_str(params, "ident")?;
    let tree = store::get_tree(conn, &ident).map_err(HandlerErr::query)?;
    Ok(json!({ "tree": tree }))
}

fn tree_for_clone(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let clone_id = get_required_str(params, "cloneId")?;
    let tree = store::tree_for_clone(conn, &clone_id).map_err(HandlerErr::query)?;
    Ok(json!({ "tree": tree }))
}

fn trees_by_tree_id(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let tree_id = get_required_str(params, "treeId")?;
    let trees = store::trees_by_tree_id(conn, &tree_id).map_err(HandlerErr::query)?;
    Ok(json!({ "trees": trees }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "trees.get" => Some(with_conn(state, req, |_, conn, p| trees_get(conn, p))),
        "trees.forClone" => Some(with_conn(state, req, |_, conn, p| tree_for_clone(conn, p))),
        "trees.byTreeId" => Some(with_conn(state, req, |_, conn, p| trees_by_tree_id(conn, p))),
        _ => None,
    }
}
