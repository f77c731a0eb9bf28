use std::path::PathBuf;

use rusqlite::Connection;
use serde_json::json;

use crate::ingest::{Ingestor, UploadFile};
use crate::ipc::helpers::{get_required_str, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::Ingestion;
use crate::store;

/// Accepts `{path}` or inline `{name, text}`.
fn upload_from_value(v: &serde_json::Value) -> Result<UploadFile, HandlerErr> {
    if let Some(path) = v.get("path").and_then(|p| p.as_str()) {
        return Ok(UploadFile::from_path(&PathBuf::from(path))?);
    }
    let name = get_required_str(v, "name")?;
    let text = v
        .get("text")
        .and_then(|t| t.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing path or text"))?;
    Ok(UploadFile::new(name, text.as_bytes().to_vec()))
}

fn uploads_from_params(params: &serde_json::Value) -> Result<Vec<UploadFile>, HandlerErr> {
    if let Some(paths) = params.get("paths").and_then(|v| v.as_array()) {
        return paths
            .iter()
            .map(|p| {
                let path = p
                    .as_str()
                    .ok_or_else(|| HandlerErr::bad_params("paths must be strings"))?;
                Ok(UploadFile::from_path(&PathBuf::from(path))?)
            })
            .collect();
    }
    if let Some(files) = params.get("files").and_then(|v| v.as_array()) {
        return files.iter().map(upload_from_value).collect();
    }
    Err(HandlerErr::bad_params("missing paths or files"))
}

fn summary(ingestion: &Ingestion, stored: store::StoreCounts) -> serde_json::Value {
    json!({
        "datasetId": ingestion.dataset_id,
        "dataset": ingestion.dataset(),
        "cloneCount": ingestion.clone_total(),
        "treeCount": ingestion.trees.len(),
        "stored": stored,
        "warnings": ingestion.warnings,
    })
}

fn ingest_one(
    state: &AppState,
    conn: &Connection,
    file: &UploadFile,
) -> Result<serde_json::Value, HandlerErr> {
    let ingestor = Ingestor::new(state.ids.as_ref(), state.clock.as_ref());
    let ingestion = ingestor.process_upload(file)?;
    let stored = store::store_ingestion(conn, &ingestion)?;
    Ok(summary(&ingestion, stored))
}

fn datasets_process_upload(
    state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let file = upload_from_value(params)?;
    ingest_one(state, conn, &file)
}

fn datasets_process_files(
    state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let files = uploads_from_params(params)?;
    if files.is_empty() {
        return Err(HandlerErr::bad_params("no files given"));
    }

    let ingestor = Ingestor::new(state.ids.as_ref(), state.clock.as_ref());
    if let Some(ingestion) = ingestor.process_multiple_files(&files)? {
        let stored = store::store_ingestion(conn, &ingestion)?;
        return Ok(json!({
            "mode": "split",
            "results": [summary(&ingestion, stored)],
        }));
    }

    // Not a split upload: each file stands on its own and may fail on its own.
    let results: Vec<serde_json::Value> = files
        .iter()
        .map(|file| match ingest_one(state, conn, file) {
            Ok(v) => json!({ "file": file.name, "ok": true, "result": v }),
            Err(e) => json!({
                "file": file.name,
                "ok": false,
                "error": { "code": e.code, "message": e.message },
            }),
        })
        .collect();
    Ok(json!({ "mode": "individual", "results": results }))
}

fn datasets_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let datasets = store::list_datasets(conn).map_err(HandlerErr::query)?;
    Ok(json!({ "datasets": datasets }))
}

fn datasets_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let dataset_id = get_required_str(params, "datasetId")?;
    let dataset = store::get_dataset(conn, &dataset_id).map_err(HandlerErr::query)?;
    Ok(json!({ "dataset": dataset }))
}

fn datasets_remove(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let dataset_id = get_required_str(params, "datasetId")?;
    let removal = store::remove_dataset(conn, &dataset_id)?;
    Ok(json!(removal))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "datasets.processUpload" => Some(with_conn(state, req, datasets_process_upload)),
        "datasets.processFiles" => Some(with_conn(state, req, datasets_process_files)),
        "datasets.list" => Some(with_conn(state, req, |_, conn, _| datasets_list(conn))),
        "datasets.get" => Some(with_conn(state, req, |_, conn, p| datasets_get(conn, p))),
        "datasets.remove" => Some(with_conn(state, req, |_, conn, p| datasets_remove(conn, p))),
        "datasets.clearAll" => Some(with_conn(state, req, |_, conn, _| {
            Ok(json!(store::clear_all(conn)?))
        })),
        "datasets.stats" => Some(with_conn(state, req, |_, conn, _| {
            Ok(json!(store::stats(conn).map_err(HandlerErr::query)?))
        })),
        _ => None,
    }
}
