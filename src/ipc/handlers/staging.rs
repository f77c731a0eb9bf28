use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::config::StagingConfig;
use crate::error::IngestError;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::staging::Staging;

fn staging_select(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let data_dir = get_required_str(params, "dataDir")?;
    let converter = get_required_str(params, "converter")?;
    let mut config = StagingConfig::new(PathBuf::from(&data_dir), converter);
    if let Some(args) = params.get("converterArgs").and_then(|v| v.as_array()) {
        config.converter_args = args
            .iter()
            .map(|a| {
                a.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| HandlerErr::bad_params("converterArgs must be strings"))
            })
            .collect::<Result<_, _>>()?;
    }
    if let Some(hours) = params.get("ttlHours").and_then(|v| v.as_f64()) {
        if !(hours.is_finite() && hours >= 0.0) {
            return Err(HandlerErr::bad_params("ttlHours must be a non-negative number"));
        }
        config.ttl = Duration::try_from_secs_f64(hours * 3600.0)
            .map_err(|e| HandlerErr::bad_params(format!("ttlHours out of range: {e}")))?;
    }

    let staging = Staging::open(config, state.ids.clone(), state.clock.clone())?;
    state.staging = Some(staging);
    Ok(json!({ "dataDir": data_dir }))
}

fn staging_upload(staging: &Staging, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let source = PathBuf::from(get_required_str(params, "path")?);
    let original_name = get_optional_str(params, "originalName").unwrap_or_else(|| {
        source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    });
    let lower = original_name.to_ascii_lowercase();
    if !(lower.ends_with(".json") || lower.ends_with(".gz")) {
        return Err(IngestError::UnsupportedFile(format!(
            "{original_name}: only .json and .gz files can be staged"
        ))
        .into());
    }

    // The staged copy is consumed; the caller's file is left alone.
    let upload = staging.upload_path(&original_name);
    copy_into(&source, &upload)?;
    let file_type = get_optional_str(params, "fileType");
    let staged = staging.process_upload(&upload, file_type.as_deref(), &original_name)?;
    Ok(json!(staged))
}

fn copy_into(source: &Path, dest: &Path) -> Result<(), HandlerErr> {
    std::fs::copy(source, dest)
        .map(|_| ())
        .map_err(|e| IngestError::io(source, e).into())
}

fn staging_sweep(staging: &Staging, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let report = match get_optional_str(params, "now") {
        Some(text) => {
            let now = DateTime::parse_from_rfc3339(&text)
                .map_err(|e| HandlerErr::bad_params(format!("invalid now: {e}")))?
                .with_timezone(&Utc);
            staging.sweep_at(now)?
        }
        None => staging.sweep()?,
    };
    Ok(json!(report))
}

fn with_staging(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Staging, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(staging) = state.staging.as_ref() else {
        return err(&req.id, "no_staging", "select a staging directory first", None);
    };
    match f(staging, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "staging.select" => Some(match staging_select(state, &req.params) {
            Ok(result) => ok(&req.id, result),
            Err(error) => error.response(&req.id),
        }),
        "staging.upload" => Some(with_staging(state, req, staging_upload)),
        "staging.list" => Some(with_staging(state, req, |s, _| {
            Ok(json!({ "datasets": s.list()? }))
        })),
        "staging.sweep" => Some(with_staging(state, req, staging_sweep)),
        _ => None,
    }
}
