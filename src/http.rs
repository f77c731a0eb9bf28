//! HTTP surface of the staging server.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::config::StagingConfig;
use crate::identity::{SystemClock, SystemIds};
use crate::staging::Staging;

const ALLOWED_EXTENSIONS: [&str; 2] = [".json", ".gz"];

pub fn build_router(staging: Arc<Staging>) -> Router {
    let limit = staging.config().max_upload_bytes;
    Router::new()
        .route("/upload-data", post(upload_data))
        .route("/api/datasets", get(list_datasets))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(staging)
}

fn is_allowed_upload(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

async fn upload_data(State(staging): State<Arc<Staging>>, mut multipart: Multipart) -> Response {
    let mut file: Option<(String, axum::body::Bytes)> = None;
    let mut file_type: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => return (e.status(), e.body_text()).into_response(),
        };
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                match field.bytes().await {
                    Ok(bytes) => file = Some((file_name, bytes)),
                    Err(e) => return (e.status(), e.body_text()).into_response(),
                }
            }
            Some("fileType") => {
                if let Ok(t) = field.text().await {
                    if !t.trim().is_empty() {
                        file_type = Some(t.trim().to_string());
                    }
                }
            }
            _ => {}
        }
    }

    let Some((original_name, bytes)) = file else {
        return (StatusCode::BAD_REQUEST, "No file uploaded").into_response();
    };
    if !is_allowed_upload(&original_name) {
        return (
            StatusCode::BAD_REQUEST,
            "Invalid file type. Only JSON and GZ files are allowed.",
        )
            .into_response();
    }

    let path = staging.upload_path(&original_name);
    if let Err(e) = tokio::fs::write(&path, &bytes).await {
        warn!(file = %path.display(), error = %e, "could not save upload");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Could not save upload").into_response();
    }

    let worker = staging.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        worker.process_upload(&path, file_type.as_deref(), &original_name)
    })
    .await;

    match outcome {
        Ok(Ok(staged)) => Json(staged).into_response(),
        Ok(Err(e)) => {
            let status = if e.is_client_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, format!("Processing failed: {e}")).into_response()
        }
        Err(e) => {
            warn!(error = %e, "upload worker panicked");
            (StatusCode::INTERNAL_SERVER_ERROR, "Processing failed").into_response()
        }
    }
}

async fn list_datasets(State(staging): State<Arc<Staging>>) -> Response {
    let worker = staging.clone();
    match tokio::task::spawn_blocking(move || worker.list()).await {
        Ok(Ok(entries)) => Json(Value::Array(entries)).into_response(),
        Ok(Err(e)) => {
            warn!(error = %e, "could not read dataset index");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            warn!(error = %e, "index reader panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Sweep once immediately, then on every interval tick.
async fn sweep_loop(staging: Arc<Staging>) {
    let mut ticker = tokio::time::interval(staging.config().sweep_interval);
    loop {
        ticker.tick().await;
        let worker = staging.clone();
        match tokio::task::spawn_blocking(move || worker.sweep()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "sweep failed"),
            Err(e) => warn!(error = %e, "sweep worker panicked"),
        }
    }
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}

pub async fn serve(bind: SocketAddr, config: StagingConfig) -> anyhow::Result<()> {
    let staging = Staging::open(config, Arc::new(SystemIds), Arc::new(SystemClock))
        .context("opening staging area")?;
    let staging = Arc::new(staging);

    let sweeper = tokio::spawn(sweep_loop(staging.clone()));

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, "staging server listening");
    axum::serve(listener, build_router(staging))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("staging server failed")?;

    sweeper.abort();
    Ok(())
}
