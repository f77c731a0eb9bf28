use rusqlite::Connection;
use serde_json::json;

use super::error::{err, ok};
use super::types::{AppState, Request};
use crate::error::IngestError;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    /// Storage failures while only reading are reported as query failures.
    pub fn query(e: IngestError) -> Self {
        match e {
            IngestError::Storage(inner) => Self {
                code: "db_query_failed",
                message: inner.to_string(),
                details: None,
            },
            other => other.into(),
        }
    }
}

impl From<IngestError> for HandlerErr {
    fn from(e: IngestError) -> Self {
        let details = match &e {
            IngestError::Classification { files, expected } => {
                Some(json!({ "files": files, "expected": expected }))
            }
            IngestError::InvalidJson { filename, .. } => Some(json!({ "file": filename })),
            _ => None,
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
}

/// Run a handler body that needs the workspace database.
pub fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&AppState, &Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(state, conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}
