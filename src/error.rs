use std::path::PathBuf;

use thiserror::Error;

/// Formats tried by the classifier, in the order they are reported to users.
pub const EXPECTED_FORMATS: &str =
    "consolidated (metadata + datasets + clones + trees), split (datasets.json + clones.*.json + tree.*.json), legacy (dataset with inline clones)";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unrecognized upload format in {files}; expected one of: {expected}")]
    Classification { files: String, expected: &'static str },

    #[error("{0}")]
    Structural(String),

    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("storage failed: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("failed to parse JSON from {filename}: {source}")]
    InvalidJson {
        filename: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    UnsupportedFile(String),

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type IngestResult<T> = Result<T, IngestError>;

impl IngestError {
    pub fn structural(message: impl Into<String>) -> Self {
        IngestError::Structural(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn unrecognized(filenames: &[&str]) -> Self {
        IngestError::Classification {
            files: filenames.join(", "),
            expected: EXPECTED_FORMATS,
        }
    }

    /// Stable code used in IPC error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::Classification { .. } => "unrecognized_format",
            IngestError::Structural(_) => "structural_error",
            IngestError::Conversion(_) => "conversion_failed",
            IngestError::Storage(_) => "db_write_failed",
            IngestError::InvalidJson { .. } => "invalid_json",
            IngestError::UnsupportedFile(_) => "unsupported_file",
            IngestError::Io { .. } => "io_failed",
        }
    }

    /// Whether the failure was caused by the caller's input rather than the host.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IngestError::Classification { .. }
                | IngestError::Structural(_)
                | IngestError::InvalidJson { .. }
                | IngestError::UnsupportedFile(_)
        )
    }
}
