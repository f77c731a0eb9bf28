//! Client-side ingestion entry points: read uploaded files, classify, normalize.

use std::path::Path;

use tracing::{info, warn};

use crate::classify::{classify, parse_upload, Format, RawPayload, Upload};
use crate::error::{IngestError, IngestResult};
use crate::identity::{Clock, IdGenerator};
use crate::model::Ingestion;
use crate::normalize::{self, Context};

/// An uploaded file: its display name and raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn from_path(path: &Path) -> IngestResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| IngestError::io(path, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Ok(Self { name, bytes })
    }
}

/// Reject anything but plain `.json` before touching the content.
pub fn check_extension(name: &str) -> IngestResult<()> {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".gz") {
        return Err(IngestError::UnsupportedFile(format!(
            "{name}: compressed uploads must go through the staging server"
        )));
    }
    if !lower.ends_with(".json") {
        return Err(IngestError::UnsupportedFile(format!(
            "{name}: only .json files can be processed"
        )));
    }
    Ok(())
}

pub fn read_payload(file: &UploadFile) -> IngestResult<RawPayload> {
    check_extension(&file.name)?;
    let value = serde_json::from_slice(&file.bytes).map_err(|source| IngestError::InvalidJson {
        filename: file.name.clone(),
        source,
    })?;
    Ok(RawPayload {
        filename: file.name.clone(),
        value,
        size: file.bytes.len() as u64,
    })
}

pub struct Ingestor<'a> {
    ids: &'a dyn IdGenerator,
    clock: &'a dyn Clock,
}

impl<'a> Ingestor<'a> {
    pub fn new(ids: &'a dyn IdGenerator, clock: &'a dyn Clock) -> Self {
        Self { ids, clock }
    }

    fn context(&self) -> Context<'a> {
        Context {
            ids: self.ids,
            clock: self.clock,
        }
    }

    /// Ingest one file in consolidated or legacy form.
    pub fn process_upload(&self, file: &UploadFile) -> IngestResult<Ingestion> {
        let payload = read_payload(file)?;
        let size = payload.size;
        let upload = parse_upload(vec![payload])?;
        self.finish(upload, size, 1)
    }

    /// Ingest several files as one split dataset. `Ok(None)` when the batch is not a
    /// split upload, so the caller can fall back to one upload per file.
    pub fn process_multiple_files(&self, files: &[UploadFile]) -> IngestResult<Option<Ingestion>> {
        let payloads = files
            .iter()
            .map(read_payload)
            .collect::<IngestResult<Vec<_>>>()?;
        if payloads.len() < 2 || classify(&payloads) != Format::Split {
            return Ok(None);
        }
        let size = payloads.iter().map(|p| p.size).sum();
        let count = payloads.len();
        let upload = parse_upload(payloads)?;
        self.finish(upload, size, count).map(Some)
    }

    fn finish(&self, upload: Upload, size: u64, files: usize) -> IngestResult<Ingestion> {
        let format = upload.format();
        let mut ingestion = normalize::normalize(upload, &self.context())?;
        if let Some(dataset) = ingestion.dataset_mut() {
            dataset.file_size = Some(size);
        }
        for w in &ingestion.warnings {
            warn!(dataset = %ingestion.dataset_id, "{w}");
        }
        info!(
            dataset = %ingestion.dataset_id,
            format = format.as_str(),
            files,
            clones = ingestion.clone_total(),
            trees = ingestion.trees.len(),
            "normalized upload"
        );
        Ok(ingestion)
    }
}
