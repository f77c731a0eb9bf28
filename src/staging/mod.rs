//! Server-side staging: run the converter on an upload, publish its output as a
//! temporary dataset, and expire temporary datasets after a TTL.

pub mod converter;
pub mod index;
pub mod sweep;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::StagingConfig;
use crate::error::{IngestError, IngestResult};
use crate::identity::{Clock, IdGenerator};
use crate::model::JsonMap;

pub use converter::Converter;
pub use index::IndexWriter;
pub use sweep::SweepReport;

/// Result of a successful staged upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedUpload {
    pub success: bool,
    pub dataset_id: String,
    pub dataset: JsonMap,
}

pub struct Staging {
    config: StagingConfig,
    converter: Converter,
    index: IndexWriter,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Staging {
    pub fn open(
        config: StagingConfig,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> IngestResult<Self> {
        for dir in [
            config.data_dir.clone(),
            config.uploads_dir(),
            config.scratch_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| IngestError::io(&dir, e))?;
        }
        let converter = Converter::new(
            config.converter.clone(),
            config.converter_args.clone(),
            config.seed,
        );
        let index = IndexWriter::spawn(&config.data_dir)?;
        Ok(Self {
            config,
            converter,
            index,
            ids,
            clock,
        })
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    /// Fresh path under the uploads directory for an incoming file.
    pub fn upload_path(&self, original_name: &str) -> PathBuf {
        let ext = Path::new(original_name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        self.config.uploads_dir().join(format!(
            "file-{}-{}{}",
            self.clock.now().timestamp_millis(),
            self.ids.entity_id(),
            ext
        ))
    }

    /// Convert an uploaded file and publish the result as a temporary dataset.
    /// The upload itself is always deleted afterwards.
    pub fn process_upload(
        &self,
        upload: &Path,
        file_type: Option<&str>,
        original_name: &str,
    ) -> IngestResult<StagedUpload> {
        let result = self.stage(upload, file_type.unwrap_or("auto"), original_name);
        if let Err(e) = std::fs::remove_file(upload) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(file = %upload.display(), error = %e, "could not delete upload");
            }
        }
        match &result {
            Ok(staged) => info!(dataset = %staged.dataset_id, file = original_name, "staged upload"),
            Err(e) => warn!(file = original_name, error = %e, "staging failed"),
        }
        result
    }

    fn stage(&self, upload: &Path, file_type: &str, original_name: &str) -> IngestResult<StagedUpload> {
        let scratch = self
            .config
            .scratch_dir()
            .join(format!("upload-{}", self.ids.entity_id()));
        std::fs::create_dir_all(&scratch).map_err(|e| IngestError::io(&scratch, e))?;

        let result = self.convert_and_publish(upload, &scratch, file_type, original_name);
        if let Err(e) = std::fs::remove_dir_all(&scratch) {
            warn!(dir = %scratch.display(), error = %e, "could not remove scratch directory");
        }
        result
    }

    fn convert_and_publish(
        &self,
        upload: &Path,
        scratch: &Path,
        file_type: &str,
        original_name: &str,
    ) -> IngestResult<StagedUpload> {
        self.converter.run(upload, scratch, file_type)?;

        let produced = scratch.join("datasets.json");
        if !produced.exists() {
            return Err(IngestError::Conversion(
                "converter did not produce datasets.json".to_string(),
            ));
        }
        let mut dataset = first_dataset(&produced)?;

        let dataset_id = self.ids.staging_id();
        dataset.insert("dataset_id".into(), dataset_id.clone().into());
        dataset.insert("temporary".into(), true.into());
        dataset.insert("upload_time".into(), self.clock.now().to_rfc3339().into());
        dataset.insert("original_filename".into(), original_name.into());

        let published = self
            .publish_files(scratch, &dataset_id)
            .and_then(|()| self.index.append(dataset.clone()));
        if let Err(e) = published {
            // Nothing in the index points at these files, so the sweep would never find them.
            if let Err(cleanup) = sweep::delete_staged_files(&self.config.data_dir, &dataset_id, &[]) {
                warn!(dataset = %dataset_id, error = %cleanup, "could not remove unpublished files");
            }
            return Err(e);
        }

        Ok(StagedUpload {
            success: true,
            dataset_id,
            dataset,
        })
    }

    /// Move converter output next to the index, tagging names with the dataset id.
    fn publish_files(&self, scratch: &Path, dataset_id: &str) -> IngestResult<()> {
        let entries = std::fs::read_dir(scratch).map_err(|e| IngestError::io(scratch, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| IngestError::io(scratch, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(target) = staged_name(&name, dataset_id) else {
                continue;
            };
            let dest = self.config.data_dir.join(target);
            std::fs::rename(entry.path(), &dest).map_err(|e| IngestError::io(&dest, e))?;
        }
        Ok(())
    }

    pub fn list(&self) -> IngestResult<Vec<Value>> {
        self.index.read()
    }

    pub fn sweep(&self) -> IngestResult<SweepReport> {
        self.sweep_at(self.clock.now())
    }

    pub fn sweep_at(&self, now: chrono::DateTime<chrono::Utc>) -> IngestResult<SweepReport> {
        let ttl = chrono::Duration::from_std(self.config.ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let report = self.index.expire(now, ttl)?;
        if !report.expired.is_empty() {
            info!(
                expired = report.expired.len(),
                files = report.files_removed,
                "swept temporary datasets"
            );
        }
        Ok(report)
    }
}

fn first_dataset(path: &Path) -> IngestResult<JsonMap> {
    let text = std::fs::read_to_string(path).map_err(|e| IngestError::io(path, e))?;
    let value: Value = serde_json::from_str(&text).map_err(|source| IngestError::InvalidJson {
        filename: "datasets.json".to_string(),
        source,
    })?;
    let first = match value {
        Value::Array(items) => items.into_iter().next(),
        other => Some(other),
    };
    match first {
        Some(Value::Object(obj)) => Ok(obj),
        _ => Err(IngestError::Conversion(
            "converter output datasets.json holds no dataset".to_string(),
        )),
    }
}

/// Published name for a converter output file; `None` for files that stay behind.
pub fn staged_name(file_name: &str, dataset_id: &str) -> Option<String> {
    if file_name == "datasets.json" {
        return None;
    }
    for prefix in ["clones.", "tree."] {
        if let Some(rest) = file_name.strip_prefix(prefix) {
            return Some(format!("{prefix}temp-{dataset_id}-{rest}"));
        }
    }
    Some(format!("temp-{dataset_id}-{file_name}"))
}
