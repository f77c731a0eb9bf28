use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tree::NodeMap;

pub type JsonMap = serde_json::Map<String, Value>;

pub const DEFAULT_SCHEMA_VERSION: &str = "2.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Consolidated,
    Split,
    Legacy,
}

impl SourceFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceFormat::Consolidated => "consolidated",
            SourceFormat::Split => "split",
            SourceFormat::Legacy => "legacy",
        }
    }
}

/// One uploaded repertoire collection. Owns its clones and, through them, their trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub dataset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_dataset_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub clone_count: u64,
    #[serde(default)]
    pub subjects_count: u64,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub temporary: bool,
    pub upload_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    #[serde(
        rename = "format_type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_format: Option<SourceFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Opaque source fields (samples, build info, metadata...).
    #[serde(flatten)]
    pub extra: JsonMap,
}

fn default_schema_version() -> String {
    DEFAULT_SCHEMA_VERSION.to_string()
}

/// Lightweight pointer from a clone to one of its trees; never carries node data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeRef {
    pub ident: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_id: Option<String>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl TreeRef {
    pub fn key(&self) -> &str {
        if self.ident.is_empty() {
            self.tree_id.as_deref().unwrap_or_default()
        } else {
            &self.ident
        }
    }
}

/// One clonal family record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClonalFamily {
    pub ident: String,
    pub clone_id: String,
    pub dataset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trees: Vec<TreeRef>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl ClonalFamily {
    pub fn tree_ids(&self) -> Vec<String> {
        self.trees.iter().map(|t| t.key().to_string()).collect()
    }

    pub fn name(&self) -> &str {
        self.extra
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.clone_id)
    }
}

/// One lineage tree. `nodes` is always keyed by node identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub ident: String,
    pub tree_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_id: Option<String>,
    pub dataset_id: String,
    #[serde(default)]
    pub nodes: NodeMap,
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// Canonical result of normalizing one upload, whatever its source format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ingestion {
    #[serde(rename = "datasetId")]
    pub dataset_id: String,
    pub datasets: Vec<Dataset>,
    pub clones: BTreeMap<String, Vec<ClonalFamily>>,
    pub trees: Vec<Tree>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Ingestion {
    pub fn dataset(&self) -> Option<&Dataset> {
        self.datasets.first()
    }

    pub fn dataset_mut(&mut self) -> Option<&mut Dataset> {
        self.datasets.first_mut()
    }

    pub fn all_clones(&self) -> impl Iterator<Item = &ClonalFamily> {
        self.clones.values().flatten()
    }

    pub fn clone_total(&self) -> usize {
        self.clones.values().map(Vec::len).sum()
    }
}

/// Read an identifier-like field: non-empty strings, or numbers rendered as text.
pub fn id_field(map: &JsonMap, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Presence test used by shape heuristics: null, false, empty strings and zero count as absent.
pub fn has_field(map: &JsonMap, key: &str) -> bool {
    match map.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(_) => true,
    }
}
