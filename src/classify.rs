//! Decide which ingestion format a set of parsed payloads uses, and split them into
//! typed variants so the normalizers never have to re-test shapes.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{IngestError, IngestResult};
use crate::model::{has_field, JsonMap};

/// One parsed file of an upload batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub filename: String,
    pub value: Value,
    pub size: u64,
}

impl RawPayload {
    pub fn new(filename: impl Into<String>, value: Value) -> Self {
        Self {
            filename: filename.into(),
            value,
            size: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Consolidated,
    Split,
    Legacy,
    Unrecognized,
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Consolidated => "consolidated",
            Format::Split => "split",
            Format::Legacy => "legacy",
            Format::Unrecognized => "unrecognized",
        }
    }
}

/// Role a single file plays inside a split upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitRole {
    Datasets,
    Clones,
    Trees,
}

/// Clone records of a consolidated file, normally keyed by the source dataset id.
#[derive(Debug, Clone, PartialEq)]
pub enum CloneGroups {
    ByDataset(BTreeMap<String, Vec<JsonMap>>),
    Flat(Vec<JsonMap>),
}

impl CloneGroups {
    /// Clones for `dataset_id`, falling back to the first group when no key matches.
    pub fn take_for(self, dataset_id: Option<&str>) -> Vec<JsonMap> {
        match self {
            CloneGroups::Flat(list) => list,
            CloneGroups::ByDataset(mut groups) => {
                if let Some(found) = dataset_id.and_then(|id| groups.remove(id)) {
                    return found;
                }
                groups.into_values().next().unwrap_or_default()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedPayload {
    pub filename: String,
    pub metadata: JsonMap,
    pub datasets: Vec<JsonMap>,
    pub clones: CloneGroups,
    pub trees: Vec<JsonMap>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegacyPayload {
    pub filename: String,
    /// Dataset fields with the inline `clones` array removed.
    pub dataset: JsonMap,
    pub clones: Vec<JsonMap>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SplitPayload {
    pub filenames: Vec<String>,
    pub datasets: Vec<JsonMap>,
    pub clones: Vec<JsonMap>,
    pub trees: Vec<JsonMap>,
    /// Files that matched no role; reported but not fatal.
    pub ignored: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Upload {
    Consolidated(ConsolidatedPayload),
    Split(SplitPayload),
    Legacy(LegacyPayload),
}

impl Upload {
    pub fn format(&self) -> Format {
        match self {
            Upload::Consolidated(_) => Format::Consolidated,
            Upload::Split(_) => Format::Split,
            Upload::Legacy(_) => Format::Legacy,
        }
    }
}

const CONSOLIDATED_KEYS: [&str; 4] = ["metadata", "datasets", "clones", "trees"];
const TREE_FIELDS: [&str; 2] = ["newick", "tree_id"];
const DATASET_ONLY_FIELDS: [&str; 3] = ["samples", "clone_count", "subjects_count"];

pub fn classify(payloads: &[RawPayload]) -> Format {
    match payloads {
        [] => Format::Unrecognized,
        [single] => {
            if is_consolidated(&single.value) {
                Format::Consolidated
            } else if is_legacy(&single.value) {
                Format::Legacy
            } else {
                Format::Unrecognized
            }
        }
        many => {
            if is_split(many) {
                Format::Split
            } else {
                Format::Unrecognized
            }
        }
    }
}

/// Classify and take the payloads apart into the matching typed variant.
pub fn parse_upload(payloads: Vec<RawPayload>) -> IngestResult<Upload> {
    match classify(&payloads) {
        Format::Consolidated => {
            let single = payloads.into_iter().next().map(|p| (p.filename, p.value));
            match single {
                Some((filename, Value::Object(obj))) => {
                    Ok(Upload::Consolidated(into_consolidated(filename, obj)?))
                }
                _ => Err(IngestError::structural("consolidated payload is not an object")),
            }
        }
        Format::Legacy => {
            let single = payloads.into_iter().next().map(|p| (p.filename, p.value));
            match single {
                Some((filename, Value::Object(obj))) => {
                    Ok(Upload::Legacy(into_legacy(filename, obj)?))
                }
                _ => Err(IngestError::structural("legacy payload is not an object")),
            }
        }
        Format::Split => Ok(Upload::Split(into_split(payloads))),
        Format::Unrecognized => {
            let names: Vec<&str> = payloads.iter().map(|p| p.filename.as_str()).collect();
            Err(IngestError::unrecognized(&names))
        }
    }
}

fn is_consolidated(value: &Value) -> bool {
    match value.as_object() {
        Some(obj) => CONSOLIDATED_KEYS
            .iter()
            .all(|k| obj.get(*k).map(|v| !v.is_null()).unwrap_or(false)),
        None => false,
    }
}

fn is_legacy(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    if obj.contains_key("datasets") || obj.contains_key("trees") {
        return false;
    }
    match obj.get("clones") {
        Some(Value::Array(items)) => items.iter().all(Value::is_object),
        _ => false,
    }
}

fn is_split(payloads: &[RawPayload]) -> bool {
    if payloads.len() < 2 {
        return false;
    }
    let hints: Vec<Option<SplitRole>> = payloads.iter().map(|p| filename_role(&p.filename)).collect();
    let named_dataset = hints.contains(&Some(SplitRole::Datasets));
    let named_other =
        hints.contains(&Some(SplitRole::Clones)) || hints.contains(&Some(SplitRole::Trees));

    let has_array = payloads.iter().any(|p| p.value.is_array());
    let has_dataset_object = payloads
        .iter()
        .any(|p| p.value.as_object().map(is_dataset_item).unwrap_or(false));

    (named_dataset && named_other) || (has_array && has_dataset_object)
}

/// Role suggested by the conventional split file names.
pub fn filename_role(filename: &str) -> Option<SplitRole> {
    let name = filename.to_ascii_lowercase();
    if name.contains("dataset") {
        Some(SplitRole::Datasets)
    } else if name.contains("clones.") {
        Some(SplitRole::Clones)
    } else if name.contains("tree.") {
        Some(SplitRole::Trees)
    } else {
        None
    }
}

fn is_dataset_item(item: &JsonMap) -> bool {
    (has_field(item, "dataset_id") || has_field(item, "ident"))
        && !has_field(item, "clone_id")
        && !TREE_FIELDS.iter().any(|f| has_field(item, f))
}

fn is_clone_item(item: &JsonMap) -> bool {
    if TREE_FIELDS.iter().any(|f| has_field(item, f)) {
        return false;
    }
    if DATASET_ONLY_FIELDS.iter().any(|f| has_field(item, f)) {
        return false;
    }
    // A dataset_id alone marks a dataset; next to a clone_id it is just the owner reference.
    has_field(item, "clone_id") || (has_field(item, "ident") && !has_field(item, "dataset_id"))
}

fn is_tree_item(item: &JsonMap) -> bool {
    TREE_FIELDS.iter().any(|f| has_field(item, f))
}

fn content_matches(value: &Value, pred: fn(&JsonMap) -> bool) -> bool {
    match value {
        Value::Array(items) => {
            !items.is_empty()
                && items
                    .iter()
                    .all(|v| v.as_object().map(pred).unwrap_or(false))
        }
        Value::Object(obj) => pred(obj),
        _ => false,
    }
}

pub fn is_dataset_content(value: &Value) -> bool {
    content_matches(value, is_dataset_item)
}

pub fn is_clones_content(value: &Value) -> bool {
    content_matches(value, is_clone_item)
}

pub fn is_tree_content(value: &Value) -> bool {
    content_matches(value, is_tree_item)
}

/// Decide the role of one split file. Tree fields win; dataset/clone overlaps are
/// settled by the file name, then by shape (objects are datasets, arrays are clones).
pub fn split_role(payload: &RawPayload) -> Option<SplitRole> {
    if is_tree_content(&payload.value) {
        return Some(SplitRole::Trees);
    }
    let dataset = is_dataset_content(&payload.value);
    let clones = is_clones_content(&payload.value);
    match (dataset, clones) {
        (true, false) => Some(SplitRole::Datasets),
        (false, true) => Some(SplitRole::Clones),
        (true, true) => match filename_role(&payload.filename) {
            Some(SplitRole::Clones) => Some(SplitRole::Clones),
            Some(SplitRole::Datasets) => Some(SplitRole::Datasets),
            _ if payload.value.is_array() => Some(SplitRole::Clones),
            _ => Some(SplitRole::Datasets),
        },
        (false, false) => None,
    }
}

fn into_records(value: Value) -> Vec<JsonMap> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(obj) => Some(obj),
                _ => None,
            })
            .collect(),
        Value::Object(obj) => vec![obj],
        _ => Vec::new(),
    }
}

fn into_split(payloads: Vec<RawPayload>) -> SplitPayload {
    let mut out = SplitPayload::default();
    for payload in payloads {
        let role = split_role(&payload);
        out.filenames.push(payload.filename.clone());
        match role {
            Some(SplitRole::Datasets) => out.datasets.extend(into_records(payload.value)),
            Some(SplitRole::Clones) => out.clones.extend(into_records(payload.value)),
            Some(SplitRole::Trees) => out.trees.extend(into_records(payload.value)),
            None => out.ignored.push(payload.filename),
        }
    }
    out
}

fn into_consolidated(filename: String, mut obj: JsonMap) -> IngestResult<ConsolidatedPayload> {
    let metadata = match obj.remove("metadata") {
        Some(Value::Object(m)) => m,
        _ => JsonMap::new(),
    };
    let datasets = match obj.remove("datasets") {
        Some(Value::Array(items)) => into_records(Value::Array(items)),
        _ => {
            return Err(IngestError::structural(
                "consolidated format missing datasets array",
            ))
        }
    };
    let clones = match obj.remove("clones") {
        Some(Value::Object(groups)) => CloneGroups::ByDataset(
            groups
                .into_iter()
                .map(|(k, v)| (k, into_records(v)))
                .collect(),
        ),
        Some(Value::Array(items)) => CloneGroups::Flat(into_records(Value::Array(items))),
        _ => {
            return Err(IngestError::structural(
                "consolidated format clones must be an object keyed by dataset id",
            ))
        }
    };
    let trees = match obj.remove("trees") {
        Some(v @ Value::Array(_)) => into_records(v),
        _ => {
            return Err(IngestError::structural(
                "consolidated format trees must be an array",
            ))
        }
    };
    Ok(ConsolidatedPayload {
        filename,
        metadata,
        datasets,
        clones,
        trees,
    })
}

fn into_legacy(filename: String, mut obj: JsonMap) -> IngestResult<LegacyPayload> {
    let clones = match obj.remove("clones") {
        Some(v @ Value::Array(_)) => into_records(v),
        _ => {
            return Err(IngestError::structural(
                "invalid dataset: missing or invalid clones array",
            ))
        }
    };
    Ok(LegacyPayload {
        filename,
        dataset: obj,
        clones,
    })
}
