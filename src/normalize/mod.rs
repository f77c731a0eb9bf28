//! Turn a classified upload into canonical dataset, clone and tree records.

pub mod consolidated;
pub mod legacy;
pub mod split;

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::warn;

use crate::classify::Upload;
use crate::error::IngestResult;
use crate::identity::{assign_ident, domain_id, Clock, IdGenerator};
use crate::model::{id_field, ClonalFamily, Ingestion, JsonMap, Tree, TreeRef};
use crate::tree::{take_nodes, validate_topology};

/// Identifier and time sources shared by every normalizer.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub ids: &'a dyn IdGenerator,
    pub clock: &'a dyn Clock,
}

/// Keys the `Dataset` record owns; they must not also live in its `extra` map.
const DATASET_KEYS: [&str; 11] = [
    "dataset_id",
    "original_dataset_id",
    "name",
    "clone_count",
    "subjects_count",
    "schema_version",
    "temporary",
    "upload_time",
    "original_filename",
    "format_type",
    "file_size",
];

pub fn normalize(upload: Upload, ctx: &Context<'_>) -> IngestResult<Ingestion> {
    let mut ingestion = match upload {
        Upload::Consolidated(p) => consolidated::normalize(p, ctx)?,
        Upload::Legacy(p) => legacy::normalize(p, crate::model::SourceFormat::Legacy, ctx)?,
        Upload::Split(p) => split::normalize(p, ctx)?,
    };
    check_trees(&mut ingestion);
    Ok(ingestion)
}

/// Trees with broken topology are kept; problems are surfaced as warnings.
fn check_trees(ingestion: &mut Ingestion) {
    for tree in &ingestion.trees {
        for issue in validate_topology(&tree.nodes) {
            warn!(tree = %tree.ident, %issue, "tree topology problem");
            ingestion
                .warnings
                .push(format!("tree {}: {}", tree.ident, issue));
        }
    }
}

pub(crate) fn strip_dataset_keys(raw: &mut JsonMap) {
    for key in DATASET_KEYS {
        raw.remove(key);
    }
}

pub(crate) fn count_field(map: &JsonMap, key: &str) -> Option<u64> {
    match map.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn tree_ref(mut record: JsonMap, ids: &dyn IdGenerator) -> TreeRef {
    record.remove("nodes");
    let ident = assign_ident(&mut record, ids);
    record.remove("ident");
    let tree_id = id_field(&record, "tree_id");
    record.remove("tree_id");
    TreeRef {
        ident,
        tree_id,
        extra: record,
    }
}

/// Canonical clone record. Existing inline tree references are kept without node data.
pub(crate) fn build_clone(
    mut record: JsonMap,
    dataset_id: &str,
    ids: &dyn IdGenerator,
) -> ClonalFamily {
    let ident = assign_ident(&mut record, ids);
    let clone_id = domain_id(&record, "clone_id", &ident);
    let sample_id = id_field(&record, "sample_id").or_else(|| {
        record
            .get("sample")
            .and_then(Value::as_object)
            .and_then(|s| id_field(s, "sample_id"))
    });
    let trees = match record.remove("trees") {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(t) => Some(tree_ref(t, ids)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    for key in ["ident", "clone_id", "dataset_id", "sample_id"] {
        record.remove(key);
    }
    ClonalFamily {
        ident,
        clone_id,
        dataset_id: dataset_id.to_string(),
        sample_id,
        trees,
        extra: record,
    }
}

/// Canonical tree record with structured nodes.
pub(crate) fn build_tree(
    mut record: JsonMap,
    dataset_id: &str,
    clone_id: Option<String>,
    ids: &dyn IdGenerator,
) -> IngestResult<Tree> {
    let nodes = take_nodes(&mut record)?;
    let ident = assign_ident(&mut record, ids);
    let tree_id = domain_id(&record, "tree_id", &ident);
    let clone_id = clone_id.or_else(|| id_field(&record, "clone_id"));
    for key in ["ident", "tree_id", "clone_id", "dataset_id"] {
        record.remove(key);
    }
    Ok(Tree {
        ident,
        tree_id,
        clone_id,
        dataset_id: dataset_id.to_string(),
        nodes,
        extra: record,
    })
}

/// Derive sample records from clones grouped by `sample_id`, then `subject_id`.
pub(crate) fn infer_samples(clones: &[JsonMap]) -> Vec<Value> {
    let mut samples: BTreeMap<String, Value> = BTreeMap::new();
    for clone in clones {
        let sample_id = id_field(clone, "sample_id")
            .or_else(|| id_field(clone, "subject_id"))
            .unwrap_or_else(|| "unknown".to_string());
        if samples.contains_key(&sample_id) {
            continue;
        }
        let timepoint = id_field(clone, "timepoint_id").unwrap_or_else(|| "unknown".to_string());
        let locus = id_field(clone, "locus").unwrap_or_else(|| "IGH".to_string());
        let mut sample = json!({
            "sample_id": sample_id,
            "ident": sample_id,
            "timepoint_id": timepoint,
            "locus": locus,
        });
        if let Some(subject) = id_field(clone, "subject_id") {
            sample["subject_id"] = Value::String(subject);
        }
        samples.insert(sample_id, sample);
    }
    samples.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SequentialIds;

    fn map(v: Value) -> JsonMap {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn clone_id_falls_back_to_ident() {
        let ids = SequentialIds::new();
        let c = build_clone(map(json!({ "ident": "abc", "unique_seqs_count": 4 })), "d", &ids);
        assert_eq!(c.clone_id, "abc");
        assert_eq!(c.dataset_id, "d");
        assert_eq!(c.extra.get("unique_seqs_count"), Some(&json!(4)));
        assert!(!c.extra.contains_key("ident"));
    }

    #[test]
    fn clone_sample_id_can_come_from_nested_sample() {
        let ids = SequentialIds::new();
        let c = build_clone(
            map(json!({ "clone_id": "c", "sample": { "sample_id": "s9" } })),
            "d",
            &ids,
        );
        assert_eq!(c.sample_id.as_deref(), Some("s9"));
    }

    #[test]
    fn inline_tree_refs_lose_nodes() {
        let ids = SequentialIds::new();
        let c = build_clone(
            map(json!({
                "clone_id": "c",
                "trees": [{ "ident": "t1", "tree_id": "tid", "nodes": { "a": { "parent": null } } }]
            })),
            "d",
            &ids,
        );
        assert_eq!(c.trees.len(), 1);
        assert_eq!(c.trees[0].ident, "t1");
        assert!(!c.trees[0].extra.contains_key("nodes"));
    }

    #[test]
    fn samples_are_grouped_with_defaults() {
        let clones = vec![
            map(json!({ "clone_id": "1", "sample_id": "s1", "subject_id": "p1" })),
            map(json!({ "clone_id": "2", "sample_id": "s1" })),
            map(json!({ "clone_id": "3", "subject_id": "p2", "timepoint_id": "t0", "locus": "IGK" })),
            map(json!({ "clone_id": "4" })),
        ];
        let samples = infer_samples(&clones);
        assert_eq!(samples.len(), 3);
        let s1 = samples.iter().find(|s| s["sample_id"] == "s1").expect("s1");
        assert_eq!(s1["timepoint_id"], "unknown");
        assert_eq!(s1["locus"], "IGH");
        assert_eq!(s1["subject_id"], "p1");
        let p2 = samples.iter().find(|s| s["sample_id"] == "p2").expect("p2");
        assert_eq!(p2["locus"], "IGK");
        assert!(samples.iter().any(|s| s["sample_id"] == "unknown"));
    }

    #[test]
    fn tree_gets_ident_and_tree_id() {
        let ids = SequentialIds::new();
        let t = build_tree(map(json!({ "newick": "(a);" })), "d", Some("c".into()), &ids)
            .expect("tree");
        assert_eq!(t.ident, "entity-1");
        assert_eq!(t.tree_id, "entity-1");
        assert_eq!(t.clone_id.as_deref(), Some("c"));
        assert_eq!(t.extra.get("newick"), Some(&json!("(a);")));
    }
}
