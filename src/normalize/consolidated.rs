use std::collections::{BTreeMap, HashSet};

use serde_json::{json, Value};
use tracing::warn;

use super::{build_clone, build_tree, count_field, strip_dataset_keys, Context};
use crate::classify::ConsolidatedPayload;
use crate::error::{IngestError, IngestResult};
use crate::model::{id_field, ClonalFamily, Dataset, Ingestion, SourceFormat, DEFAULT_SCHEMA_VERSION};

const CLIENT_BUILD_COMMIT: &str = "client-side-processing";

/// Normalize a single-file upload carrying metadata, datasets, clones and trees.
/// Only the first dataset is ingested.
pub fn normalize(payload: ConsolidatedPayload, ctx: &Context<'_>) -> IngestResult<Ingestion> {
    let ConsolidatedPayload {
        filename,
        metadata,
        datasets,
        clones,
        trees,
    } = payload;

    let total = datasets.len();
    let Some(mut raw) = datasets.into_iter().next() else {
        return Err(IngestError::structural(
            "consolidated format missing datasets array",
        ));
    };
    let mut warnings = Vec::new();
    if total > 1 {
        warn!(total, "consolidated upload has several datasets; keeping the first");
        warnings.push(format!(
            "{} datasets present; only the first was imported",
            total
        ));
    }

    let dataset_id = ctx.ids.dataset_id();
    let original_dataset_id = id_field(&raw, "dataset_id");

    let families: Vec<ClonalFamily> = clones
        .take_for(original_dataset_id.as_deref())
        .into_iter()
        .map(|c| build_clone(c, &dataset_id, ctx.ids))
        .collect();

    // With several datasets in the file, only trees of the kept clones belong here.
    let clone_keys: HashSet<&str> = families
        .iter()
        .flat_map(|c| [c.clone_id.as_str(), c.ident.as_str()])
        .collect();
    let mut kept_trees = Vec::with_capacity(trees.len());
    for record in trees {
        let clone_id = id_field(&record, "clone_id");
        if total > 1
            && !clone_id
                .as_deref()
                .map(|id| clone_keys.contains(id))
                .unwrap_or(false)
        {
            continue;
        }
        kept_trees.push(build_tree(record, &dataset_id, clone_id, ctx.ids)?);
    }

    let name = id_field(&raw, "name")
        .or_else(|| id_field(&metadata, "name"))
        .unwrap_or_else(|| filename.clone());
    let clone_count = if families.is_empty() {
        count_field(&raw, "clone_count").unwrap_or(0)
    } else {
        families.len() as u64
    };
    let subjects_count = count_field(&raw, "subjects_count")
        .filter(|n| *n > 0)
        .unwrap_or(1);
    let schema_version = id_field(&raw, "schema_version")
        .or_else(|| id_field(&metadata, "schema_version"))
        .unwrap_or_else(|| DEFAULT_SCHEMA_VERSION.to_string());

    let now = ctx.clock.now();
    strip_dataset_keys(&mut raw);
    if !raw.get("build").map(Value::is_object).unwrap_or(false) {
        raw.insert(
            "build".into(),
            json!({ "time": now.to_rfc3339(), "commit": CLIENT_BUILD_COMMIT }),
        );
    }
    raw.insert("metadata".into(), Value::Object(metadata));

    let record = Dataset {
        dataset_id: dataset_id.clone(),
        original_dataset_id,
        name,
        clone_count,
        subjects_count,
        schema_version,
        temporary: true,
        upload_time: now,
        original_filename: Some(filename),
        source_format: Some(SourceFormat::Consolidated),
        file_size: None,
        extra: raw,
    };

    let mut by_dataset = BTreeMap::new();
    by_dataset.insert(dataset_id.clone(), families);
    Ok(Ingestion {
        dataset_id,
        datasets: vec![record],
        clones: by_dataset,
        trees: kept_trees,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{parse_upload, RawPayload, Upload};
    use crate::identity::{FixedClock, SequentialIds};
    use chrono::Utc;

    fn consolidated(v: Value) -> ConsolidatedPayload {
        match parse_upload(vec![RawPayload::new("bundle.json", v)]).expect("parse") {
            Upload::Consolidated(p) => p,
            other => panic!("expected consolidated, got {:?}", other.format()),
        }
    }

    #[test]
    fn scenario_like_bundle_normalizes() {
        let ids = SequentialIds::new();
        let clock = FixedClock(Utc::now());
        let ctx = Context {
            ids: &ids,
            clock: &clock,
        };
        let out = normalize(
            consolidated(json!({
                "metadata": { "name": "M", "schema_version": "3.1.0" },
                "datasets": [{ "dataset_id": "D" }],
                "clones": { "D": [{ "clone_id": "c1" }, { "clone_id": "c2" }] },
                "trees": [{ "tree_id": "t1", "clone_id": "c1", "nodes": [] }]
            })),
            &ctx,
        )
        .expect("normalize");

        let ds = out.dataset().expect("dataset");
        assert!(ds.dataset_id.starts_with("upload-"));
        assert_eq!(ds.original_dataset_id.as_deref(), Some("D"));
        assert_eq!(ds.name, "M");
        assert_eq!(ds.clone_count, 2);
        assert_eq!(ds.subjects_count, 1);
        assert_eq!(ds.schema_version, "3.1.0");
        assert_eq!(
            ds.extra.get("build").and_then(|b| b.get("commit")),
            Some(&json!(CLIENT_BUILD_COMMIT))
        );
        assert!(ds.extra.contains_key("metadata"));

        assert_eq!(out.clone_total(), 2);
        assert!(out.all_clones().all(|c| c.dataset_id == ds.dataset_id));
        assert_eq!(out.trees.len(), 1);
        assert_eq!(out.trees[0].tree_id, "t1");
        assert_eq!(out.trees[0].dataset_id, ds.dataset_id);
        assert!(!out.trees[0].ident.is_empty());
    }

    #[test]
    fn empty_datasets_is_structural() {
        let ids = SequentialIds::new();
        let clock = FixedClock(Utc::now());
        let ctx = Context {
            ids: &ids,
            clock: &clock,
        };
        let err = normalize(
            consolidated(json!({ "metadata": {}, "datasets": [], "clones": {}, "trees": [] })),
            &ctx,
        )
        .expect_err("must fail");
        assert!(matches!(err, IngestError::Structural(_)));
        assert!(err.to_string().contains("missing datasets"));
    }

    #[test]
    fn clones_fall_back_to_first_group_and_name_to_filename() {
        let ids = SequentialIds::new();
        let clock = FixedClock(Utc::now());
        let ctx = Context {
            ids: &ids,
            clock: &clock,
        };
        let out = normalize(
            consolidated(json!({
                "metadata": {},
                "datasets": [{ "dataset_id": "renamed", "clone_count": 9 }],
                "clones": { "old-key": [{ "clone_id": "x" }] },
                "trees": []
            })),
            &ctx,
        )
        .expect("normalize");
        let ds = out.dataset().expect("dataset");
        assert_eq!(ds.name, "bundle.json");
        assert_eq!(ds.clone_count, 1);
        assert_eq!(out.clone_total(), 1);
    }

    #[test]
    fn several_datasets_keep_only_the_first_with_its_clones_and_trees() {
        let ids = SequentialIds::new();
        let clock = FixedClock(Utc::now());
        let ctx = Context {
            ids: &ids,
            clock: &clock,
        };
        let keyed = json!({
            "n0": { "parent": null, "type": "internal", "distance": 1 },
            "n1": { "parent": "n0", "type": "leaf", "distance": 2 }
        });
        let out = normalize(
            consolidated(json!({
                "metadata": {},
                "datasets": [{ "dataset_id": "A" }, { "dataset_id": "B" }],
                "clones": {
                    "A": [{ "clone_id": "a1" }, { "clone_id": "a2" }],
                    "B": [{ "clone_id": "b1" }]
                },
                "trees": [
                    { "tree_id": "ta", "clone_id": "a1", "nodes": keyed.clone() },
                    { "tree_id": "tb", "clone_id": "b1", "nodes": [] }
                ]
            })),
            &ctx,
        )
        .expect("normalize");

        let ds = out.dataset().expect("dataset");
        assert_eq!(ds.original_dataset_id.as_deref(), Some("A"));
        let mut clone_ids: Vec<&str> = out.all_clones().map(|c| c.clone_id.as_str()).collect();
        clone_ids.sort();
        assert_eq!(clone_ids, vec!["a1", "a2"]);

        assert_eq!(out.trees.len(), 1);
        assert_eq!(out.trees[0].tree_id, "ta");
        assert_eq!(out.trees[0].clone_id.as_deref(), Some("a1"));
        assert_eq!(serde_json::to_value(&out.trees[0].nodes).expect("nodes"), keyed);

        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("2 datasets"), "{:?}", out.warnings);
    }
}
