use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::{build_clone, build_tree, infer_samples, strip_dataset_keys, tree_ref, Context};
use crate::classify::LegacyPayload;
use crate::error::IngestResult;
use crate::identity::{assign_ident, domain_id};
use crate::model::{
    id_field, ClonalFamily, Dataset, Ingestion, JsonMap, SourceFormat, Tree,
    DEFAULT_SCHEMA_VERSION,
};

/// Normalize a dataset carrying its clones (and their trees) inline.
///
/// Also the final step of split uploads, which are merged into this shape first;
/// `format` records which of the two the caller started from.
pub fn normalize(
    payload: LegacyPayload,
    format: SourceFormat,
    ctx: &Context<'_>,
) -> IngestResult<Ingestion> {
    let LegacyPayload {
        filename,
        mut dataset,
        clones,
    } = payload;

    let dataset_id = ctx.ids.dataset_id();
    let original_dataset_id = id_field(&dataset, "dataset_id");

    let samples = match dataset.remove("samples") {
        Some(Value::Array(items)) if !items.is_empty() => items,
        _ => infer_samples(&clones),
    };
    let subjects: BTreeSet<Option<String>> =
        clones.iter().map(|c| id_field(c, "subject_id")).collect();
    let timepoints: BTreeSet<Option<String>> = samples
        .iter()
        .map(|s| s.as_object().and_then(|o| id_field(o, "timepoint_id")))
        .collect();

    assign_ident(&mut dataset, ctx.ids);
    let name = id_field(&dataset, "name").unwrap_or_else(|| filename.clone());
    strip_dataset_keys(&mut dataset);
    dataset.insert("samples".into(), Value::Array(samples));
    dataset.insert("timepoints_count".into(), timepoints.len().into());

    let mut families = Vec::with_capacity(clones.len());
    let mut trees = Vec::new();
    for raw in clones {
        let (family, lifted) = lift_clone(raw, &dataset_id, ctx)?;
        families.push(family);
        trees.extend(lifted);
    }

    let record = Dataset {
        dataset_id: dataset_id.clone(),
        original_dataset_id,
        name,
        clone_count: families.len() as u64,
        subjects_count: subjects.len() as u64,
        schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
        temporary: true,
        upload_time: ctx.clock.now(),
        original_filename: Some(filename),
        source_format: Some(format),
        file_size: None,
        extra: dataset,
    };

    let mut by_dataset = BTreeMap::new();
    by_dataset.insert(dataset_id.clone(), families);
    Ok(Ingestion {
        dataset_id,
        datasets: vec![record],
        clones: by_dataset,
        trees,
        warnings: Vec::new(),
    })
}

/// Pull inline trees out of a clone; the clone keeps only references.
fn lift_clone(
    mut raw: JsonMap,
    dataset_id: &str,
    ctx: &Context<'_>,
) -> IngestResult<(ClonalFamily, Vec<Tree>)> {
    let ident = assign_ident(&mut raw, ctx.ids);
    let clone_id = domain_id(&raw, "clone_id", &ident);
    raw.insert("clone_id".into(), clone_id.clone().into());

    let inline = match raw.remove("trees") {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };

    let mut refs = Vec::with_capacity(inline.len());
    let mut lifted = Vec::with_capacity(inline.len());
    for item in inline {
        let Value::Object(mut tree) = item else {
            continue;
        };
        let tree_ident = assign_ident(&mut tree, ctx.ids);
        let tree_id = domain_id(&tree, "tree_id", &tree_ident);
        tree.insert("tree_id".into(), tree_id.into());
        tree.insert("clone_id".into(), clone_id.clone().into());

        let nodes = tree.remove("nodes");
        refs.push(tree_ref(tree.clone(), ctx.ids));
        if let Some(nodes) = nodes {
            tree.insert("nodes".into(), nodes);
        }
        lifted.push(build_tree(tree, dataset_id, Some(clone_id.clone()), ctx.ids)?);
    }

    let mut family = build_clone(raw, dataset_id, ctx.ids);
    family.trees = refs;
    Ok((family, lifted))
}
