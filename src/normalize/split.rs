use std::collections::HashSet;

use tracing::{debug, warn};

use super::{build_tree, legacy, tree_ref, Context};
use crate::classify::{LegacyPayload, SplitPayload};
use crate::error::{IngestError, IngestResult};
use crate::model::{id_field, Ingestion, JsonMap, SourceFormat};

/// Merge a dataset file with its clone and tree files, then normalize as one dataset.
pub fn normalize(payload: SplitPayload, ctx: &Context<'_>) -> IngestResult<Ingestion> {
    let SplitPayload {
        filenames,
        datasets,
        clones,
        trees,
        ignored,
    } = payload;

    let mut datasets = datasets.into_iter();
    let dataset = match (datasets.next(), datasets.next()) {
        (None, _) => {
            return Err(IngestError::structural(
                "no dataset found in split upload; expected a datasets.json file",
            ))
        }
        (Some(_), Some(_)) => {
            return Err(IngestError::structural(
                "multiple datasets found; please upload one dataset at a time",
            ))
        }
        (Some(d), None) => d,
    };

    let mut warnings: Vec<String> = ignored
        .iter()
        .map(|f| format!("{f}: not recognized as dataset, clones or trees; skipped"))
        .collect();

    let source_key = id_field(&dataset, "dataset_id").or_else(|| id_field(&dataset, "ident"));
    let (owned, foreign): (Vec<JsonMap>, Vec<JsonMap>) = clones
        .into_iter()
        .partition(|c| belongs_to(c, source_key.as_deref()));
    if !foreign.is_empty() {
        warn!(count = foreign.len(), "split clones reference another dataset");
        warnings.push(format!(
            "{} clones reference a different dataset and were skipped",
            foreign.len()
        ));
    }

    let clone_keys: HashSet<String> = owned
        .iter()
        .flat_map(|c| [id_field(c, "clone_id"), id_field(c, "ident")])
        .flatten()
        .collect();
    let (owned_trees, orphan_trees): (Vec<JsonMap>, Vec<JsonMap>) =
        trees.into_iter().partition(|t| {
            id_field(t, "clone_id")
                .map(|id| clone_keys.contains(&id))
                .unwrap_or(false)
        });
    if !orphan_trees.is_empty() {
        warn!(count = orphan_trees.len(), "split trees match no clone");
        warnings.push(format!(
            "{} trees match no clone of this dataset and were skipped",
            orphan_trees.len()
        ));
    }

    debug!(
        files = filenames.len(),
        clones = owned.len(),
        trees = owned_trees.len(),
        "merging split upload"
    );

    let merged = LegacyPayload {
        filename: format!("Split files ({} files)", filenames.len()),
        dataset,
        clones: owned,
    };
    let mut ingestion = legacy::normalize(merged, SourceFormat::Split, ctx)?;

    for record in owned_trees {
        let clone_id = id_field(&record, "clone_id");
        let tree = build_tree(record, &ingestion.dataset_id, clone_id, ctx.ids)?;
        attach_ref(&mut ingestion, &tree, ctx);
        ingestion.trees.push(tree);
    }
    ingestion.warnings.extend(warnings);
    Ok(ingestion)
}

fn belongs_to(clone: &JsonMap, source_key: Option<&str>) -> bool {
    match id_field(clone, "dataset_id") {
        None => true,
        Some(id) => {
            Some(id.as_str()) == source_key
                || id_field(clone, "sample_id").as_deref() == source_key
        }
    }
}

/// Give the owning clone a reference to a tree that arrived in its own file.
fn attach_ref(ingestion: &mut Ingestion, tree: &crate::model::Tree, ctx: &Context<'_>) {
    let Some(clone_id) = tree.clone_id.as_deref() else {
        return;
    };
    let owner = ingestion
        .clones
        .values_mut()
        .flatten()
        .find(|c| c.clone_id == clone_id || c.ident == clone_id);
    if let Some(owner) = owner {
        if owner.trees.iter().any(|r| r.ident == tree.ident) {
            return;
        }
        let mut record = JsonMap::new();
        record.insert("ident".into(), tree.ident.clone().into());
        record.insert("tree_id".into(), tree.tree_id.clone().into());
        owner.trees.push(tree_ref(record, ctx.ids));
    }
}
