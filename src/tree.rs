use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IngestError, IngestResult};
use crate::model::{id_field, JsonMap};

/// One tree node. Fields are kept exactly as the pipeline emitted them;
/// ids are read through [`id_field`], so numeric ids work as well as strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Node(pub JsonMap);

impl Node {
    pub fn sequence_id(&self) -> Option<String> {
        id_field(&self.0, "sequence_id")
    }

    pub fn parent(&self) -> Option<String> {
        id_field(&self.0, "parent")
    }
}

pub type NodeMap = BTreeMap<String, Node>;

/// Node collection as it may appear in a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Nodes {
    Sequence(Vec<Node>),
    Keyed(NodeMap),
}

/// Key each node by its own `sequence_id`, falling back to its position.
pub fn structure_nodes(nodes: Nodes) -> NodeMap {
    match nodes {
        Nodes::Keyed(map) => map,
        Nodes::Sequence(list) => list
            .into_iter()
            .enumerate()
            .map(|(idx, node)| {
                let key = node.sequence_id().unwrap_or_else(|| idx.to_string());
                (key, node)
            })
            .collect(),
    }
}

/// Rewrite a raw tree record so that `nodes` is a map. Idempotent.
pub fn structure_record(mut record: JsonMap) -> IngestResult<JsonMap> {
    let nodes = take_nodes(&mut record)?;
    let value = serde_json::to_value(nodes).map_err(|e| {
        IngestError::structural(format!("tree nodes could not be re-encoded: {e}"))
    })?;
    record.insert("nodes".into(), value);
    Ok(record)
}

/// Remove and structure the `nodes` field. Missing or null nodes yield an empty map.
pub fn take_nodes(record: &mut JsonMap) -> IngestResult<NodeMap> {
    match record.remove("nodes") {
        None | Some(Value::Null) => Ok(NodeMap::new()),
        Some(raw) => {
            let nodes: Nodes = serde_json::from_value(raw).map_err(|e| {
                let label = record
                    .get("ident")
                    .or_else(|| record.get("tree_id"))
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "<unnamed>".into());
                IngestError::structural(format!("tree {label} has malformed nodes: {e}"))
            })?;
            Ok(structure_nodes(nodes))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyIssue {
    NoRoot,
    MultipleRoots(Vec<String>),
    DanglingParent { node: String, parent: String },
    Cycle { node: String },
}

impl std::fmt::Display for TopologyIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyIssue::NoRoot => write!(f, "no root node"),
            TopologyIssue::MultipleRoots(roots) => {
                write!(f, "multiple root nodes: {}", roots.join(", "))
            }
            TopologyIssue::DanglingParent { node, parent } => {
                write!(f, "node {node} references missing parent {parent}")
            }
            TopologyIssue::Cycle { node } => write!(f, "node {node} is part of a cycle"),
        }
    }
}

/// Check that the parent edges form a single rooted tree. Empty maps are accepted.
pub fn validate_topology(nodes: &NodeMap) -> Vec<TopologyIssue> {
    if nodes.is_empty() {
        return Vec::new();
    }
    let mut issues = Vec::new();

    let roots: Vec<String> = nodes
        .iter()
        .filter(|(_, n)| n.parent().is_none())
        .map(|(k, _)| k.clone())
        .collect();
    match roots.len() {
        0 => issues.push(TopologyIssue::NoRoot),
        1 => {}
        _ => issues.push(TopologyIssue::MultipleRoots(roots)),
    }

    for (key, node) in nodes {
        if let Some(parent) = node.parent() {
            if !nodes.contains_key(&parent) {
                issues.push(TopologyIssue::DanglingParent {
                    node: key.clone(),
                    parent,
                });
            }
        }
    }

    // Walk up from each node; revisiting a node on the same walk means a cycle.
    let mut reported: HashSet<String> = HashSet::new();
    for start in nodes.keys() {
        let mut seen: HashSet<String> = HashSet::new();
        let mut cur = start.clone();
        while let Some(parent) = nodes.get(&cur).and_then(Node::parent) {
            if !seen.insert(cur.clone()) {
                if reported.insert(cur.clone()) {
                    issues.push(TopologyIssue::Cycle { node: cur });
                }
                break;
            }
            cur = parent;
        }
    }

    issues
}
