use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{id_field, JsonMap};

const SUFFIX_LEN: usize = 9;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Source of every synthetic identifier minted during ingestion and staging.
pub trait IdGenerator: Send + Sync {
    /// Fresh dataset identifier for a client-side ingestion (`upload-<millis>-<rand>`).
    fn dataset_id(&self) -> String;
    /// Identifier for clones/trees that arrived without one.
    fn entity_id(&self) -> String;
    /// Identifier for a dataset staged by the server (`temp-<millis>-<rand>`).
    fn staging_id(&self) -> String;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Wall clock plus randomness. Collisions are treated as impossible.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIds;

impl IdGenerator for SystemIds {
    fn dataset_id(&self) -> String {
        format!("upload-{}-{}", Utc::now().timestamp_millis(), random_suffix())
    }

    fn entity_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn staging_id(&self) -> String {
        format!("temp-{}-{}", Utc::now().timestamp_millis(), random_suffix())
    }
}

/// Deterministic identifiers for tests: `upload-1`, `entity-2`, `temp-3`, ...
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl IdGenerator for SequentialIds {
    fn dataset_id(&self) -> String {
        format!("upload-{}", self.bump())
    }

    fn entity_id(&self) -> String {
        format!("entity-{}", self.bump())
    }

    fn staging_id(&self) -> String {
        format!("temp-{}", self.bump())
    }
}

fn random_suffix() -> String {
    let mut n = Uuid::new_v4().as_u128();
    let mut out = String::with_capacity(SUFFIX_LEN);
    for _ in 0..SUFFIX_LEN {
        out.push(BASE36[(n % 36) as usize] as char);
        n /= 36;
    }
    out
}

/// Keep the record's `ident` when usable, otherwise mint one. Writes the result back.
pub fn assign_ident(record: &mut JsonMap, ids: &dyn IdGenerator) -> String {
    let ident = id_field(record, "ident").unwrap_or_else(|| ids.entity_id());
    record.insert("ident".into(), ident.clone().into());
    ident
}

/// Domain identifier (`clone_id`, `tree_id`) falling back to the record's ident.
pub fn domain_id(record: &JsonMap, key: &str, ident: &str) -> String {
    id_field(record, key).unwrap_or_else(|| ident.to_string())
}
