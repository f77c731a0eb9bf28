//! Expiry of temporary staged datasets.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{IngestError, IngestResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub expired: Vec<String>,
    pub files_removed: usize,
    pub kept: usize,
}

/// Fields of an index entry the sweep cares about; everything else is carried untouched.
#[derive(Debug, Deserialize)]
struct IndexEntry {
    #[serde(default)]
    dataset_id: Option<String>,
    #[serde(default)]
    temporary: bool,
    #[serde(default)]
    upload_time: Option<String>,
}

fn expired_id(entry: &Value, now: DateTime<Utc>, ttl: Duration) -> Option<String> {
    let parsed = IndexEntry::deserialize(entry).ok()?;
    if !parsed.temporary {
        return None;
    }
    // Entries with an unreadable upload time are kept rather than guessed at.
    let uploaded = DateTime::parse_from_rfc3339(parsed.upload_time.as_deref()?).ok()?;
    if now.signed_duration_since(uploaded.with_timezone(&Utc)) > ttl {
        parsed.dataset_id.filter(|id| !id.is_empty())
    } else {
        None
    }
}

/// Split index entries into those to keep and the ids of expired temporary datasets.
pub fn partition_expired(
    entries: Vec<Value>,
    now: DateTime<Utc>,
    ttl: Duration,
) -> (Vec<Value>, Vec<String>) {
    let mut kept = Vec::with_capacity(entries.len());
    let mut expired = Vec::new();
    for entry in entries {
        match expired_id(&entry, now, ttl) {
            Some(id) => expired.push(id),
            None => kept.push(entry),
        }
    }
    (kept, expired)
}

/// Index id of an entry, if it has a usable one.
pub fn entry_id(entry: &Value) -> Option<String> {
    entry
        .get("dataset_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Staged files carry `temp-<datasetId>` followed by `-` or `.` in their name.
/// Ids may themselves contain `-`, so this alone cannot tell `a` from `a-b`;
/// [`delete_staged_files`] resolves that against the other known ids.
pub fn is_staged_file(file_name: &str, dataset_id: &str) -> bool {
    let infix = format!("temp-{dataset_id}");
    file_name.match_indices(&infix).any(|(at, m)| {
        matches!(
            file_name[at + m.len()..].chars().next(),
            Some('-') | Some('.')
        )
    })
}

/// Delete a dataset's staged files. A file that also matches a longer id from
/// `known_ids` belongs to that dataset and is left alone. Individual failures
/// are logged and skipped.
pub fn delete_staged_files(
    data_dir: &Path,
    dataset_id: &str,
    known_ids: &[String],
) -> IngestResult<usize> {
    let entries = match std::fs::read_dir(data_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(IngestError::io(data_dir, e)),
    };
    let mut removed = 0;
    for entry in entries {
        let entry = match entry {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "could not read staging directory entry");
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_staged_file(&name, dataset_id) {
            continue;
        }
        let claimed_by_longer = known_ids
            .iter()
            .any(|other| other.len() > dataset_id.len() && is_staged_file(&name, other));
        if claimed_by_longer {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                info!(file = %name, dataset = dataset_id, "removed expired staged file");
                removed += 1;
            }
            Err(e) => warn!(file = %name, error = %e, "could not remove staged file"),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn only_old_temporary_entries_expire() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let entries = vec![
            json!({ "dataset_id": "old", "temporary": true, "upload_time": "2024-01-01T00:00:00Z" }),
            json!({ "dataset_id": "fresh", "temporary": true, "upload_time": "2024-01-02T11:00:00Z" }),
            json!({ "dataset_id": "permanent", "upload_time": "2020-01-01T00:00:00Z" }),
            json!({ "dataset_id": "garbled", "temporary": true, "upload_time": "yesterday" }),
        ];
        let (kept, expired) = partition_expired(entries, now, Duration::hours(24));
        assert_eq!(expired, vec!["old".to_string()]);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn deletion_leaves_files_of_longer_ids_alone() {
        let dir = std::env::temp_dir().join(format!(
            "olmsted-sweep-prefix-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("dir");
        for name in ["clones.temp-a-1.json", "clones.temp-a-b-1.json", "temp-a-b-extra.json"] {
            std::fs::write(dir.join(name), "[]").expect("seed");
        }
        let known = vec!["a".to_string(), "a-b".to_string()];

        let removed = delete_staged_files(&dir, "a", &known).expect("delete");
        assert_eq!(removed, 1);
        assert!(!dir.join("clones.temp-a-1.json").exists());
        assert!(dir.join("clones.temp-a-b-1.json").exists());
        assert!(dir.join("temp-a-b-extra.json").exists());

        assert_eq!(delete_staged_files(&dir, "a-b", &known).expect("delete"), 2);
    }

    #[test]
    fn staged_file_matching_respects_id_boundaries() {
        assert!(is_staged_file("clones.temp-abc-1.json", "abc"));
        assert!(is_staged_file("tree.temp-abc-x.json", "abc"));
        assert!(is_staged_file("clones.temp-abc.json", "abc"));
        assert!(!is_staged_file("clones.temp-abcd-1.json", "abc"));
        assert!(!is_staged_file("datasets.json", "abc"));
    }
}
