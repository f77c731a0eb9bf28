use chrono::{TimeZone, Utc};
use olmstedd::identity::{FixedClock, SequentialIds};
use olmstedd::ingest::{Ingestor, UploadFile};
use olmstedd::model::Ingestion;
use olmstedd::{db, store, IngestError};
use rusqlite::Connection;
use serde_json::json;

fn memory_db() -> Connection {
    let conn = Connection::open_in_memory().expect("open");
    db::init_schema(&conn).expect("schema");
    conn
}

fn ingest(ids: &SequentialIds, name: &str, body: serde_json::Value) -> Ingestion {
    let clock = FixedClock(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap());
    Ingestor::new(ids, &clock)
        .process_upload(&UploadFile::new(name, body.to_string()))
        .expect("ingest")
}

fn legacy_with_tree() -> serde_json::Value {
    json!({
        "name": "panel",
        "clones": [
            {
                "clone_id": "c1",
                "sample_id": "s1",
                "trees": [{
                    "ident": "tree-a",
                    "tree_id": "ml",
                    "nodes": [
                        { "sequence_id": "naive", "parent": null, "type": "root" },
                        { "sequence_id": "x", "parent": "naive", "distance": 0.5 }
                    ]
                }]
            },
            { "clone_id": "c2" }
        ]
    })
}

#[test]
fn stored_records_read_back_unchanged() {
    let conn = memory_db();
    let ids = SequentialIds::new();
    let ingestion = ingest(&ids, "panel.json", legacy_with_tree());

    let counts = store::store_ingestion(&conn, &ingestion).expect("store");
    assert_eq!((counts.datasets, counts.clones, counts.trees), (1, 2, 1));

    let dataset = store::get_dataset(&conn, &ingestion.dataset_id)
        .expect("query")
        .expect("dataset");
    assert_eq!(Some(&dataset), ingestion.dataset());

    let clones = store::clones_for_dataset(&conn, &ingestion.dataset_id).expect("clones");
    let expected: Vec<_> = ingestion.all_clones().cloned().collect();
    assert_eq!(clones, expected);

    let tree = store::get_tree(&conn, "tree-a").expect("query").expect("tree");
    assert_eq!(tree, ingestion.trees[0]);
    assert_eq!(store::trees_by_tree_id(&conn, "ml").expect("by tree id").len(), 1);
}

#[test]
fn tree_for_clone_tries_clone_id_then_tree_ident() {
    let conn = memory_db();
    let ids = SequentialIds::new();
    let ingestion = ingest(
        &ids,
        "ident.json",
        json!({
            "clones": [{
                "ident": "clone-ident",
                "clone_id": "clone-key",
                "trees": [{ "ident": "t-1", "nodes": [] }]
            }]
        }),
    );
    store::store_ingestion(&conn, &ingestion).expect("store");

    let by_clone = store::tree_for_clone(&conn, "clone-key").expect("query").expect("by clone_id");
    assert_eq!(by_clone.ident, "t-1");
    let by_ident = store::tree_for_clone(&conn, "t-1").expect("query").expect("by tree ident");
    assert_eq!(by_ident.clone_id.as_deref(), Some("clone-key"));
    assert!(store::tree_for_clone(&conn, "other").expect("query").is_none());

    let clone = store::get_clone(&conn, &ingestion.dataset_id, "clone-ident")
        .expect("query")
        .expect("clone");
    assert_eq!(clone.clone_id, "clone-key");
}

#[test]
fn rewriting_a_clone_key_keeps_one_row() {
    let conn = memory_db();
    let ids = SequentialIds::new();
    let mut ingestion = ingest(&ids, "x.json", json!({ "clones": [{ "clone_id": "c1" }] }));
    store::store_ingestion(&conn, &ingestion).expect("first write");

    if let Some(clone) = ingestion.clones.values_mut().flatten().next() {
        clone.extra.insert("unique_seqs_count".into(), json!(11));
    }
    store::store_ingestion(&conn, &ingestion).expect("second write");

    let clones = store::clones_for_dataset(&conn, &ingestion.dataset_id).expect("clones");
    assert_eq!(clones.len(), 1);
    assert_eq!(clones[0].extra.get("unique_seqs_count"), Some(&json!(11)));
}

#[test]
fn failed_write_leaves_no_partial_rows() {
    let conn = memory_db();
    let ids = SequentialIds::new();
    let mut ingestion = ingest(&ids, "bad.json", legacy_with_tree());
    // A clone pointing at a dataset that is not part of the write violates the foreign key.
    if let Some(clone) = ingestion.clones.values_mut().flatten().nth(1) {
        clone.dataset_id = "missing-dataset".into();
    }

    let err = store::store_ingestion(&conn, &ingestion).expect_err("must fail");
    assert!(matches!(err, IngestError::Storage(_)));
    let stats = store::stats(&conn).expect("stats");
    assert_eq!((stats.datasets, stats.clones, stats.trees), (0, 0, 0));
}

#[test]
fn removal_cascades_only_within_the_dataset() {
    let conn = memory_db();
    let ids = SequentialIds::new();
    let first = ingest(&ids, "one.json", legacy_with_tree());
    let second = ingest(
        &ids,
        "two.json",
        json!({
            "clones": [{
                "clone_id": "c1",
                "trees": [{ "ident": "tree-b", "nodes": [] }]
            }]
        }),
    );
    store::store_ingestion(&conn, &first).expect("store first");
    store::store_ingestion(&conn, &second).expect("store second");

    let summary = store::remove_dataset(&conn, &first.dataset_id).expect("remove");
    assert!(summary.removed);
    assert_eq!(summary.clones, 2);
    assert_eq!(summary.trees, 1);

    assert!(store::get_dataset(&conn, &first.dataset_id).expect("q").is_none());
    assert!(store::clones_for_dataset(&conn, &first.dataset_id).expect("q").is_empty());
    assert!(store::get_tree(&conn, "tree-a").expect("q").is_none());
    // Same clone_id, other dataset: untouched.
    let survivor = store::tree_for_clone(&conn, "c1").expect("q").expect("tree");
    assert_eq!(survivor.ident, "tree-b");
    assert!(store::get_clone(&conn, &second.dataset_id, "c1").expect("q").is_some());

    let again = store::remove_dataset(&conn, &first.dataset_id).expect("remove again");
    assert!(!again.removed);
    let missing = store::remove_dataset(&conn, "never-existed").expect("remove unknown");
    assert_eq!(missing, store::RemovalSummary::default());
}

#[test]
fn datasets_list_sorted_by_name() {
    let conn = memory_db();
    let ids = SequentialIds::new();
    for name in ["zeta", "alpha", "mid"] {
        let ingestion = ingest(
            &ids,
            "f.json",
            json!({ "name": name, "clones": [{ "clone_id": name }] }),
        );
        store::store_ingestion(&conn, &ingestion).expect("store");
    }
    let names: Vec<String> = store::list_datasets(&conn)
        .expect("list")
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(names, vec!["alpha", "mid", "zeta"]);
}

#[test]
fn workspace_database_persists_between_opens() {
    let dir = std::env::temp_dir().join(format!(
        "olmsted-store-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    let ids = SequentialIds::new();
    let ingestion = ingest(&ids, "p.json", json!({ "clones": [{ "clone_id": "c" }] }));
    {
        let conn = db::open_db(&dir).expect("open");
        store::store_ingestion(&conn, &ingestion).expect("store");
    }
    let conn = db::open_db(&dir).expect("reopen");
    assert!(dir.join(db::DB_FILE).exists());
    assert_eq!(store::stats(&conn).expect("stats").clones, 1);
}
