#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Duration, TimeZone, Utc};
use olmstedd::config::StagingConfig;
use olmstedd::identity::{FixedClock, SequentialIds};
use olmstedd::staging::Staging;
use olmstedd::IngestError;
use serde_json::json;

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

const CONVERTER_OK: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -i) IN="$2"; shift 2 ;;
    -o) OUT="$2"; shift 2 ;;
    -f) FT="$2"; shift 2 ;;
    *) shift ;;
  esac
done
test -f "$IN" || { echo "input missing" >&2; exit 4; }
mkdir -p "$OUT"
printf '[{"name":"converted","file_type":"%s"}]' "$FT" > "$OUT/datasets.json"
printf '[{"clone_id":"c1"}]' > "$OUT/clones.abc.json"
printf '{"tree_id":"t1"}' > "$OUT/tree.t1.json"
"#;

const CONVERTER_FAILS: &str = "#!/bin/sh\necho boom >&2\nexit 3\n";

const CONVERTER_SILENT: &str = "#!/bin/sh\nexit 0\n";

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

fn open_staging(root: &Path, script: &str) -> Staging {
    let script_path = root.join("convert.sh");
    std::fs::write(&script_path, script).expect("write converter");
    let mut config = StagingConfig::new(root.join("data"), "sh");
    config.converter_args = vec![script_path.to_string_lossy().to_string()];
    Staging::open(
        config,
        Arc::new(SequentialIds::new()),
        Arc::new(FixedClock(t0())),
    )
    .expect("open staging")
}

fn place_upload(staging: &Staging, name: &str) -> PathBuf {
    let path = staging.upload_path(name);
    std::fs::write(&path, json!({ "raw": true }).to_string()).expect("write upload");
    path
}

fn dir_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn upload_publishes_converter_output() {
    let root = temp_dir("olmsted-stage-ok");
    let staging = open_staging(&root, CONVERTER_OK);
    let upload = place_upload(&staging, "airr.json");

    let staged = staging
        .process_upload(&upload, None, "airr.json")
        .expect("stage");
    assert!(staged.success);
    let id = staged.dataset_id.clone();
    assert!(id.starts_with("temp-"), "{id}");
    assert_eq!(staged.dataset.get("name"), Some(&json!("converted")));
    assert_eq!(staged.dataset.get("file_type"), Some(&json!("auto")));
    assert_eq!(staged.dataset.get("temporary"), Some(&json!(true)));
    assert_eq!(
        staged.dataset.get("upload_time"),
        Some(&json!(t0().to_rfc3339()))
    );
    assert_eq!(staged.dataset.get("original_filename"), Some(&json!("airr.json")));

    let data = root.join("data");
    assert!(data.join(format!("clones.temp-{id}-abc.json")).exists());
    assert!(data.join(format!("tree.temp-{id}-t1.json")).exists());
    assert!(!upload.exists(), "upload should be consumed");
    assert!(dir_names(&data.join("temp")).is_empty(), "scratch left behind");

    let index = staging.list().expect("index");
    assert_eq!(index.len(), 1);
    assert_eq!(index[0]["dataset_id"], id.as_str());
}

#[test]
fn file_type_is_passed_to_converter() {
    let root = temp_dir("olmsted-stage-type");
    let staging = open_staging(&root, CONVERTER_OK);
    let upload = place_upload(&staging, "x.json");
    let staged = staging
        .process_upload(&upload, Some("airr"), "x.json")
        .expect("stage");
    assert_eq!(staged.dataset.get("file_type"), Some(&json!("airr")));
}

#[test]
fn converter_failure_cleans_up() {
    let root = temp_dir("olmsted-stage-fail");
    let staging = open_staging(&root, CONVERTER_FAILS);
    let upload = place_upload(&staging, "bad.json");

    let err = staging
        .process_upload(&upload, None, "bad.json")
        .expect_err("must fail");
    assert!(matches!(err, IngestError::Conversion(_)));
    assert!(err.to_string().contains("boom"), "{err}");
    assert!(!upload.exists());
    assert!(dir_names(&root.join("data").join("temp")).is_empty());
    assert!(staging.list().expect("index").is_empty());
}

#[test]
fn converter_without_output_is_a_conversion_error() {
    let root = temp_dir("olmsted-stage-silent");
    let staging = open_staging(&root, CONVERTER_SILENT);
    let upload = place_upload(&staging, "quiet.json");
    let err = staging
        .process_upload(&upload, None, "quiet.json")
        .expect_err("must fail");
    assert!(err.to_string().contains("datasets.json"), "{err}");
    assert!(!upload.exists());
}

#[test]
fn unreadable_index_rolls_back_published_files() {
    let root = temp_dir("olmsted-stage-bad-index");
    let data = root.join("data");
    std::fs::create_dir_all(&data).expect("data dir");
    std::fs::write(data.join("datasets.json"), "{ not json").expect("seed index");

    let staging = open_staging(&root, CONVERTER_OK);
    let upload = place_upload(&staging, "a.json");
    let err = staging
        .process_upload(&upload, None, "a.json")
        .expect_err("index append must fail");
    assert!(matches!(err, IngestError::InvalidJson { .. }), "{err}");

    let names = dir_names(&data);
    assert!(
        !names.iter().any(|n| n.contains("temp-")),
        "published files left behind: {names:?}"
    );
    assert_eq!(
        std::fs::read_to_string(data.join("datasets.json")).expect("index"),
        "{ not json"
    );
}

#[test]
fn sweep_expires_only_old_temporary_datasets() {
    let root = temp_dir("olmsted-stage-sweep");
    let data = root.join("data");
    std::fs::create_dir_all(&data).expect("data dir");
    std::fs::write(
        data.join("datasets.json"),
        json!([{ "dataset_id": "permanent", "name": "kept" }]).to_string(),
    )
    .expect("seed index");
    std::fs::write(data.join("clones.permanent.json"), "[]").expect("seed clones");

    let staging = open_staging(&root, CONVERTER_OK);
    let upload = place_upload(&staging, "a.json");
    let staged = staging.process_upload(&upload, None, "a.json").expect("stage");
    assert_eq!(staging.list().expect("index").len(), 2);

    let early = staging.sweep_at(t0() + Duration::hours(1)).expect("early sweep");
    assert!(early.expired.is_empty());
    assert_eq!(early.files_removed, 0);
    assert_eq!(staging.list().expect("index").len(), 2);

    let late = staging.sweep_at(t0() + Duration::hours(25)).expect("late sweep");
    assert_eq!(late.expired, vec![staged.dataset_id.clone()]);
    assert_eq!(late.files_removed, 2);
    assert_eq!(late.kept, 1);

    let index = staging.list().expect("index");
    assert_eq!(index.len(), 1);
    assert_eq!(index[0]["dataset_id"], "permanent");
    assert_eq!(
        dir_names(&data)
            .into_iter()
            .filter(|n| n.starts_with("clones.") || n.starts_with("tree."))
            .collect::<Vec<_>>(),
        vec!["clones.permanent.json".to_string()]
    );
}

#[test]
fn concurrent_uploads_all_reach_the_index() {
    let root = temp_dir("olmsted-stage-concurrent");
    let staging = Arc::new(open_staging(&root, CONVERTER_OK));

    std::thread::scope(|scope| {
        for i in 0..6 {
            let staging = staging.clone();
            scope.spawn(move || {
                let name = format!("file{i}.json");
                let upload = place_upload(&staging, &name);
                staging.process_upload(&upload, None, &name).expect("stage");
            });
        }
    });

    let index = staging.list().expect("index");
    assert_eq!(index.len(), 6);
    let mut ids: Vec<&str> = index
        .iter()
        .filter_map(|e| e["dataset_id"].as_str())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 6);
}
