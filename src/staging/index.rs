//! The staged dataset index (`datasets.json`), owned by a single writer thread.
//!
//! Uploads and the sweep both rewrite the file; routing every read-modify-write
//! through one thread keeps concurrent requests from losing each other's entries.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, error};

use super::sweep::{delete_staged_files, entry_id, partition_expired, SweepReport};
use crate::error::{IngestError, IngestResult};
use crate::model::JsonMap;

enum IndexCommand {
    Append {
        entry: JsonMap,
        response: mpsc::Sender<IngestResult<()>>,
    },
    Expire {
        now: DateTime<Utc>,
        ttl: Duration,
        response: mpsc::Sender<IngestResult<SweepReport>>,
    },
    Read {
        response: mpsc::Sender<IngestResult<Vec<Value>>>,
    },
}

/// Handle to the index writer thread. Cheap to clone; the thread exits when the
/// last handle is dropped.
#[derive(Debug, Clone)]
pub struct IndexWriter {
    sender: mpsc::Sender<IndexCommand>,
    path: PathBuf,
}

impl std::fmt::Debug for IndexCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IndexCommand::Append { .. } => "Append",
            IndexCommand::Expire { .. } => "Expire",
            IndexCommand::Read { .. } => "Read",
        };
        f.write_str(name)
    }
}

impl IndexWriter {
    /// Start the writer for `data_dir/datasets.json`.
    pub fn spawn(data_dir: &Path) -> IngestResult<Self> {
        let path = data_dir.join("datasets.json");
        let (sender, receiver) = mpsc::channel();
        let dir = data_dir.to_path_buf();
        let thread_path = path.clone();
        thread::Builder::new()
            .name("olmsted-index-writer".to_string())
            .spawn(move || index_writer_loop(&dir, &thread_path, &receiver))
            .map_err(|e| IngestError::io(&path, e))?;
        Ok(Self { sender, path })
    }

    fn closed(&self) -> IngestError {
        IngestError::io(
            &self.path,
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "index writer stopped"),
        )
    }

    fn submit<T>(
        &self,
        command: IndexCommand,
        response: mpsc::Receiver<IngestResult<T>>,
    ) -> IngestResult<T> {
        self.sender.send(command).map_err(|_| self.closed())?;
        response.recv().map_err(|_| self.closed())?
    }

    pub fn append(&self, entry: JsonMap) -> IngestResult<()> {
        let (tx, rx) = mpsc::channel();
        self.submit(IndexCommand::Append { entry, response: tx }, rx)
    }

    pub fn expire(&self, now: DateTime<Utc>, ttl: Duration) -> IngestResult<SweepReport> {
        let (tx, rx) = mpsc::channel();
        self.submit(
            IndexCommand::Expire {
                now,
                ttl,
                response: tx,
            },
            rx,
        )
    }

    pub fn read(&self) -> IngestResult<Vec<Value>> {
        let (tx, rx) = mpsc::channel();
        self.submit(IndexCommand::Read { response: tx }, rx)
    }
}

fn index_writer_loop(data_dir: &Path, path: &Path, receiver: &mpsc::Receiver<IndexCommand>) {
    while let Ok(command) = receiver.recv() {
        debug!(?command, "index command");
        match command {
            IndexCommand::Append { entry, response } => {
                let outcome = read_index(path).and_then(|mut entries| {
                    entries.push(Value::Object(entry));
                    write_index(path, &entries)
                });
                if let Err(e) = &outcome {
                    error!(error = %e, "failed to append to dataset index");
                }
                let _ = response.send(outcome);
            }
            IndexCommand::Expire {
                now,
                ttl,
                response,
            } => {
                let _ = response.send(expire(data_dir, path, now, ttl));
            }
            IndexCommand::Read { response } => {
                let _ = response.send(read_index(path));
            }
        }
    }
    debug!("index writer stopped");
}

fn expire(
    data_dir: &Path,
    path: &Path,
    now: DateTime<Utc>,
    ttl: Duration,
) -> IngestResult<SweepReport> {
    let entries = read_index(path)?;
    let known: Vec<String> = entries.iter().filter_map(entry_id).collect();
    let (kept, expired) = partition_expired(entries, now, ttl);
    let mut report = SweepReport {
        kept: kept.len(),
        ..SweepReport::default()
    };
    if expired.is_empty() {
        return Ok(report);
    }
    for id in &expired {
        report.files_removed += delete_staged_files(data_dir, id, &known)?;
    }
    write_index(path, &kept)?;
    report.expired = expired;
    Ok(report)
}

/// A missing index is empty; a single object is treated as a one-entry list.
pub fn read_index(path: &Path) -> IngestResult<Vec<Value>> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(IngestError::io(path, e)),
    };
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(&text).map_err(|source| IngestError::InvalidJson {
        filename: path.to_string_lossy().to_string(),
        source,
    })?;
    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}

fn write_index(path: &Path, entries: &[Value]) -> IngestResult<()> {
    let text = serde_json::to_string_pretty(entries).map_err(|source| IngestError::InvalidJson {
        filename: path.to_string_lossy().to_string(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, text).map_err(|e| IngestError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| IngestError::io(path, e))?;
    Ok(())
}
