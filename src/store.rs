//! SQLite persistence for datasets, clones and trees.
//!
//! Every record is stored whole as JSON next to the columns used for lookups, so
//! reading back yields exactly what was written.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::IngestResult;
use crate::model::{ClonalFamily, Dataset, Ingestion, Tree};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCounts {
    pub datasets: usize,
    pub clones: usize,
    pub trees: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalSummary {
    pub removed: bool,
    pub clones: usize,
    pub trees: usize,
}

fn encode<T: Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn decode<T: DeserializeOwned>(text: &str) -> rusqlite::Result<T> {
    serde_json::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn query_records<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> IngestResult<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for text in rows {
        out.push(decode(&text)?);
    }
    Ok(out)
}

fn query_record<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> IngestResult<Option<T>> {
    let text: Option<String> = conn.query_row(sql, args, |r| r.get(0)).optional()?;
    match text {
        Some(t) => Ok(Some(decode(&t)?)),
        None => Ok(None),
    }
}

/// Persist a whole ingestion atomically: either every row lands or none does.
pub fn store_ingestion(conn: &Connection, ingestion: &Ingestion) -> IngestResult<StoreCounts> {
    let tx = conn.unchecked_transaction()?;
    match write_ingestion(&tx, ingestion) {
        Ok(counts) => {
            tx.commit()?;
            info!(
                dataset = %ingestion.dataset_id,
                clones = counts.clones,
                trees = counts.trees,
                "stored ingestion"
            );
            Ok(counts)
        }
        Err(e) => {
            let _ = tx.rollback();
            Err(e)
        }
    }
}

fn write_ingestion(tx: &Transaction<'_>, ingestion: &Ingestion) -> IngestResult<StoreCounts> {
    let mut counts = StoreCounts::default();
    for dataset in &ingestion.datasets {
        upsert_dataset(tx, dataset)?;
        counts.datasets += 1;
    }
    for clone in ingestion.all_clones() {
        upsert_clone(tx, clone)?;
        counts.clones += 1;
    }
    for tree in &ingestion.trees {
        upsert_tree(tx, tree)?;
        counts.trees += 1;
    }
    Ok(counts)
}

fn upsert_dataset(conn: &Connection, dataset: &Dataset) -> IngestResult<()> {
    conn.execute(
        "INSERT INTO datasets(dataset_id, name, clone_count, temporary, upload_time, format_type, record)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(dataset_id) DO UPDATE SET
            name = excluded.name,
            clone_count = excluded.clone_count,
            temporary = excluded.temporary,
            upload_time = excluded.upload_time,
            format_type = excluded.format_type,
            record = excluded.record",
        params![
            dataset.dataset_id,
            dataset.name,
            dataset.clone_count as i64,
            dataset.temporary as i64,
            dataset.upload_time.to_rfc3339(),
            dataset.source_format.map(|f| f.as_str()),
            encode(dataset)?,
        ],
    )?;
    Ok(())
}

fn upsert_clone(conn: &Connection, clone: &ClonalFamily) -> IngestResult<()> {
    conn.execute(
        "INSERT INTO clones(dataset_id, clone_id, ident, sample_id, name, tree_ids, record)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(dataset_id, clone_id) DO UPDATE SET
            ident = excluded.ident,
            sample_id = excluded.sample_id,
            name = excluded.name,
            tree_ids = excluded.tree_ids,
            record = excluded.record",
        params![
            clone.dataset_id,
            clone.clone_id,
            clone.ident,
            clone.sample_id,
            clone.name(),
            encode(&clone.tree_ids())?,
            encode(clone)?,
        ],
    )?;
    Ok(())
}

fn upsert_tree(conn: &Connection, tree: &Tree) -> IngestResult<()> {
    conn.execute(
        "INSERT INTO trees(ident, tree_id, clone_id, dataset_id, record)
         VALUES(?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(ident) DO UPDATE SET
            tree_id = excluded.tree_id,
            clone_id = excluded.clone_id,
            dataset_id = excluded.dataset_id,
            record = excluded.record",
        params![
            tree.ident,
            tree.tree_id,
            tree.clone_id,
            tree.dataset_id,
            encode(tree)?,
        ],
    )?;
    Ok(())
}

pub fn list_datasets(conn: &Connection) -> IngestResult<Vec<Dataset>> {
    query_records(
        conn,
        "SELECT record FROM datasets ORDER BY name, dataset_id",
        [],
    )
}

pub fn get_dataset(conn: &Connection, dataset_id: &str) -> IngestResult<Option<Dataset>> {
    query_record(
        conn,
        "SELECT record FROM datasets WHERE dataset_id = ?1",
        [dataset_id],
    )
}

pub fn clones_for_dataset(conn: &Connection, dataset_id: &str) -> IngestResult<Vec<ClonalFamily>> {
    query_records(
        conn,
        "SELECT record FROM clones WHERE dataset_id = ?1 ORDER BY clone_id",
        [dataset_id],
    )
}

/// Look up a clone by `clone_id`, or by `ident` when no clone_id matches.
pub fn get_clone(
    conn: &Connection,
    dataset_id: &str,
    key: &str,
) -> IngestResult<Option<ClonalFamily>> {
    query_record(
        conn,
        "SELECT record FROM clones
         WHERE dataset_id = ?1 AND (clone_id = ?2 OR ident = ?2)
         ORDER BY clone_id = ?2 DESC
         LIMIT 1",
        [dataset_id, key],
    )
}

pub fn get_tree(conn: &Connection, ident: &str) -> IngestResult<Option<Tree>> {
    query_record(conn, "SELECT record FROM trees WHERE ident = ?1", [ident])
}

pub fn trees_by_tree_id(conn: &Connection, tree_id: &str) -> IngestResult<Vec<Tree>> {
    query_records(
        conn,
        "SELECT record FROM trees WHERE tree_id = ?1 ORDER BY ident",
        [tree_id],
    )
}

/// First tree whose `clone_id` matches, else the tree whose own `ident` is `key`.
pub fn tree_for_clone(conn: &Connection, key: &str) -> IngestResult<Option<Tree>> {
    let by_clone = query_record(
        conn,
        "SELECT record FROM trees WHERE clone_id = ?1 ORDER BY ident LIMIT 1",
        [key],
    )?;
    match by_clone {
        Some(tree) => Ok(Some(tree)),
        None => get_tree(conn, key),
    }
}

/// Remove a dataset with its clones and their trees in one transaction.
/// Unknown ids are a no-op.
pub fn remove_dataset(conn: &Connection, dataset_id: &str) -> IngestResult<RemovalSummary> {
    let tx = conn.unchecked_transaction()?;
    let result = (|| -> IngestResult<RemovalSummary> {
        // Trees go first; they are owned through the dataset's clones.
        let trees = tx.execute("DELETE FROM trees WHERE dataset_id = ?1", [dataset_id])?;
        let clones = tx.execute("DELETE FROM clones WHERE dataset_id = ?1", [dataset_id])?;
        let removed = tx.execute("DELETE FROM datasets WHERE dataset_id = ?1", [dataset_id])? > 0;
        Ok(RemovalSummary {
            removed,
            clones,
            trees,
        })
    })();
    match result {
        Ok(summary) => {
            tx.commit()?;
            if summary.removed {
                info!(dataset = dataset_id, clones = summary.clones, trees = summary.trees, "removed dataset");
            } else {
                debug!(dataset = dataset_id, "remove requested for unknown dataset");
            }
            Ok(summary)
        }
        Err(e) => {
            let _ = tx.rollback();
            Err(e)
        }
    }
}

pub fn stats(conn: &Connection) -> IngestResult<StoreCounts> {
    let count = |table: &str| -> IngestResult<usize> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
        Ok(n as usize)
    };
    Ok(StoreCounts {
        datasets: count("datasets")?,
        clones: count("clones")?,
        trees: count("trees")?,
    })
}

/// Wipe every record. Returns what was removed.
pub fn clear_all(conn: &Connection) -> IngestResult<StoreCounts> {
    let tx = conn.unchecked_transaction()?;
    let result = (|| -> IngestResult<StoreCounts> {
        let trees = tx.execute("DELETE FROM trees", [])?;
        let clones = tx.execute("DELETE FROM clones", [])?;
        let datasets = tx.execute("DELETE FROM datasets", [])?;
        Ok(StoreCounts {
            datasets,
            clones,
            trees,
        })
    })();
    match result {
        Ok(counts) => {
            tx.commit()?;
            info!(datasets = counts.datasets, "cleared store");
            Ok(counts)
        }
        Err(e) => {
            let _ = tx.rollback();
            Err(e)
        }
    }
}
