//! Ingestion pipeline for repertoire-sequencing datasets: classify uploads,
//! normalize them into datasets, clonal families and lineage trees, persist them
//! in SQLite, and stage converter output on the server side.

pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod identity;
pub mod ingest;
pub mod ipc;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod staging;
pub mod store;
pub mod tree;

pub use error::{IngestError, IngestResult};
