use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

pub const DEFAULT_TTL_HOURS: u64 = 24;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_MAX_UPLOAD_MB: usize = 100;

#[derive(Debug, Parser)]
#[command(name = "olmstedd", version, about = "Repertoire dataset ingestion sidecar")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Speak JSON lines on stdin/stdout (the default).
    Ipc,
    /// Run the HTTP staging server.
    Serve(ServeArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    #[arg(long, env = "OLMSTED_BIND", default_value = "127.0.0.1:4000")]
    pub bind: SocketAddr,

    /// Directory holding uploads, scratch output and the dataset index.
    #[arg(long, env = "OLMSTED_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Program that converts raw uploads into dataset files.
    #[arg(long, env = "OLMSTED_CONVERTER", default_value = "python3")]
    pub converter: String,

    /// Leading arguments passed to the converter, before the input/output flags.
    #[arg(long = "converter-arg", env = "OLMSTED_CONVERTER_ARGS", value_delimiter = ',', default_value = "bin/process_data.py")]
    pub converter_args: Vec<String>,

    #[arg(long, env = "OLMSTED_TTL_HOURS", default_value_t = DEFAULT_TTL_HOURS)]
    pub ttl_hours: u64,

    #[arg(long, env = "OLMSTED_SWEEP_INTERVAL_SECS", default_value_t = DEFAULT_SWEEP_INTERVAL_SECS)]
    pub sweep_interval_secs: u64,

    #[arg(long, env = "OLMSTED_MAX_UPLOAD_MB", default_value_t = DEFAULT_MAX_UPLOAD_MB)]
    pub max_upload_mb: usize,
}

/// Settings for the staging area, shared by the HTTP server and the IPC methods.
#[derive(Debug, Clone, PartialEq)]
pub struct StagingConfig {
    pub data_dir: PathBuf,
    pub converter: String,
    pub converter_args: Vec<String>,
    pub seed: u64,
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub max_upload_bytes: usize,
}

impl StagingConfig {
    pub fn new(data_dir: impl Into<PathBuf>, converter: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            converter: converter.into(),
            converter_args: Vec::new(),
            seed: 42,
            ttl: Duration::from_secs(DEFAULT_TTL_HOURS * 3600),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.data_dir.join("temp")
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("datasets.json")
    }
}

impl From<&ServeArgs> for StagingConfig {
    fn from(args: &ServeArgs) -> Self {
        let mut cfg = StagingConfig::new(args.data_dir.clone(), args.converter.clone());
        cfg.converter_args = args.converter_args.clone();
        cfg.ttl = Duration::from_secs(args.ttl_hours * 3600);
        cfg.sweep_interval = Duration::from_secs(args.sweep_interval_secs.max(1));
        cfg.max_upload_bytes = args.max_upload_mb * 1024 * 1024;
        cfg
    }
}
