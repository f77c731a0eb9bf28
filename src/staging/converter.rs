use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::error::{IngestError, IngestResult};

/// External program turning a raw upload into `datasets.json`, `clones.*` and `tree.*` files.
#[derive(Debug, Clone)]
pub struct Converter {
    program: String,
    args: Vec<String>,
    seed: u64,
}

impl Converter {
    pub fn new(program: impl Into<String>, args: Vec<String>, seed: u64) -> Self {
        Self {
            program: program.into(),
            args,
            seed,
        }
    }

    /// Run to completion. A non-zero exit is a conversion failure carrying stderr.
    pub fn run(&self, input: &Path, output_dir: &Path, file_type: &str) -> IngestResult<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("-i")
            .arg(input)
            .arg("-o")
            .arg(output_dir)
            .arg("-f")
            .arg(file_type)
            .arg("--seed")
            .arg(self.seed.to_string());
        debug!(program = %self.program, input = %input.display(), "starting converter");

        let output = cmd.output().map_err(|e| {
            IngestError::Conversion(format!("could not start {}: {e}", self.program))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            return Err(IngestError::Conversion(if detail.is_empty() {
                format!("converter exited with {}", output.status)
            } else {
                detail.to_string()
            }));
        }
        Ok(())
    }
}
