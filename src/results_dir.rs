//! Results directory management
//!
//! Every run gets its own directory holding:
//! - one reservoir dump per shard (`<class>-<sid>.json`)
//! - the optional TSV table
//! - a copy of the config
//! - run metadata and the merged summary (JSON)
//!
//! Directory format: spring-{YYYYMMDD}-{HHMM}-{run_name}/

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{RESULTS_DIR_PREFIX, RUN_METADATA_FILE};
use crate::workload::RunResult;

/// Metadata about a run
#[derive(Debug, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub run_name: String,
    pub config_path: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_secs: Option<f64>,
    pub command_line: Vec<String>,
    /// `completed`, `interrupted` or `failed`
    pub outcome: Option<String>,
}

impl RunMetadata {
    pub fn new(run_name: String, config_path: String) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            run_name,
            config_path,
            start_time: Local::now().to_rfc3339(),
            end_time: None,
            duration_secs: None,
            command_line: std::env::args().collect(),
            outcome: None,
        }
    }

    pub fn finalize(&mut self, duration_secs: f64, outcome: &str) {
        self.end_time = Some(Local::now().to_rfc3339());
        self.duration_secs = Some(duration_secs);
        self.outcome = Some(outcome.to_string());
    }
}

/// Results directory manager
pub struct ResultsDir {
    path: PathBuf,
    metadata: RunMetadata,
}

impl ResultsDir {
    /// Create a new results directory with the standard naming convention
    ///
    /// # Arguments
    /// * `config_path` - Path to the config file (copied, and its stem is the default run name)
    /// * `custom_name` - Optional run name to use instead of the config file stem
    /// * `base_dir` - Optional base directory (defaults to current directory)
    pub fn create(config_path: &Path, custom_name: Option<&str>, base_dir: Option<&Path>) -> Result<Self> {
        let run_name = match custom_name {
            Some(name) => name.to_string(),
            None => config_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("run")
                .to_string(),
        };

        let now = Local::now();
        let dir_name = format!("{}-{}-{}", RESULTS_DIR_PREFIX, now.format("%Y%m%d-%H%M"), run_name);
        let base = base_dir.unwrap_or_else(|| Path::new("."));
        let dir_path = base.join(dir_name);

        fs::create_dir_all(&dir_path)
            .with_context(|| format!("Failed to create results directory: {}", dir_path.display()))?;

        fs::copy(config_path, dir_path.join("config.yaml"))
            .with_context(|| "Failed to copy config to results directory".to_string())?;

        let metadata = RunMetadata::new(run_name, config_path.to_string_lossy().to_string());
        tracing::info!("Created results directory: {}", dir_path.display());

        Ok(Self { path: dir_path, metadata })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_name(&self) -> &str {
        &self.metadata.run_name
    }

    /// Base name handed to the TSV exporter
    pub fn tsv_basename(&self) -> PathBuf {
        self.path.join(&self.metadata.run_name)
    }

    pub fn write_metadata(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.metadata)
            .with_context(|| "Failed to serialize metadata")?;
        fs::write(self.path.join(RUN_METADATA_FILE), json)
            .with_context(|| format!("Failed to write {}", RUN_METADATA_FILE))?;
        Ok(())
    }

    /// Persist the merged per-class results
    pub fn write_summary(&self, result: &RunResult) -> Result<PathBuf> {
        let path = self.path.join("summary.json");
        let json = serde_json::to_string_pretty(result)
            .with_context(|| "Failed to serialize run summary")?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Write final metadata
    pub fn finalize(&mut self, duration_secs: f64, outcome: &str) -> Result<()> {
        self.metadata.finalize(duration_secs, outcome);
        self.write_metadata()?;
        tracing::info!("Results saved to: {}", self.path.display());
        Ok(())
    }
}
