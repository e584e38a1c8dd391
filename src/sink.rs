//! Destinations for reservoir dumps

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::reservoir::ReservoirDump;

/// Persists one shard's dump. Called exactly once per shard, at termination.
#[async_trait]
pub trait LatencySink: Send + Sync {
    async fn persist(&self, dump: &ReservoirDump) -> Result<()>;
}

/// Writes `<class>-<sid>.json` into a directory
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn path_for(&self, dump: &ReservoirDump) -> PathBuf {
        self.dir.join(format!("{}.json", dump.name()))
    }
}

#[async_trait]
impl LatencySink for JsonFileSink {
    async fn persist(&self, dump: &ReservoirDump) -> Result<()> {
        let path = self.path_for(dump);
        let json = serde_json::to_vec_pretty(dump).context("serialize reservoir dump")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Reservoir {} written to {}", dump.name(), path.display());
        Ok(())
    }
}

/// Keeps dumps in memory (tests and library callers that post-process)
#[derive(Debug, Default)]
pub struct MemorySink {
    dumps: Mutex<Vec<ReservoirDump>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dumps(&self) -> Vec<ReservoirDump> {
        self.dumps.lock().clone()
    }
}

#[async_trait]
impl LatencySink for MemorySink {
    async fn persist(&self, dump: &ReservoirDump) -> Result<()> {
        self.dumps.lock().push(dump.clone());
        Ok(())
    }
}
