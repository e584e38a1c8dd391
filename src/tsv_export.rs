//! TSV export for machine-readable run results

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::workload::RunResult;

const HEADER: &str =
    "class\toperation\tcount\tmean_us\tp50_us\tp90_us\tp95_us\tp99_us\tmax_us\tops_per_sec";

/// TSV exporter for run results
pub struct TsvExporter {
    basename: String,
}

impl TsvExporter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            basename: path.as_ref().to_string_lossy().to_string(),
        }
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(format!("{}-results.tsv", self.basename))
    }

    /// One row per (class, operation) pair, classes in run order
    pub fn export_results(&self, result: &RunResult) -> Result<PathBuf> {
        let path = self.path();
        let mut f = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        writeln!(f, "{}", HEADER)?;
        for class in &result.classes {
            for agg in &class.ops {
                let ops_per_sec = if result.wall_seconds > 0.0 {
                    agg.count as f64 / result.wall_seconds
                } else {
                    0.0
                };
                writeln!(
                    f,
                    "{}\t{}\t{}\t{:.2}\t{}\t{}\t{}\t{}\t{}\t{:.2}",
                    class.class.name(),
                    agg.op,
                    agg.count,
                    agg.mean_us,
                    agg.p50_us,
                    agg.p90_us,
                    agg.p95_us,
                    agg.p99_us,
                    agg.max_us,
                    ops_per_sec
                )?;
            }
        }

        Ok(path)
    }
}
