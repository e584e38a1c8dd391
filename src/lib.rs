// src/lib.rs

pub mod config;
pub mod constants; // Tunables and defaults in one place
pub mod counters; // Shared key-space counters, ops budget, shutdown flag
pub mod docs; // Deterministic document bodies
pub mod error;
pub mod hot_workload; // Moving hot working-set timer
pub mod keys; // Key-space models
pub mod metrics; // Histogram merge of shard reservoirs
pub mod rate_controller; // Closed-loop batch pacing
pub mod reservoir; // Per-shard latency sampling
pub mod results_dir; // Results directory management
pub mod sink; // Where reservoir dumps go
pub mod store; // Storage client seam + in-memory backend
pub mod tsv_export; // TSV export for machine-readable results
pub mod worker;
pub mod workload; // Orchestrator


pub use config::{Config, WorkloadClass};
pub use error::{RunError, StoreError, WorkerError};
pub use workload::{start, RunHandle, RunResult};
