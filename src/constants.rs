// src/constants.rs
//
// Central location for all constants used throughout spring-bench
// This makes tuning and maintenance easier by having all magic numbers in one place

// =============================================================================
// Batch Execution & Rate Control
// =============================================================================

/// Default number of operations per batch for query-style workers
/// (view, indexing-service and full-text classes).
/// KV-style workers derive their batch size from the operation mix instead.
pub const DEFAULT_BATCH_SIZE: u64 = 100;

/// Fraction of the remaining batch budget actually slept.
/// Sleeping the full delta systematically oversleeps because of timer and
/// scheduling jitter; 0.975 was found empirically to land on target.
pub const CORRECTION_FACTOR: f64 = 0.975;

// =============================================================================
// Reservoir Sampling
// =============================================================================

/// Total number of latency samples retained per workload class.
/// Each shard keeps `MAX_RESERVOIR_CAPACITY / workers` samples per operation.
pub const MAX_RESERVOIR_CAPACITY: usize = 100_000;

/// Histogram bounds used when merging shard samples (microseconds)
/// 1µs .. 1 hour, 3 significant digits
pub const HIST_LOW_US: u64 = 1;
pub const HIST_HIGH_US: u64 = 3_600_000_000;
pub const HIST_SIGFIG: u8 = 3;

/// Fixed-point scale of the per-sample weight `seen / retained`
pub const SAMPLE_WEIGHT_SCALE: u64 = 1_000;

// =============================================================================
// Key Space
// =============================================================================

/// Width of the zero-padded numeric part of every generated key
pub const KEY_INDEX_WIDTH: usize = 12;

/// Per-shard RNG seed multiplier (seed = sid * SEED_MULTIPLIER)
pub const SEED_MULTIPLIER: u64 = 9901;

/// TTLs handed out to expiring documents, cycled in order (seconds)
pub const TTL_CYCLE_START_SECS: u64 = 150;
pub const TTL_CYCLE_END_SECS: u64 = 450;
pub const TTL_CYCLE_STEP_SECS: u64 = 30;

// =============================================================================
// Workload Settings Defaults
// =============================================================================

/// Default document size in bytes
pub const DEFAULT_DOC_SIZE: usize = 2048;

/// Default hot working set (% of items) and hot access ratio (% of accesses)
pub const DEFAULT_WORKING_SET: f64 = 100.0;
pub const DEFAULT_WORKING_SET_ACCESS: u32 = 100;

/// Default key prefix for indexing-service (N1QL) documents
pub const N1QL_KEY_PREFIX: &str = "n1ql";

// =============================================================================
// Reporting
// =============================================================================

/// Shard 0 reports progress every time this fraction of `ops` completes
pub const PROGRESS_REPORT_STEP: f64 = 0.05;

/// Name prefix for auto-created results directories
pub const RESULTS_DIR_PREFIX: &str = "spring";

/// File name for run metadata inside a results directory
pub const RUN_METADATA_FILE: &str = "run_metadata.json";
