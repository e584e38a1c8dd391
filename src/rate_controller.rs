//! Batch pacing for workload execution
//!
//! Workers are paced per batch rather than per operation: each worker times
//! its batch and, if it finished early, sleeps for the remainder of its share
//! of the class's aggregate throughput target.
//!
//! # Key Concepts
//!
//! - **Target batch time**: `batch_size × workers / throughput` seconds, the
//!   wall-clock time one batch should take so that all workers of a class
//!   together issue `throughput` ops/sec
//! - **Correction factor**: the computed sleep is scaled by
//!   [`CORRECTION_FACTOR`] to offset systematic oversleep from timer jitter
//! - **Open loop**: an unbounded throughput never sleeps
//!
//! # Example
//!
//! ```rust
//! use spring_bench::config::Throughput;
//! use spring_bench::rate_controller::OptionalRateController;
//!
//! // 1000 ops/sec across 4 workers, 10 ops per batch
//! let pacer = OptionalRateController::new(Throughput::Limited(1000.0), 10, 4);
//! assert!(pacer.is_enabled());
//!
//! // In worker loop:
//! // let started = Instant::now();
//! // ... execute batch ...
//! // pacer.throttle(started.elapsed()).await;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::config::Throughput;
use crate::constants::CORRECTION_FACTOR;

/// Rate controller for throttling batch starts
///
/// One instance is shared (via `Arc`) by all workers of a class; the state it
/// keeps is only for reporting.
///
/// # Accuracy Notes
///
/// - Sleeps use `tokio::time::sleep()`, ~1ms granularity
/// - Batches slower than the target are never compensated later (no catch-up)
/// - Small batches at high rates are dominated by timer granularity; prefer
///   batch times of several milliseconds
#[derive(Debug)]
pub struct RateController {
    /// Aggregate ops/sec for the class
    throughput: f64,
    batch_size: u64,
    workers: usize,
    /// Per-worker target wall-clock time of one batch
    target_batch_time: Duration,
    start_time: Instant,
    /// Batches that went through `throttle()` so far
    batches: AtomicU64,
    /// Total time spent sleeping, in microseconds
    slept_micros: AtomicU64,
}

impl RateController {
    /// Create a new rate controller
    ///
    /// # Arguments
    ///
    /// * `throughput` - Aggregate ops/sec target for the whole class (> 0)
    /// * `batch_size` - Operations per batch
    /// * `workers` - Number of concurrent workers sharing the target
    pub fn new(throughput: f64, batch_size: u64, workers: usize) -> Self {
        let secs = batch_size as f64 * workers.max(1) as f64 / throughput;
        let target_batch_time = if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        };
        Self {
            throughput,
            batch_size,
            workers,
            target_batch_time,
            start_time: Instant::now(),
            batches: AtomicU64::new(0),
            slept_micros: AtomicU64::new(0),
        }
    }

    pub fn target_batch_time(&self) -> Duration {
        self.target_batch_time
    }

    /// Sleep owed after a batch that took `actual`; zero when the batch was late
    pub fn delay_for(&self, actual: Duration) -> Duration {
        match self.target_batch_time.checked_sub(actual) {
            Some(remaining) if !remaining.is_zero() => remaining.mul_f64(CORRECTION_FACTOR),
            _ => Duration::ZERO,
        }
    }

    /// Pace the caller after a batch that took `batch_elapsed`
    pub async fn throttle(&self, batch_elapsed: Duration) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        let delay = self.delay_for(batch_elapsed);
        if !delay.is_zero() {
            self.slept_micros
                .fetch_add(delay.as_micros() as u64, Ordering::Relaxed);
            sleep(delay).await;
        }
    }

    /// Achieved ops/sec across all workers (for monitoring/debugging)
    pub fn current_rate(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        let ops = self.batches.load(Ordering::Relaxed) * self.batch_size;
        ops as f64 / elapsed
    }

    /// Get target throughput (for reporting)
    pub fn target_throughput(&self) -> f64 {
        self.throughput
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn time_slept(&self) -> Duration {
        Duration::from_micros(self.slept_micros.load(Ordering::Relaxed))
    }
}

/// Wrapper for optional rate controller
///
/// Makes it easy to conditionally apply pacing. With an unbounded throughput,
/// throttle() becomes a no-op with zero overhead.
#[derive(Clone, Debug)]
pub struct OptionalRateController {
    controller: Option<Arc<RateController>>,
}

impl OptionalRateController {
    /// Create a new optional rate controller
    ///
    /// # Returns
    ///
    /// If `throughput` is `Throughput::Unbounded`, creates a no-op controller
    /// that doesn't throttle. Otherwise, creates a shared controller.
    pub fn new(throughput: Throughput, batch_size: u64, workers: usize) -> Self {
        let controller = match throughput {
            Throughput::Unbounded => None,
            Throughput::Limited(t) => Some(Arc::new(RateController::new(t, batch_size, workers))),
        };
        Self { controller }
    }

    /// Pace after a batch (no-op if rate control is disabled)
    pub async fn throttle(&self, batch_elapsed: Duration) {
        if let Some(ref ctrl) = self.controller {
            ctrl.throttle(batch_elapsed).await;
        }
    }

    /// Check if rate control is enabled
    pub fn is_enabled(&self) -> bool {
        self.controller.is_some()
    }

    /// Get reference to underlying controller (for statistics)
    pub fn controller(&self) -> Option<&Arc<RateController>> {
        self.controller.as_ref()
    }
}
