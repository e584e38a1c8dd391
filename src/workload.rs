//! Run orchestration
//!
//! [`start`] builds the shared state, spawns one task per worker across every
//! class with a non-zero worker count plus the hot-workload and run timers,
//! and hands back a [`RunHandle`]. [`RunHandle::await_completion`] collects
//! shards as they finish; the first failing shard requests shutdown of all
//! the others and becomes the run's error.

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, WorkloadClass};
use crate::counters::{OpsBudget, SharedCounters, ShutdownReason, ShutdownSignal};
use crate::error::{RunError, WorkerError};
use crate::hot_workload::HotWorkloadTimer;
use crate::metrics::{OpAggregate, OpHists};
use crate::rate_controller::OptionalRateController;
use crate::reservoir::ShardSummary;
use crate::sink::LatencySink;
use crate::store::StoreConnector;
use crate::worker::{self, ShardOutcome, WorkerContext, WorkerState};

/// Per-shard line of the final report
#[derive(Debug, Clone, Serialize)]
pub struct ShardReport {
    pub sid: usize,
    pub state: WorkerState,
    pub completed_ops: u64,
    pub failed_ops: u64,
    pub summary: ShardSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flush_error: Option<String>,
}

/// Merged results of one workload class
#[derive(Debug, Clone, Serialize)]
pub struct ClassResult {
    pub class: WorkloadClass,
    pub total_ops: u64,
    pub failed_ops: u64,
    pub shards: Vec<ShardReport>,
    /// Latency percentiles merged over every shard's dump
    pub ops: Vec<OpAggregate>,
}

impl ClassResult {
    pub fn ops_per_sec(&self, wall_seconds: f64) -> f64 {
        if wall_seconds > 0.0 {
            self.total_ops as f64 / wall_seconds
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub wall_seconds: f64,
    /// Set when the run ended on a shutdown signal rather than by
    /// exhausting every ops target
    pub shutdown_reason: Option<ShutdownReason>,
    pub classes: Vec<ClassResult>,
}

impl RunResult {
    pub fn class(&self, class: WorkloadClass) -> Option<&ClassResult> {
        self.classes.iter().find(|c| c.class == class)
    }

    pub fn total_ops(&self) -> u64 {
        self.classes.iter().map(|c| c.total_ops).sum()
    }
}

struct SpawnedShard {
    class: WorkloadClass,
    sid: usize,
    handle: JoinHandle<ShardOutcome>,
}

/// Control surface of a running workload
pub struct RunHandle {
    counters: Arc<SharedCounters>,
    shutdown: Arc<ShutdownSignal>,
    shards: Vec<SpawnedShard>,
    timers: Vec<JoinHandle<()>>,
    started: Instant,
}

/// Spawn every worker and timer for `config`.
///
/// Must be called from inside a tokio runtime.
pub fn start(
    config: &Config,
    connector: Arc<dyn StoreConnector>,
    sink: Arc<dyn LatencySink>,
) -> Result<RunHandle> {
    config.validate()?;

    let settings = Arc::new(config.workload.clone());
    let target = Arc::new(config.target.clone());
    let counters = Arc::new(SharedCounters::new(
        settings.items,
        settings.initial_hot_load_start(),
    ));
    let shutdown = Arc::new(ShutdownSignal::new());

    let mut timers = Vec::new();
    if let Some(timer) = HotWorkloadTimer::from_settings(&settings) {
        timers.push(timer.spawn(counters.clone(), shutdown.clone()));
    }
    if let Some(limit) = config.timer {
        let shutdown = shutdown.clone();
        timers.push(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(limit) => {
                    info!("Run timer expired after {:?}, stopping workers", limit);
                    shutdown.trigger(ShutdownReason::Timer);
                }
                _ = shutdown.wait() => {}
            }
        }));
    }

    info!("Starting all workers");
    let mut shards = Vec::new();
    for class in WorkloadClass::ALL {
        let workers = settings.workers_for(class);
        if workers == 0 {
            continue;
        }
        let batch_size = settings.batch_size_for(class);
        let budget = Arc::new(OpsBudget::new(settings.ops.limit()));
        let pacer = OptionalRateController::new(settings.throughput_for(class), batch_size, workers);
        debug!(
            "{}: {} workers, batch size {}, throughput {:?}",
            class.name(),
            workers,
            batch_size,
            settings.throughput_for(class)
        );

        for sid in 0..workers {
            let ctx = WorkerContext {
                class,
                sid,
                settings: settings.clone(),
                target: target.clone(),
                counters: counters.clone(),
                budget: budget.clone(),
                shutdown: shutdown.clone(),
                pacer: pacer.clone(),
                connector: connector.clone(),
                sink: sink.clone(),
            };
            shards.push(SpawnedShard { class, sid, handle: tokio::spawn(worker::run(ctx)) });
        }
    }

    if shards.is_empty() {
        warn!("No workers configured; the run will complete immediately");
    }

    Ok(RunHandle { counters, shutdown, shards, timers, started: Instant::now() })
}

impl RunHandle {
    /// Ask every worker to stop at its next batch boundary
    pub fn shutdown(&self) {
        self.shutdown.trigger(ShutdownReason::Requested);
    }

    /// Operator interrupt: workers end in the `interrupted` state
    pub fn interrupt(&self) {
        self.shutdown.trigger(ShutdownReason::Interrupt);
    }

    /// Shared flag, for callers that must signal while awaiting completion
    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        self.shutdown.clone()
    }

    pub fn counters(&self) -> &Arc<SharedCounters> {
        &self.counters
    }

    pub fn worker_count(&self) -> usize {
        self.shards.len()
    }

    /// Wait for every worker to reach a terminal state.
    ///
    /// Returns the first worker failure; the remaining workers are told to
    /// stop as soon as it is seen, and all of them are still awaited so
    /// every reservoir gets flushed.
    pub async fn await_completion(self) -> std::result::Result<RunResult, RunError> {
        let RunHandle { shutdown, shards, timers, started, .. } = self;

        let mut pending: FuturesUnordered<_> = shards
            .into_iter()
            .map(|s| async move { (s.class, s.sid, s.handle.await) })
            .collect();

        let mut outcomes = Vec::new();
        let mut first_error: Option<RunError> = None;
        while let Some((class, sid, joined)) = pending.next().await {
            let failure = match joined {
                Ok(mut outcome) => {
                    let err = outcome.error.take();
                    outcomes.push(outcome);
                    err
                }
                Err(e) => Some(WorkerError::Aborted(e.to_string())),
            };
            if let Some(source) = failure {
                if first_error.is_none() {
                    error!("{}-{} failed, stopping remaining workers: {}", class.name(), sid, source);
                    shutdown.trigger(ShutdownReason::Requested);
                    first_error = Some(RunError::WorkerFailed { class, sid, source });
                } else {
                    warn!("{}-{} also failed: {}", class.name(), sid, source);
                }
            }
        }

        for timer in timers {
            timer.abort();
            let _ = timer.await;
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let wall_seconds = started.elapsed().as_secs_f64();
        let result = RunResult {
            wall_seconds,
            shutdown_reason: shutdown.reason(),
            classes: aggregate(outcomes),
        };
        info!(
            "All workers finished: {} ops in {:.2}s",
            result.total_ops(),
            wall_seconds
        );
        Ok(result)
    }
}

fn aggregate(outcomes: Vec<ShardOutcome>) -> Vec<ClassResult> {
    let mut by_class: BTreeMap<WorkloadClass, Vec<ShardOutcome>> = BTreeMap::new();
    for outcome in outcomes {
        by_class.entry(outcome.class).or_default().push(outcome);
    }

    by_class
        .into_iter()
        .map(|(class, mut shards)| {
            shards.sort_by_key(|s| s.sid);
            let mut hists = OpHists::new();
            for shard in &shards {
                if let Err(e) = hists.record_dump(&shard.dump) {
                    warn!("Could not merge samples of {}: {:#}", shard.dump.name(), e);
                }
            }
            ClassResult {
                class,
                total_ops: shards.iter().map(|s| s.completed_ops).sum(),
                failed_ops: shards.iter().map(|s| s.failed_ops).sum(),
                ops: hists.aggregates(),
                shards: shards
                    .into_iter()
                    .map(|s| ShardReport {
                        sid: s.sid,
                        state: s.state,
                        completed_ops: s.completed_ops,
                        failed_ops: s.failed_ops,
                        summary: s.dump.summary,
                        flush_error: s.flush_error,
                    })
                    .collect(),
            }
        })
        .collect()
}
