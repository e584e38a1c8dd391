//! Worker state machine
//!
//! Every worker, whatever its class, runs the same skeleton:
//!
//! ```text
//! Initializing -> Running -> Completed    (ops budget exhausted)
//!                         -> Stopped      (shutdown requested or timer)
//!                         -> Interrupted  (operator interrupt)
//!                         -> Failed       (startup or fatal operation error)
//! ```
//!
//! Running loops: reserve a batch from the class budget, build and execute
//! the batch, record latencies, then pace. The shutdown signal is polled once
//! per batch. Every terminal state flushes the reservoir exactly once.

pub mod fts;
pub mod kv;
pub mod n1ql;
pub mod query;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{TargetSettings, WorkloadClass, WorkloadSettings};
use crate::constants::{PROGRESS_REPORT_STEP, SEED_MULTIPLIER};
use crate::counters::{OpsBudget, SharedCounters, ShutdownReason, ShutdownSignal};
use crate::error::{StoreResult, WorkerError};
use crate::rate_controller::OptionalRateController;
use crate::reservoir::{OpKind, Reservoir, ReservoirDump};
use crate::sink::LatencySink;
use crate::store::{KvStore, StoreConnector};

pub use fts::FullTextWorker;
pub use kv::{KvCommand, KvWorker};
pub use n1ql::IndexingServiceWorker;
pub use query::QueryWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Initializing,
    Running,
    Completed,
    Stopped,
    Interrupted,
    Failed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Initializing => "initializing",
            WorkerState::Running => "running",
            WorkerState::Completed => "completed",
            WorkerState::Stopped => "stopped",
            WorkerState::Interrupted => "interrupted",
            WorkerState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Everything one worker needs, handed over at construction
#[derive(Clone)]
pub struct WorkerContext {
    pub class: WorkloadClass,
    pub sid: usize,
    pub settings: Arc<WorkloadSettings>,
    pub target: Arc<TargetSettings>,
    pub counters: Arc<SharedCounters>,
    pub budget: Arc<OpsBudget>,
    pub shutdown: Arc<ShutdownSignal>,
    pub pacer: OptionalRateController,
    pub connector: Arc<dyn StoreConnector>,
    pub sink: Arc<dyn LatencySink>,
}

impl WorkerContext {
    /// `<class-name>-<sid>`
    pub fn name(&self) -> String {
        format!("{}-{}", self.class.name(), self.sid)
    }

    /// Workers in this shard's class
    pub fn workers(&self) -> usize {
        self.settings.workers_for(self.class)
    }

    pub fn batch_size(&self) -> u64 {
        self.settings.batch_size_for(self.class)
    }

    /// Per-shard RNG seed; a given config replays the same sequences
    pub fn seed(&self) -> u64 {
        (self.sid as u64).wrapping_mul(SEED_MULTIPLIER) ^ self.settings.seed.unwrap_or(0)
    }
}

/// Times operations, feeds the reservoir and tallies outcomes
#[derive(Debug)]
pub struct Recorder {
    name: String,
    reservoir: Reservoir,
    completed: u64,
    failed: u64,
}

impl Recorder {
    pub fn new(name: String, reservoir: Reservoir) -> Self {
        Self { name, reservoir, completed: 0, failed: 0 }
    }

    /// Run one operation. Transient failures are logged, counted and handed
    /// back as the inner error; anything else aborts the worker.
    pub async fn timed<T, F>(&mut self, op: OpKind, fut: F) -> Result<StoreResult<T>, WorkerError>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let started = Instant::now();
        match fut.await {
            Ok(v) => {
                self.reservoir.update(op, started.elapsed());
                self.completed += 1;
                Ok(Ok(v))
            }
            Err(e) if e.is_transient() => {
                warn!("Request problem with {} ({}): {}", self.name, op, e);
                self.failed += 1;
                Ok(Err(e))
            }
            Err(e) => Err(WorkerError::Fatal(e)),
        }
    }

    /// Like [`Recorder::timed`] when the caller has no use for the result
    pub async fn exec<T, F>(&mut self, op: OpKind, fut: F) -> Result<(), WorkerError>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let _ = self.timed(op, fut).await?;
        Ok(())
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}

/// The closed set of worker specializations, picked once per worker
pub enum Worker {
    Kv(KvWorker),
    Query(QueryWorker),
    IndexingService(IndexingServiceWorker),
    FullText(FullTextWorker),
}

impl Worker {
    pub fn new(ctx: &WorkerContext) -> Self {
        match ctx.class {
            WorkloadClass::Kv | WorkloadClass::SubDoc => Worker::Kv(KvWorker::new(ctx)),
            WorkloadClass::SecondaryIndexQuery => Worker::Query(QueryWorker::new(ctx)),
            WorkloadClass::IndexingServiceQuery => {
                Worker::IndexingService(IndexingServiceWorker::new(ctx))
            }
            WorkloadClass::FullText => Worker::FullText(FullTextWorker::new(ctx)),
        }
    }

    async fn run_batch(
        &mut self,
        ctx: &WorkerContext,
        store: &dyn KvStore,
        rec: &mut Recorder,
    ) -> Result<(), WorkerError> {
        match self {
            Worker::Kv(w) => w.run_batch(ctx, store, rec).await,
            Worker::Query(w) => w.run_batch(ctx, store, rec).await,
            Worker::IndexingService(w) => w.run_batch(ctx, store, rec).await,
            Worker::FullText(w) => w.run_batch(ctx, store, rec).await,
        }
    }
}

/// Everything a shard leaves behind
#[derive(Debug)]
pub struct ShardOutcome {
    pub class: WorkloadClass,
    pub sid: usize,
    pub state: WorkerState,
    pub completed_ops: u64,
    pub failed_ops: u64,
    pub dump: ReservoirDump,
    pub flush_error: Option<String>,
    pub error: Option<WorkerError>,
}

/// Shard 0 logs progress every 5% of a finite ops target
struct Progress {
    limit: Option<u64>,
    next: f64,
}

impl Progress {
    fn new(ctx: &WorkerContext) -> Self {
        let limit = if ctx.sid == 0 { ctx.budget.limit() } else { None };
        Self { limit, next: PROGRESS_REPORT_STEP }
    }

    fn report(&mut self, issued: u64, pacer: &OptionalRateController) {
        let Some(limit) = self.limit else { return };
        let fraction = issued as f64 / limit as f64;
        if fraction >= self.next {
            let pct = (fraction * 100.0).min(100.0);
            match pacer.controller() {
                Some(ctrl) => info!(
                    "Current progress: {:.2} % ({:.1} of {:.1} ops/s)",
                    pct,
                    ctrl.current_rate(),
                    ctrl.target_throughput()
                ),
                None => info!("Current progress: {:.2} %", pct),
            }
            while self.next <= fraction {
                self.next += PROGRESS_REPORT_STEP;
            }
        }
    }
}

/// Run one worker to a terminal state
pub async fn run(ctx: WorkerContext) -> ShardOutcome {
    let name = ctx.name();
    let reservoir = Reservoir::new(ctx.workers(), ctx.seed().wrapping_add(1));
    let mut rec = Recorder::new(name.clone(), reservoir);
    let mut state = WorkerState::Initializing;
    debug!("{} {}", name, state);

    let mut error = None;
    match ctx.connector.connect(&ctx.target).await {
        Err(e) => {
            error!("{} could not connect to {}: {}", name, ctx.target.node, e);
            state = WorkerState::Failed;
            error = Some(WorkerError::Startup(e));
        }
        Ok(store) => {
            let mut worker = Worker::new(&ctx);
            state = WorkerState::Running;
            info!("Started: {}", name);
            match run_loop(&ctx, &mut worker, store.as_ref(), &mut rec).await {
                Ok(terminal) => state = terminal,
                Err(e) => {
                    error!("{} aborted: {}", name, e);
                    state = WorkerState::Failed;
                    error = Some(e);
                }
            }
        }
    }

    match state {
        WorkerState::Interrupted => info!("Interrupted: {}", name),
        WorkerState::Failed => {}
        _ => info!("Finished: {}", name),
    }

    let Recorder { reservoir, completed, failed, .. } = rec;
    let flushed = reservoir.dump(ctx.sink.as_ref(), ctx.class, ctx.sid).await;
    let flush_error = flushed.error.map(|e| {
        error!("{} failed to flush latency samples: {:#}", name, e);
        format!("{:#}", e)
    });
    debug!("{} sampled {} ops", name, flushed.dump.summary.total_count());
    if ctx.sid == 0 {
        if let Some(ctrl) = ctx.pacer.controller() {
            debug!(
                "{} pacing: {} workers at {:.1} ops/s, {:?} slept",
                ctx.class.name(),
                ctrl.workers(),
                ctrl.current_rate(),
                ctrl.time_slept()
            );
        }
    }

    ShardOutcome {
        class: ctx.class,
        sid: ctx.sid,
        state,
        completed_ops: completed,
        failed_ops: failed,
        dump: flushed.dump,
        flush_error,
        error,
    }
}

async fn run_loop(
    ctx: &WorkerContext,
    worker: &mut Worker,
    store: &dyn KvStore,
    rec: &mut Recorder,
) -> Result<WorkerState, WorkerError> {
    let batch_size = ctx.batch_size();
    let mut progress = Progress::new(ctx);
    loop {
        if let Some(reason) = ctx.shutdown.reason() {
            return Ok(match reason {
                ShutdownReason::Interrupt => WorkerState::Interrupted,
                ShutdownReason::Requested | ShutdownReason::Timer => WorkerState::Stopped,
            });
        }
        if !ctx.budget.try_reserve(batch_size) {
            return Ok(WorkerState::Completed);
        }

        let started = Instant::now();
        worker.run_batch(ctx, store, rec).await?;
        progress.report(ctx.budget.issued(), &ctx.pacer);

        if ctx.pacer.is_enabled() {
            tokio::select! {
                _ = ctx.pacer.throttle(started.elapsed()) => {}
                _ = ctx.shutdown.wait() => {}
            }
        } else {
            // Open loop: still give other tasks on this thread a turn
            tokio::task::yield_now().await;
        }
    }
}
