//! Cross-worker shared state
//!
//! One [`SharedCounters`] is created per run and handed to every worker by
//! `Arc`. Counter reservations are single atomic read-modify-write steps, so
//! nothing is ever held across storage I/O; plain loads serve the key-space
//! arithmetic.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use tokio::sync::Notify;

/// Run-wide key-space counters plus the hot-load marker
#[derive(Debug)]
pub struct SharedCounters {
    current_items: AtomicU64,
    deleted_items: AtomicU64,
    cas_updated_items: AtomicU64,
    hot: HotLoadMarker,
}

impl SharedCounters {
    pub fn new(initial_items: u64, initial_hot_start: u64) -> Self {
        Self {
            current_items: AtomicU64::new(initial_items),
            deleted_items: AtomicU64::new(0),
            cas_updated_items: AtomicU64::new(0),
            hot: HotLoadMarker::new(initial_hot_start),
        }
    }

    pub fn current_items(&self) -> u64 {
        self.current_items.load(Ordering::Acquire)
    }

    pub fn deleted_items(&self) -> u64 {
        self.deleted_items.load(Ordering::Acquire)
    }

    pub fn cas_updated_items(&self) -> u64 {
        self.cas_updated_items.load(Ordering::Acquire)
    }

    /// Claim `n` fresh item indexes; returns the first one.
    /// Concurrent callers always receive non-overlapping index ranges.
    pub fn reserve_creates(&self, n: u64) -> u64 {
        self.current_items.fetch_add(n, Ordering::AcqRel)
    }

    /// Claim the next `n` indexes to delete; returns the first one
    pub fn reserve_deletes(&self, n: u64) -> u64 {
        self.deleted_items.fetch_add(n, Ordering::AcqRel)
    }

    /// Account `n` in-place updates; returns the previous total
    pub fn reserve_cas_updates(&self, n: u64) -> u64 {
        self.cas_updated_items.fetch_add(n, Ordering::AcqRel)
    }

    pub fn hot(&self) -> &HotLoadMarker {
        &self.hot
    }
}

/// Offset of the moving hot window and the timer-elapsed flag.
///
/// Single writer (the hot-workload timer), many lock-free readers.
#[derive(Debug)]
pub struct HotLoadMarker {
    start: AtomicU64,
    migrations: AtomicU64,
}

impl HotLoadMarker {
    fn new(start: u64) -> Self {
        Self { start: AtomicU64::new(start), migrations: AtomicU64::new(0) }
    }

    pub fn start(&self) -> u64 {
        self.start.load(Ordering::Acquire)
    }

    /// Number of times the timer has fired
    pub fn migrations(&self) -> u64 {
        self.migrations.load(Ordering::Acquire)
    }

    /// True once the timer has fired at least once
    pub fn has_elapsed(&self) -> bool {
        self.migrations() > 0
    }

    /// Publish a new window offset (timer task only)
    pub(crate) fn advance(&self, new_start: u64) {
        self.start.store(new_start, Ordering::Release);
        self.migrations.fetch_add(1, Ordering::AcqRel);
    }
}

/// Per-class operation budget.
///
/// Workers reserve a whole batch before executing it, so the class stops
/// at the first batch boundary at or past the target.
#[derive(Debug)]
pub struct OpsBudget {
    limit: Option<u64>,
    issued: AtomicU64,
}

impl OpsBudget {
    pub fn new(limit: Option<u64>) -> Self {
        Self { limit, issued: AtomicU64::new(0) }
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Try to claim `batch` operations; false once the target is reached
    pub fn try_reserve(&self, batch: u64) -> bool {
        self.issued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| match self.limit {
                Some(limit) if cur >= limit => None,
                _ => Some(cur + batch),
            })
            .is_ok()
    }

    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Acquire)
    }
}

/// Why workers were asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownReason {
    /// Explicit `RunHandle::shutdown()`, or a failing sibling worker
    Requested,
    /// The run timer expired
    Timer,
    /// Operator interrupt (Ctrl-C)
    Interrupt,
}

impl ShutdownReason {
    fn to_u8(self) -> u8 {
        match self {
            ShutdownReason::Requested => 1,
            ShutdownReason::Timer => 2,
            ShutdownReason::Interrupt => 3,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(ShutdownReason::Requested),
            2 => Some(ShutdownReason::Timer),
            3 => Some(ShutdownReason::Interrupt),
            _ => None,
        }
    }
}

/// The single cancellation flag shared by every worker and timer.
/// Workers poll it once per batch; timers await it.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    reason: AtomicU8,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. The first reason wins; later triggers are no-ops.
    pub fn trigger(&self, reason: ShutdownReason) {
        if self
            .reason
            .compare_exchange(0, reason.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.notify.notify_waiters();
        }
    }

    pub fn is_set(&self) -> bool {
        self.reason.load(Ordering::Acquire) != 0
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        ShutdownReason::from_u8(self.reason.load(Ordering::Acquire))
    }

    /// Resolve once the flag is set
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}
