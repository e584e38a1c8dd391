//! Moving hot working set
//!
//! [`HotWorkloadTimer`] is the only writer of the hot-load marker. Every
//! `working_set_move_time` it recomputes the window offset from the current
//! key-space counters and publishes it; workers pick the new offset up at
//! their next batch.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::WorkloadSettings;
use crate::counters::{SharedCounters, ShutdownSignal};
use crate::keys::ExistingMovingHotWorkloadKey;

#[derive(Debug, Clone)]
pub struct HotWorkloadTimer {
    move_time: Duration,
    working_set: f64,
    moving_docs: u64,
}

impl HotWorkloadTimer {
    /// `None` when the settings don't ask for a moving hot set
    pub fn from_settings(settings: &WorkloadSettings) -> Option<Self> {
        settings.working_set_move_time.map(|move_time| Self {
            move_time,
            working_set: settings.working_set,
            moving_docs: settings.working_set_moving_docs,
        })
    }

    /// Apply one migration to the shared marker
    pub fn migrate(&self, counters: &SharedCounters) -> u64 {
        let hot = counters.hot();
        let next = ExistingMovingHotWorkloadKey::next_hot_start(
            hot.start(),
            counters.current_items(),
            counters.deleted_items(),
            self.working_set,
            self.moving_docs,
        );
        hot.advance(next);
        next
    }

    /// Run until the shutdown signal fires (or the handle is aborted)
    pub fn spawn(self, counters: Arc<SharedCounters>, shutdown: Arc<ShutdownSignal>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.move_time, self.move_time);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Hot workload timer armed: every {:?}", self.move_time);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let start = self.migrate(&counters);
                        debug!(
                            "Hot load start moved to {} (migration {})",
                            start,
                            counters.hot().migrations()
                        );
                    }
                    _ = shutdown.wait() => break,
                }
            }
        })
    }
}
