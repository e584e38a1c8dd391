//! Per-shard latency reservoir
//!
//! Each worker owns one [`Reservoir`]; nothing here is shared, so `update`
//! never takes a lock. Samples are kept per operation kind with Algorithm R
//! reservoir sampling, so memory is bounded by `capacity` samples per kind
//! no matter how long the run is. Count, mean and max are exact; percentiles
//! are estimated from the retained samples.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::config::WorkloadClass;
use crate::constants::MAX_RESERVOIR_CAPACITY;
use crate::sink::LatencySink;

/// Operation kinds recorded by workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Create,
    Read,
    Update,
    Delete,
    Cas,
    Query,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Create => "create",
            OpKind::Read => "read",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
            OpKind::Cas => "cas",
            OpKind::Query => "query",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retained samples for one operation kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpSamples {
    /// Every observation ever offered
    pub seen: u64,
    pub sum_us: f64,
    pub max_us: u64,
    /// At most `capacity` samples, uniformly drawn from all `seen`
    pub samples_us: Vec<u64>,
}

impl OpSamples {
    pub fn mean_us(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.sum_us / self.seen as f64
        }
    }
}

/// Percentile summary of one operation kind on one shard (microseconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpSummary {
    pub op: OpKind,
    pub count: u64,
    pub retained: usize,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p90_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardSummary {
    pub ops: Vec<OpSummary>,
}

impl ShardSummary {
    pub fn get(&self, op: OpKind) -> Option<&OpSummary> {
        self.ops.iter().find(|s| s.op == op)
    }

    pub fn total_count(&self) -> u64 {
        self.ops.iter().map(|s| s.count).sum()
    }
}

/// What a shard hands to the sink at termination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservoirDump {
    pub class: WorkloadClass,
    pub sid: usize,
    pub capacity: usize,
    pub summary: ShardSummary,
    pub ops: BTreeMap<OpKind, OpSamples>,
}

impl ReservoirDump {
    /// `<class-name>-<sid>`, the key results are merged by offline
    pub fn name(&self) -> String {
        format!("{}-{}", self.class.name(), self.sid)
    }
}

/// Result of [`Reservoir::dump`]: the dump is always produced, the sink
/// error (if any) travels alongside it
#[derive(Debug)]
pub struct Flushed {
    pub dump: ReservoirDump,
    pub error: Option<anyhow::Error>,
}

#[derive(Debug)]
pub struct Reservoir {
    capacity: usize,
    rng: StdRng,
    ops: BTreeMap<OpKind, OpSamples>,
}

impl Reservoir {
    /// Capacity is the global sample budget split across the class's workers
    pub fn new(num_workers: usize, seed: u64) -> Self {
        Self::with_capacity(MAX_RESERVOIR_CAPACITY / num_workers.max(1), seed)
    }

    pub fn with_capacity(capacity: usize, seed: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            rng: StdRng::seed_from_u64(seed),
            ops: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn update(&mut self, op: OpKind, latency: Duration) {
        let us = latency.as_micros() as u64;
        let entry = self.ops.entry(op).or_default();
        entry.seen += 1;
        entry.sum_us += us as f64;
        entry.max_us = entry.max_us.max(us);
        if entry.samples_us.len() < self.capacity {
            entry.samples_us.push(us);
        } else {
            let j = self.rng.random_range(0..entry.seen);
            if (j as usize) < self.capacity {
                entry.samples_us[j as usize] = us;
            }
        }
    }

    /// Observations offered for `op`
    pub fn seen(&self, op: OpKind) -> u64 {
        self.ops.get(&op).map(|s| s.seen).unwrap_or(0)
    }

    pub fn retained(&self, op: OpKind) -> usize {
        self.ops.get(&op).map(|s| s.samples_us.len()).unwrap_or(0)
    }

    /// Estimated latency at quantile `q` in `[0, 1]`
    pub fn percentile(&self, op: OpKind, q: f64) -> Option<Duration> {
        let entry = self.ops.get(&op)?;
        let mut sorted = entry.samples_us.clone();
        sorted.sort_unstable();
        nearest_rank(&sorted, q).map(Duration::from_micros)
    }

    pub fn summary(&self) -> ShardSummary {
        let ops = self
            .ops
            .iter()
            .map(|(op, entry)| {
                let mut sorted = entry.samples_us.clone();
                sorted.sort_unstable();
                let at = |q| nearest_rank(&sorted, q).unwrap_or(0);
                OpSummary {
                    op: *op,
                    count: entry.seen,
                    retained: sorted.len(),
                    mean_us: entry.mean_us(),
                    p50_us: at(0.50),
                    p90_us: at(0.90),
                    p95_us: at(0.95),
                    p99_us: at(0.99),
                    max_us: entry.max_us,
                }
            })
            .collect();
        ShardSummary { ops }
    }

    pub fn into_dump(self, class: WorkloadClass, sid: usize) -> ReservoirDump {
        ReservoirDump {
            class,
            sid,
            capacity: self.capacity,
            summary: self.summary(),
            ops: self.ops,
        }
    }

    /// Serialize to the sink. Consumes the reservoir, so a shard can flush
    /// only once.
    pub async fn dump(self, sink: &dyn LatencySink, class: WorkloadClass, sid: usize) -> Flushed {
        let dump = self.into_dump(class, sid);
        let error = sink.persist(&dump).await.err();
        Flushed { dump, error }
    }
}

fn nearest_rank(sorted: &[u64], q: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (q.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
    Some(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    #[test]
    fn test_capacity_split_across_workers() {
        assert_eq!(Reservoir::new(4, 0).capacity(), MAX_RESERVOIR_CAPACITY / 4);
        assert_eq!(Reservoir::new(0, 0).capacity(), MAX_RESERVOIR_CAPACITY);
        assert_eq!(Reservoir::with_capacity(0, 0).capacity(), 1);
    }

    #[test]
    fn test_uniform_percentiles_within_bounds() {
        let mut reservoir = Reservoir::with_capacity(10_000, 9901);
        let mut rng = StdRng::seed_from_u64(1);
        let n = 500_000;
        for _ in 0..n {
            let us = rng.random_range(0..=100_000u64);
            reservoir.update(OpKind::Read, Duration::from_micros(us));
        }

        assert_eq!(reservoir.seen(OpKind::Read), n);
        assert_eq!(reservoir.retained(OpKind::Read), 10_000);

        let p50 = reservoir.percentile(OpKind::Read, 0.50).unwrap().as_micros() as i64;
        let p95 = reservoir.percentile(OpKind::Read, 0.95).unwrap().as_micros() as i64;
        assert!((p50 - 50_000).abs() < 3_000, "p50 {}", p50);
        assert!((p95 - 95_000).abs() < 3_000, "p95 {}", p95);

        let summary = reservoir.summary();
        let read = summary.get(OpKind::Read).unwrap();
        assert!((read.mean_us - 50_000.0).abs() < 1_000.0);
        assert!(read.max_us <= 100_000);
    }

    #[test]
    fn test_ops_are_tracked_separately() {
        let mut reservoir = Reservoir::with_capacity(16, 0);
        reservoir.update(OpKind::Create, Duration::from_micros(10));
        reservoir.update(OpKind::Read, Duration::from_micros(1_000));
        reservoir.update(OpKind::Read, Duration::from_micros(3_000));

        let summary = reservoir.summary();
        assert_eq!(summary.ops.len(), 2);
        assert_eq!(summary.get(OpKind::Create).unwrap().p99_us, 10);
        assert_eq!(summary.get(OpKind::Read).unwrap().mean_us, 2_000.0);
        assert_eq!(summary.total_count(), 3);
        assert!(reservoir.percentile(OpKind::Delete, 0.5).is_none());
    }

    #[tokio::test]
    async fn test_dump_goes_to_sink_once() {
        let sink = MemorySink::new();
        let mut reservoir = Reservoir::with_capacity(8, 0);
        reservoir.update(OpKind::Query, Duration::from_millis(2));

        let flushed = reservoir.dump(&sink, WorkloadClass::FullText, 0).await;
        assert!(flushed.error.is_none());
        assert_eq!(flushed.dump.name(), "fts-es-worker-0");

        let dumps = sink.dumps();
        assert_eq!(dumps.len(), 1);
        assert_eq!(dumps[0].ops[&OpKind::Query].seen, 1);
    }
}
