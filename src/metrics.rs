//! Per-class latency aggregation
//!
//! Shards flush independent reservoirs; after a run they are merged into one
//! HDR histogram per operation kind. Each retained sample is recorded with a
//! fixed-point weight of `seen * SAMPLE_WEIGHT_SCALE / retained` so a shard
//! that did more work counts for more. Histogram counts are therefore scaled;
//! exact operation counts are tracked next to them.

use anyhow::{Context, Result};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::constants::{HIST_HIGH_US, HIST_LOW_US, HIST_SIGFIG, SAMPLE_WEIGHT_SCALE};
use crate::reservoir::{OpKind, ReservoirDump};

/// Merged latency figures for one operation kind of one class (microseconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpAggregate {
    pub op: OpKind,
    /// Exact number of operations across all shards
    pub count: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p90_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

#[derive(Debug, Clone)]
struct OpHist {
    hist: Histogram<u64>,
    count: u64,
    sum_us: f64,
    max_us: u64,
}

impl OpHist {
    fn new() -> Result<Self> {
        let hist = Histogram::<u64>::new_with_bounds(HIST_LOW_US, HIST_HIGH_US, HIST_SIGFIG)
            .context("failed to allocate histogram")?;
        Ok(Self { hist, count: 0, sum_us: 0.0, max_us: 0 })
    }
}

/// Histograms keyed by operation kind, one set per workload class
#[derive(Debug, Clone, Default)]
pub struct OpHists {
    ops: BTreeMap<OpKind, OpHist>,
}

impl OpHists {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one shard's dump into the class histograms
    pub fn record_dump(&mut self, dump: &ReservoirDump) -> Result<()> {
        for (op, samples) in &dump.ops {
            if samples.seen == 0 {
                continue;
            }
            let entry = match self.ops.entry(*op) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(v) => v.insert(OpHist::new()?),
            };
            entry.count += samples.seen;
            entry.sum_us += samples.sum_us;
            entry.max_us = entry.max_us.max(samples.max_us);

            let retained = samples.samples_us.len() as u64;
            if retained == 0 {
                continue;
            }
            let weight = (samples.seen.saturating_mul(SAMPLE_WEIGHT_SCALE) / retained).max(1);
            for us in &samples.samples_us {
                entry.hist.saturating_record_n(*us, weight);
            }
        }
        Ok(())
    }

    /// Merge another OpHists into this one
    pub fn merge(&mut self, other: &OpHists) -> Result<()> {
        for (op, theirs) in &other.ops {
            let entry = match self.ops.entry(*op) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(v) => v.insert(OpHist::new()?),
            };
            entry
                .hist
                .add(&theirs.hist)
                .map_err(|e| anyhow::anyhow!("histogram merge failed: {:?}", e))?;
            entry.count += theirs.count;
            entry.sum_us += theirs.sum_us;
            entry.max_us = entry.max_us.max(theirs.max_us);
        }
        Ok(())
    }

    pub fn aggregates(&self) -> Vec<OpAggregate> {
        self.ops
            .iter()
            .map(|(op, h)| OpAggregate {
                op: *op,
                count: h.count,
                mean_us: if h.count == 0 { 0.0 } else { h.sum_us / h.count as f64 },
                p50_us: h.hist.value_at_quantile(0.50),
                p90_us: h.hist.value_at_quantile(0.90),
                p95_us: h.hist.value_at_quantile(0.95),
                p99_us: h.hist.value_at_quantile(0.99),
                max_us: h.max_us,
            })
            .collect()
    }
}

/// Print a latency summary of every operation kind of one class
pub fn print_aggregates(class: &str, aggregates: &[OpAggregate]) {
    println!("\n{} latency (µs):", class);
    for agg in aggregates {
        println!(
            "  [{:>6}] count={:<10} mean={:<8.0} p50={:<8} p95={:<8} p99={:<8} max={:<8}",
            agg.op.as_str(),
            agg.count,
            agg.mean_us,
            agg.p50_us,
            agg.p95_us,
            agg.p99_us,
            agg.max_us
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkloadClass;
    use crate::reservoir::Reservoir;
    use std::time::Duration;

    fn dump(sid: usize, latencies_us: &[u64]) -> ReservoirDump {
        let mut r = Reservoir::with_capacity(1_000, sid as u64);
        for us in latencies_us {
            r.update(OpKind::Read, Duration::from_micros(*us));
        }
        r.into_dump(WorkloadClass::Kv, sid)
    }

    #[test]
    fn test_record_dumps_from_several_shards() {
        let mut hists = OpHists::new();
        hists.record_dump(&dump(0, &[100, 200])).unwrap();
        hists.record_dump(&dump(1, &[300, 400])).unwrap();

        let aggs = hists.aggregates();
        assert_eq!(aggs.len(), 1);
        assert_eq!(aggs[0].op, OpKind::Read);
        assert_eq!(aggs[0].count, 4);
        assert_eq!(aggs[0].mean_us, 250.0);
        assert_eq!(aggs[0].max_us, 400);
    }

    #[test]
    fn test_downsampled_shard_is_weighted() {
        // 10k observations in a 1k reservoir: each sample counts ~10 times
        let mut r = Reservoir::with_capacity(1_000, 3);
        for _ in 0..10_000 {
            r.update(OpKind::Update, Duration::from_micros(5_000));
        }
        let mut hists = OpHists::new();
        hists.record_dump(&r.into_dump(WorkloadClass::SubDoc, 0)).unwrap();
        hists.record_dump(&dump(1, &[10; 10])).unwrap();

        let aggs = hists.aggregates();
        let update = aggs.iter().find(|a| a.op == OpKind::Update).unwrap();
        assert_eq!(update.count, 10_000);
        let p50 = update.p50_us as i64;
        assert!((p50 - 5_000).abs() <= 5, "p50 {}", p50);
    }

    #[test]
    fn test_unequal_shards_weighted_by_work() {
        // Shard A: 15 ops at 100µs kept in 10 slots; shard B: 24 ops at 1ms kept in 10
        let mut a = Reservoir::with_capacity(10, 1);
        for _ in 0..15 {
            a.update(OpKind::Read, Duration::from_micros(100));
        }
        let mut b = Reservoir::with_capacity(10, 2);
        for _ in 0..24 {
            b.update(OpKind::Read, Duration::from_micros(1_000));
        }
        let mut hists = OpHists::new();
        hists.record_dump(&a.into_dump(WorkloadClass::Kv, 0)).unwrap();
        hists.record_dump(&b.into_dump(WorkloadClass::Kv, 1)).unwrap();

        let read = &hists.aggregates()[0];
        assert_eq!(read.count, 39);
        let p50 = read.p50_us as i64;
        assert!((p50 - 1_000).abs() <= 1, "p50 {}", p50);
    }

    #[test]
    fn test_merge() {
        let mut a = OpHists::new();
        let mut b = OpHists::new();
        a.record_dump(&dump(0, &[100])).unwrap();
        b.record_dump(&dump(1, &[200])).unwrap();
        a.merge(&b).unwrap();
        assert_eq!(a.aggregates()[0].count, 2);
    }
}
