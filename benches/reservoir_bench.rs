// benches/reservoir_bench.rs
// Run with: cargo bench --bench reservoir_bench -- <args>
use anyhow::Result;
use clap::Parser;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use std::time::{Duration, Instant};

use spring_bench::config::WorkloadClass;
use spring_bench::metrics::{print_aggregates, OpHists};
use spring_bench::reservoir::{OpKind, Reservoir};

#[derive(Parser, Debug)]
#[command(name = "reservoir_bench")]
struct Args {
    /// Samples fed to each shard reservoir
    #[arg(long, default_value_t = 2_000_000)]
    samples: u64,

    /// Number of shards (reservoir capacity is split between them)
    #[arg(long, default_value_t = 8)]
    shards: usize,

    /// Upper bound of the uniform latency distribution (µs)
    #[arg(long, default_value_t = 10_000)]
    max_latency_us: u64,

    // cargo bench passes --bench through to harness=false targets
    #[arg(long, hide = true)]
    bench: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(7);

    println!(
        "cfg: samples/shard={} | shards={} | latency=U(0, {}µs)",
        args.samples, args.shards, args.max_latency_us
    );

    let mut dumps = Vec::with_capacity(args.shards);
    let t0 = Instant::now();
    for sid in 0..args.shards {
        let mut reservoir = Reservoir::new(args.shards, sid as u64);
        let shard_start = Instant::now();
        for i in 0..args.samples {
            let op = if i % 10 == 0 { OpKind::Update } else { OpKind::Read };
            let us = rng.random_range(0..=args.max_latency_us);
            reservoir.update(op, Duration::from_micros(us));
        }
        let dt = shard_start.elapsed().as_secs_f64();
        println!(
            "shard {} update: {:.1} M samples/s (retained {})",
            sid,
            args.samples as f64 / dt / 1e6,
            reservoir.retained(OpKind::Read)
        );
        dumps.push(reservoir.into_dump(WorkloadClass::Kv, sid));
    }
    let sampling = t0.elapsed();

    // Record each shard into its own histogram set, then fold them together
    let t1 = Instant::now();
    let mut per_shard = Vec::with_capacity(dumps.len());
    for dump in &dumps {
        let mut hists = OpHists::new();
        hists.record_dump(dump)?;
        per_shard.push(hists);
    }
    let recording = t1.elapsed();

    let t2 = Instant::now();
    let mut hists = OpHists::new();
    for shard in &per_shard {
        hists.merge(shard)?;
    }
    let merging = t2.elapsed();

    println!("\n=== reservoir_bench results ===");
    println!(
        "sampling: {:.3} s | record: {:.3} ms | merge: {:.3} ms",
        sampling.as_secs_f64(),
        recording.as_secs_f64() * 1e3,
        merging.as_secs_f64() * 1e3
    );
    print_aggregates(WorkloadClass::Kv.name(), &hists.aggregates());

    Ok(())
}
