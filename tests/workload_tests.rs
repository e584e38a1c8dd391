//! End-to-end tests of the orchestrator against the in-memory backend
//!
//! These runs spawn real worker tasks through `workload::start` and check
//! what they leave behind: store contents, the access log, shared counters
//! and the merged per-class results.

use async_trait::async_trait;
use serde_json::{json, Value};
use spring_bench::config::{
    Config, FtsQuery, FtsSettings, N1qlOp, OpsTarget, ResultsConfig, TargetSettings, Throughput,
    ViewSpec, WorkloadClass, WorkloadSettings,
};
use spring_bench::counters::ShutdownReason;
use spring_bench::docs::DocGenerator;
use spring_bench::error::{RunError, StoreError, StoreResult, WorkerError};
use spring_bench::keys::KeyFormatter;
use spring_bench::reservoir::OpKind;
use spring_bench::sink::{JsonFileSink, MemorySink};
use spring_bench::store::{
    KvStore, MemoryConnector, MemoryOptions, MemoryStore, Payload, QueryRequest, QueryResult,
    StoreConnector,
};
use spring_bench::worker::WorkerState;
use spring_bench::workload;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn target(node: &str) -> TargetSettings {
    TargetSettings {
        node: node.to_string(),
        bucket: "bucket-1".to_string(),
        username: None,
        password: "secret".to_string(),
        prefix: String::new(),
    }
}

fn config(workload: WorkloadSettings) -> Config {
    Config {
        workload,
        target: target("mem://test"),
        timer: None,
        results: ResultsConfig::default(),
    }
}

fn preloaded(items: u64) -> Arc<MemoryStore> {
    let store = MemoryStore::new(MemoryOptions::default()).with_access_log();
    store.preload(&KeyFormatter::new(""), &DocGenerator::new(256), items);
    Arc::new(store)
}

fn index(key: &str) -> u64 {
    KeyFormatter::new("").index_of(key).expect("numeric key")
}

/// Reads-only run: the ops target is hit exactly and reads are spread
/// uniformly over the initial key space
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_only_run_completes_ops_target() {
    let store = preloaded(1_000);
    let sink = Arc::new(MemorySink::new());
    let cfg = config(WorkloadSettings {
        items: 1_000,
        size: 256,
        reads: 10,
        workers: 4,
        ops: OpsTarget::Count(2_000),
        ..Default::default()
    });

    let handle = workload::start(&cfg, Arc::new(MemoryConnector::new(store.clone())), sink.clone())
        .unwrap();
    assert_eq!(handle.worker_count(), 4);
    let result = handle.await_completion().await.unwrap();

    assert_eq!(store.stats().reads.load(Ordering::Relaxed), 2_000);
    // Uniform over [0, 1000): ten buckets of 100 keys, each near 200 reads
    let mut buckets = [0u32; 10];
    for key in store.accessed_keys() {
        let i = index(&key);
        assert!(i < 1_000, "read outside key space: {}", key);
        buckets[(i / 100) as usize] += 1;
    }
    assert_eq!(buckets.iter().sum::<u32>(), 2_000);
    for (b, n) in buckets.iter().enumerate() {
        assert!((150..=250).contains(n), "bucket {} got {} reads: {:?}", b, n, buckets);
    }

    let kv = result.class(WorkloadClass::Kv).unwrap();
    assert_eq!(kv.total_ops, 2_000);
    assert_eq!(kv.failed_ops, 0);
    assert_eq!(kv.shards.len(), 4);
    assert!(kv.shards.iter().all(|s| s.state == WorkerState::Completed));
    assert_eq!(kv.shards.iter().map(|s| s.sid).collect::<Vec<_>>(), vec![0, 1, 2, 3]);

    let reads = kv.ops.iter().find(|a| a.op == OpKind::Read).unwrap();
    assert_eq!(reads.count, 2_000);
    assert!(result.shutdown_reason.is_none());

    let mut names: Vec<String> = sink.dumps().iter().map(|d| d.name()).collect();
    names.sort();
    assert_eq!(names, vec!["kv-worker-0", "kv-worker-1", "kv-worker-2", "kv-worker-3"]);
}

/// Concurrent creators receive disjoint index ranges: the final key space
/// is exactly `[0, ops)` with no gaps or overwrites
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_fill_contiguous_range() {
    let store = Arc::new(MemoryStore::new(MemoryOptions::default()));
    let cfg = config(WorkloadSettings {
        items: 0,
        size: 128,
        creates: 5,
        workers: 8,
        ops: OpsTarget::Count(4_000),
        ..Default::default()
    });

    let handle = workload::start(
        &cfg,
        Arc::new(MemoryConnector::new(store.clone())),
        Arc::new(MemorySink::new()),
    )
    .unwrap();
    let counters = handle.counters().clone();
    handle.await_completion().await.unwrap();

    assert_eq!(counters.current_items(), 4_000);
    assert_eq!(store.stats().creates.load(Ordering::Relaxed), 4_000);
    assert_eq!(store.len(), 4_000);
    let fmt = KeyFormatter::new("");
    assert!((0..4_000).all(|i| store.contains(&fmt.key(i))));
}

/// Updates under a moving hot set only ever touch the window that was
/// current when the batch was planned, and the window does move
#[tokio::test(start_paused = true)]
async fn test_moving_hot_updates_follow_timer() {
    let store = Arc::new(MemoryStore::new(MemoryOptions::default()).with_access_log());
    let mut cfg = config(WorkloadSettings {
        items: 100_000,
        size: 64,
        updates: 10,
        workers: 2,
        // 10 ops × 2 workers / 200 ops/s = one batch per worker every 100ms
        throughput: Throughput::Limited(200.0),
        working_set: 10.0,
        working_set_move_time: Some(Duration::from_secs(1)),
        ..Default::default()
    });
    cfg.timer = Some(Duration::from_millis(3_500));

    let handle = workload::start(
        &cfg,
        Arc::new(MemoryConnector::new(store.clone())),
        Arc::new(MemorySink::new()),
    )
    .unwrap();
    let counters = handle.counters().clone();
    assert_eq!(counters.hot().start(), 10_000);
    let result = handle.await_completion().await.unwrap();

    assert_eq!(result.shutdown_reason, Some(ShutdownReason::Timer));
    assert_eq!(counters.hot().migrations(), 3);
    assert_eq!(counters.hot().start(), 40_000);

    let updated: Vec<u64> = store.accessed_keys().iter().map(|k| index(k)).collect();
    assert!(!updated.is_empty());
    assert!(updated.iter().all(|i| (10_000..50_000).contains(i)));
    assert!(updated.iter().any(|i| (10_000..20_000).contains(i)), "first window unused");
    assert!(updated.iter().any(|i| (40_000..50_000).contains(i)), "last window unused");
    // Nothing reached past the last published window
    assert!(updated.iter().all(|i| *i < 50_000));
}

#[tokio::test(start_paused = true)]
async fn test_timer_stops_unbounded_run() {
    let store = preloaded(500);
    let mut cfg = config(WorkloadSettings {
        items: 500,
        reads: 5,
        workers: 2,
        throughput: Throughput::Limited(100.0),
        ..Default::default()
    });
    cfg.timer = Some(Duration::from_secs(2));

    let handle =
        workload::start(&cfg, Arc::new(MemoryConnector::new(store)), Arc::new(MemorySink::new()))
            .unwrap();
    let result = handle.await_completion().await.unwrap();

    assert_eq!(result.shutdown_reason, Some(ShutdownReason::Timer));
    let kv = result.class(WorkloadClass::Kv).unwrap();
    assert!(kv.shards.iter().all(|s| s.state == WorkerState::Stopped));
    // ~2s at 100 ops/s, in whole batches of 5
    assert!((150..=250).contains(&kv.total_ops), "total {}", kv.total_ops);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_mid_run_flushes_every_shard() {
    let store = preloaded(500);
    let sink = Arc::new(MemorySink::new());
    let cfg = config(WorkloadSettings {
        items: 500,
        reads: 5,
        updates: 5,
        workers: 3,
        throughput: Throughput::Limited(50.0),
        ..Default::default()
    });

    let handle = workload::start(&cfg, Arc::new(MemoryConnector::new(store)), sink.clone()).unwrap();
    let signal = handle.shutdown_signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        signal.trigger(ShutdownReason::Interrupt);
    });
    let result = handle.await_completion().await.unwrap();

    assert_eq!(result.shutdown_reason, Some(ShutdownReason::Interrupt));
    let kv = result.class(WorkloadClass::Kv).unwrap();
    assert!(kv.shards.iter().all(|s| s.state == WorkerState::Interrupted));
    assert!(kv.total_ops > 0);
    assert_eq!(sink.dumps().len(), 3);
}

#[tokio::test]
async fn test_shutdown_before_await_stops_all_workers() {
    let store = preloaded(100);
    let cfg = config(WorkloadSettings {
        items: 100,
        reads: 10,
        workers: 2,
        throughput: Throughput::Limited(10.0),
        ..Default::default()
    });
    let handle =
        workload::start(&cfg, Arc::new(MemoryConnector::new(store)), Arc::new(MemorySink::new()))
            .unwrap();
    handle.shutdown();
    let result = tokio::time::timeout(Duration::from_secs(5), handle.await_completion())
        .await
        .expect("workers should stop promptly")
        .unwrap();
    assert_eq!(result.shutdown_reason, Some(ShutdownReason::Requested));
    let kv = result.class(WorkloadClass::Kv).unwrap();
    assert!(kv.shards.iter().all(|s| s.state == WorkerState::Stopped));
}

#[tokio::test]
async fn test_bad_credentials_fail_fast() {
    let mut cfg = config(WorkloadSettings {
        items: 10,
        reads: 1,
        workers: 3,
        ..Default::default()
    });
    cfg.target = TargetSettings {
        password: "wrong".to_string(),
        ..target("mem://guarded?password=secret")
    };
    let connector = MemoryConnector::for_target(&cfg.target).unwrap();
    let handle =
        workload::start(&cfg, Arc::new(connector), Arc::new(MemorySink::new())).unwrap();

    match handle.await_completion().await {
        Err(RunError::WorkerFailed { class, source: WorkerError::Startup(e), .. }) => {
            assert_eq!(class, WorkloadClass::Kv);
            assert!(matches!(e, StoreError::AuthFailure(_)));
        }
        other => panic!("expected startup failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_node_fails_fast() {
    let mut cfg = config(WorkloadSettings { items: 10, reads: 1, workers: 1, ..Default::default() });
    cfg.target = target("couchbase://10.1.2.3");
    let handle = workload::start(
        &cfg,
        Arc::new(MemoryConnector::new(preloaded(10))),
        Arc::new(MemorySink::new()),
    )
    .unwrap();
    let err = handle.await_completion().await.unwrap_err();
    assert!(err.to_string().starts_with("kv-worker-0 failed"), "{}", err);
}

#[test]
fn test_invalid_config_rejected_before_spawning() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();
    let cfg = config(WorkloadSettings { items: 10, workers: 1, ..Default::default() });
    let started = workload::start(
        &cfg,
        Arc::new(MemoryConnector::new(preloaded(10))),
        Arc::new(MemorySink::new()),
    );
    assert!(started.is_err());
}

/// Store whose statement endpoint rejects every request as malformed
struct BrokenQueryStore(Arc<MemoryStore>);

#[async_trait]
impl KvStore for BrokenQueryStore {
    async fn create(&self, key: &str, doc: &Value, ttl: Option<Duration>) -> StoreResult<()> {
        self.0.create(key, doc, ttl).await
    }
    async fn read(&self, key: &str, fields: &[String]) -> StoreResult<()> {
        self.0.read(key, fields).await
    }
    async fn update(&self, key: &str, payload: &Payload) -> StoreResult<()> {
        self.0.update(key, payload).await
    }
    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.0.delete(key).await
    }
    async fn query(&self, request: &QueryRequest) -> StoreResult<QueryResult> {
        match request {
            QueryRequest::Statement { .. } => {
                Err(StoreError::InvalidRequest("syntax error near $1".to_string()))
            }
            other => self.0.query(other).await,
        }
    }
}

struct BrokenQueryConnector(Arc<MemoryStore>);

#[async_trait]
impl StoreConnector for BrokenQueryConnector {
    async fn connect(&self, _target: &TargetSettings) -> StoreResult<Arc<dyn KvStore>> {
        Ok(Arc::new(BrokenQueryStore(self.0.clone())))
    }
}

/// One class failing mid-run stops the healthy classes too
#[tokio::test]
async fn test_fatal_error_stops_other_classes() {
    let store = preloaded(100);
    let cfg = config(WorkloadSettings {
        items: 100,
        reads: 10,
        workers: 2,
        throughput: Throughput::Limited(20.0),
        n1ql_workers: 1,
        n1ql_batch_size: 5,
        n1ql_queries: vec!["SELECT * FROM `bucket-1` USE KEYS [$1]".to_string()],
        ..Default::default()
    });
    let sink = Arc::new(MemorySink::new());
    let handle = workload::start(&cfg, Arc::new(BrokenQueryConnector(store)), sink.clone()).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(10), handle.await_completion())
        .await
        .expect("healthy workers should be stopped");
    match outcome {
        Err(RunError::WorkerFailed { class, sid, source: WorkerError::Fatal(_) }) => {
            assert_eq!(class, WorkloadClass::IndexingServiceQuery);
            assert_eq!(sid, 0);
        }
        other => panic!("expected fatal n1ql failure, got {:?}", other),
    }
    // Every shard flushed, the failed one included
    assert_eq!(sink.dumps().len(), 3);
}

/// All query classes next to a KV mix, results written through the JSON sink
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_classes_with_file_sink() {
    let tmp = TempDir::new().unwrap();
    let fts_log = tmp.path().join("fts.log");

    let store = MemoryStore::new(MemoryOptions::default());
    let docs = DocGenerator::new(256);
    store.preload(&KeyFormatter::new(""), &docs, 2_000);
    store.preload(&KeyFormatter::new("n1ql"), &docs, 2_000);
    let store = Arc::new(store);

    let cfg = config(WorkloadSettings {
        items: 2_000,
        size: 256,
        creates: 2,
        reads: 6,
        updates: 2,
        workers: 2,
        subdoc_workers: 1,
        subdoc_fields: vec!["city".to_string()],
        ops: OpsTarget::Count(300),
        query_workers: 2,
        query_batch_size: 10,
        views: vec![ViewSpec {
            design_doc: "ddoc".to_string(),
            view: "by_city".to_string(),
            field: "city".to_string(),
            params: BTreeMap::new(),
        }],
        n1ql_workers: 2,
        n1ql_batch_size: 10,
        n1ql_op: N1qlOp::Read,
        n1ql_queries: vec!["SELECT * FROM `bucket-1` USE KEYS [$1]".to_string()],
        fts: Some(FtsSettings {
            workers: 2,
            throughput: Throughput::Unbounded,
            queries: vec![
                FtsQuery { index: "idx".to_string(), body: json!({"query": {"match": "zzzz-none"}}) },
            ],
            logfile: Some(fts_log.clone()),
        }),
        ..Default::default()
    });

    let sink = JsonFileSink::new(tmp.path());
    let handle =
        workload::start(&cfg, Arc::new(MemoryConnector::new(store)), Arc::new(sink)).unwrap();
    assert_eq!(handle.worker_count(), 9);
    let result = handle.await_completion().await.unwrap();

    let classes: Vec<WorkloadClass> = result.classes.iter().map(|c| c.class).collect();
    assert_eq!(classes, WorkloadClass::ALL.to_vec());
    for class in &result.classes {
        assert_eq!(class.total_ops + class.failed_ops, 300, "{}", class.class);
        assert!(class.shards.iter().all(|s| s.state == WorkerState::Completed));
    }
    assert_eq!(result.class(WorkloadClass::IndexingServiceQuery).unwrap().failed_ops, 0);

    for name in ["kv-worker-1", "sub-doc-worker-0", "view-worker-1", "n1ql-worker-0", "fts-es-worker-1"] {
        assert!(tmp.path().join(format!("{}.json", name)).exists(), "missing dump {}", name);
    }

    // Only fts shard 0 validates; its share of the 300 zero-hit queries is logged
    let log = std::fs::read_to_string(&fts_log).unwrap();
    let logged: HashSet<&str> = log.lines().collect();
    assert_eq!(logged.len(), 1);
    assert!(log.lines().all(|l| l.ends_with("\t0 hits")));
    let fts = result.class(WorkloadClass::FullText).unwrap();
    let shard0 = fts.shards.iter().find(|s| s.sid == 0).unwrap();
    assert_eq!(log.lines().count() as u64, shard0.completed_ops);
}
