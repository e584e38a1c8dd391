//! Storage-client capability consumed by workers
//!
//! Workers only need to invoke an opaque operation and observe its outcome;
//! the wire protocol is the connector's business. The built-in
//! [`MemoryStore`] (selected with a `mem://` node address) backs dry runs
//! and the test suite.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

use crate::config::TargetSettings;
use crate::docs::DocGenerator;
use crate::error::{StoreError, StoreResult};
use crate::keys::KeyFormatter;

/// Body of an update: either a whole document or a set of field mutations
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Document(Value),
    Fields(BTreeMap<String, Value>),
}

/// A read-only structured query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryRequest {
    /// Secondary-index (view) lookup
    View {
        design_doc: String,
        view: String,
        params: BTreeMap<String, Value>,
    },
    /// Indexing-service statement with positional arguments
    Statement { statement: String, args: Vec<Value> },
    /// Full-text search request
    FullText { index: String, body: Value },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryResult {
    /// Rows or hits returned
    pub rows: u64,
}

/// Operations a worker can issue against one logical target.
///
/// Implementations own their timeout behaviour and report it as
/// [`StoreError::Timeout`]; they never retry on the worker's behalf.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn create(&self, key: &str, doc: &Value, ttl: Option<Duration>) -> StoreResult<()>;

    /// Read a document; a non-empty `fields` list restricts the read to those paths
    async fn read(&self, key: &str, fields: &[String]) -> StoreResult<()>;

    async fn update(&self, key: &str, payload: &Payload) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn query(&self, request: &QueryRequest) -> StoreResult<QueryResult>;
}

/// Establishes a storage-client handle bound to a target
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, target: &TargetSettings) -> StoreResult<Arc<dyn KvStore>>;
}

// ============================================================================
// Memory backend
// ============================================================================

/// Options parsed from a `mem://` node address,
/// e.g. `mem://local?latency_us=250&fail_pct=0.5`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryOptions {
    /// Mean simulated latency per operation (exponentially distributed)
    pub latency_us: u64,
    /// Percentage of operations failing with a transient error
    pub fail_pct: f64,
    /// Required password; `None` accepts any credentials
    pub password: Option<String>,
}

impl MemoryOptions {
    pub fn parse(node: &str) -> StoreResult<Self> {
        let url = Url::parse(node)
            .map_err(|e| StoreError::Unsupported(format!("invalid node address {}: {}", node, e)))?;
        if url.scheme() != "mem" {
            return Err(StoreError::Unsupported(format!("not a mem:// address: {}", node)));
        }
        let mut opts = MemoryOptions::default();
        for (k, v) in url.query_pairs() {
            let bad = || StoreError::InvalidRequest(format!("bad mem:// option {}={}", k, v));
            match k.as_ref() {
                "latency_us" => opts.latency_us = v.parse().map_err(|_| bad())?,
                "fail_pct" => opts.fail_pct = v.parse().map_err(|_| bad())?,
                "password" => opts.password = Some(v.into_owned()),
                _ => return Err(bad()),
            }
        }
        Ok(opts)
    }
}

/// Per-operation call counters of a [`MemoryStore`]
#[derive(Debug, Default)]
pub struct MemoryStats {
    pub creates: AtomicU64,
    pub reads: AtomicU64,
    pub updates: AtomicU64,
    pub deletes: AtomicU64,
    pub queries: AtomicU64,
    pub injected_failures: AtomicU64,
}

struct Entry {
    doc: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|t| t > now).unwrap_or(true)
    }
}

/// In-process document store used for dry runs and tests
pub struct MemoryStore {
    docs: Mutex<HashMap<String, Entry>>,
    options: MemoryOptions,
    latency: Option<Exp<f64>>,
    rng: Mutex<StdRng>,
    stats: MemoryStats,
    access_log: Option<Mutex<Vec<String>>>,
}

impl MemoryStore {
    pub fn new(options: MemoryOptions) -> Self {
        let latency = if options.latency_us > 0 {
            Exp::new(1.0 / options.latency_us as f64).ok()
        } else {
            None
        };
        Self {
            docs: Mutex::new(HashMap::new()),
            options,
            latency,
            rng: Mutex::new(StdRng::seed_from_u64(rand::random())),
            stats: MemoryStats::default(),
            access_log: None,
        }
    }

    /// Record every key passed to `read` or `update`, in call order
    pub fn with_access_log(mut self) -> Self {
        self.access_log = Some(Mutex::new(Vec::new()));
        self
    }

    pub fn options(&self) -> &MemoryOptions {
        &self.options
    }

    pub fn stats(&self) -> &MemoryStats {
        &self.stats
    }

    /// Keys read or updated so far (empty unless built `with_access_log`)
    pub fn accessed_keys(&self) -> Vec<String> {
        self.access_log
            .as_ref()
            .map(|log| log.lock().clone())
            .unwrap_or_default()
    }

    /// Insert documents directly, bypassing latency and failure injection
    pub fn load<I>(&self, docs: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut map = self.docs.lock();
        for (key, doc) in docs {
            map.insert(key, Entry { doc, expires_at: None });
        }
    }

    /// Populate `items` documents at indexes `0..items`, the key space a run
    /// configured with `items` expects to find
    pub fn preload(&self, fmt: &KeyFormatter, docs: &DocGenerator, items: u64) {
        self.load((0..items).map(|i| {
            let key = fmt.key(i);
            let doc = docs.next(&key);
            (key, doc)
        }));
        debug!("Preloaded {} documents with prefix '{}'", items, fmt.prefix());
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.docs.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.docs.lock().get(key).map(|e| e.is_live(now)).unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        self.docs
            .lock()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.doc.clone())
    }

    /// Simulated service time plus failure injection, applied to every call
    async fn simulate(&self) -> StoreResult<()> {
        let (delay, fail) = {
            let mut rng = self.rng.lock();
            let delay = self.latency.as_ref().map(|d| d.sample(&mut *rng));
            let fail = self.options.fail_pct > 0.0
                && rng.random_range(0.0..100.0) < self.options.fail_pct;
            (delay, fail)
        };
        if let Some(micros) = delay {
            tokio::time::sleep(Duration::from_micros(micros as u64)).await;
        }
        if fail {
            self.stats.injected_failures.fetch_add(1, Ordering::Relaxed);
            return Err(StoreError::TemporaryFailure("injected failure".to_string()));
        }
        Ok(())
    }

    fn count_matches<F>(&self, pred: F) -> u64
    where
        F: Fn(&Value) -> bool,
    {
        let now = Instant::now();
        self.docs
            .lock()
            .values()
            .filter(|e| e.is_live(now) && pred(&e.doc))
            .count() as u64
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn create(&self, key: &str, doc: &Value, ttl: Option<Duration>) -> StoreResult<()> {
        self.stats.creates.fetch_add(1, Ordering::Relaxed);
        self.simulate().await?;
        let expires_at = ttl.map(|t| Instant::now() + t);
        self.docs
            .lock()
            .insert(key.to_string(), Entry { doc: doc.clone(), expires_at });
        Ok(())
    }

    async fn read(&self, key: &str, fields: &[String]) -> StoreResult<()> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        if let Some(log) = &self.access_log {
            log.lock().push(key.to_string());
        }
        self.simulate().await?;
        let now = Instant::now();
        let docs = self.docs.lock();
        let entry = docs
            .get(key)
            .filter(|e| e.is_live(now))
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        for field in fields {
            if entry.doc.get(field).is_none() {
                return Err(StoreError::NotFound(format!("{}.{}", key, field)));
            }
        }
        Ok(())
    }

    async fn update(&self, key: &str, payload: &Payload) -> StoreResult<()> {
        self.stats.updates.fetch_add(1, Ordering::Relaxed);
        if let Some(log) = &self.access_log {
            log.lock().push(key.to_string());
        }
        self.simulate().await?;
        let mut docs = self.docs.lock();
        match payload {
            Payload::Document(doc) => {
                docs.insert(key.to_string(), Entry { doc: doc.clone(), expires_at: None });
            }
            Payload::Fields(fields) => {
                let now = Instant::now();
                let entry = docs
                    .get_mut(key)
                    .filter(|e| e.is_live(now))
                    .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
                let obj = entry.doc.as_object_mut().ok_or_else(|| {
                    StoreError::InvalidRequest(format!("{} is not a JSON object", key))
                })?;
                for (path, value) in fields {
                    obj.insert(path.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        self.simulate().await?;
        let now = Instant::now();
        match self.docs.lock().remove(key) {
            Some(e) if e.is_live(now) => Ok(()),
            _ => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn query(&self, request: &QueryRequest) -> StoreResult<QueryResult> {
        self.stats.queries.fetch_add(1, Ordering::Relaxed);
        self.simulate().await?;
        let rows = match request {
            QueryRequest::View { params, .. } => match (params.get("field"), params.get("key")) {
                (Some(Value::String(field)), Some(key)) => {
                    self.count_matches(|doc| doc.get(field) == Some(key))
                }
                _ => self.len() as u64,
            },
            QueryRequest::Statement { statement, args } => {
                if statement.trim().is_empty() {
                    return Err(StoreError::InvalidRequest("empty statement".to_string()));
                }
                match args.first() {
                    Some(Value::String(key)) => self.contains(key) as u64,
                    _ => self.len() as u64,
                }
            }
            QueryRequest::FullText { body, .. } => {
                let term = body
                    .pointer("/query/match")
                    .or_else(|| body.pointer("/query/query"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match term {
                    Some(term) => self.count_matches(|doc| doc.to_string().contains(&term)),
                    None => {
                        return Err(StoreError::InvalidRequest(
                            "full-text body has no query.match term".to_string(),
                        ))
                    }
                }
            }
        };
        Ok(QueryResult { rows })
    }
}

/// Hands out one shared [`MemoryStore`] to every worker
#[derive(Clone)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Build a connector whose store options come from the target's node address
    pub fn for_target(target: &TargetSettings) -> StoreResult<Self> {
        let options = MemoryOptions::parse(&target.node)?;
        Ok(Self::new(Arc::new(MemoryStore::new(options))))
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, target: &TargetSettings) -> StoreResult<Arc<dyn KvStore>> {
        let is_mem = Url::parse(&target.node).map(|u| u.scheme() == "mem").unwrap_or(false);
        if !is_mem {
            return Err(StoreError::Unsupported(format!(
                "no client available for node '{}'",
                target.node
            )));
        }
        if let Some(expected) = &self.store.options().password {
            if *expected != target.password {
                return Err(StoreError::AuthFailure(format!(
                    "bad credentials for user '{}'",
                    target.username()
                )));
            }
        }
        debug!("Connected to {} bucket={}", target.node, target.bucket);
        Ok(self.store.clone() as Arc<dyn KvStore>)
    }
}
