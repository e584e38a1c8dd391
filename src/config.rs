// src/config.rs
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete run configuration, usually loaded from a YAML file.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Operation mix, worker counts and per-class tunables
    pub workload: WorkloadSettings,

    /// The logical endpoint every worker talks to
    pub target: TargetSettings,

    /// Optional timer-driven shutdown (e.g. "10m"). When omitted the run ends
    /// when every class exhausts its `ops` target or on explicit shutdown.
    #[serde(default, with = "humantime_serde")]
    pub timer: Option<Duration>,

    /// Where reservoir dumps and result tables are written
    #[serde(default)]
    pub results: ResultsConfig,
}

impl Config {
    /// Parse and validate a YAML config file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let buf = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        Self::from_yaml_str(&buf).with_context(|| format!("parse {}", path.display()))
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(yaml).context("invalid YAML config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.workload.validate()?;
        if self.target.node.trim().is_empty() {
            bail!("target.node must not be empty");
        }
        Ok(())
    }
}

// ============================================================================
// Workload classes
// ============================================================================

/// The closed set of workload classes the orchestrator knows how to spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadClass {
    /// Full-document create/read/update/delete mix
    Kv,
    /// Same mix, but reads and updates touch individual fields
    SubDoc,
    /// View (secondary index) queries over existing keys
    SecondaryIndexQuery,
    /// N1QL-style statements issued to the indexing/query service
    IndexingServiceQuery,
    /// Pre-built full-text queries drawn at random
    FullText,
}

impl WorkloadClass {
    pub const ALL: [WorkloadClass; 5] = [
        WorkloadClass::Kv,
        WorkloadClass::SubDoc,
        WorkloadClass::SecondaryIndexQuery,
        WorkloadClass::IndexingServiceQuery,
        WorkloadClass::FullText,
    ];

    /// Worker name used in logs and reservoir dump file names
    pub fn name(&self) -> &'static str {
        match self {
            WorkloadClass::Kv => "kv-worker",
            WorkloadClass::SubDoc => "sub-doc-worker",
            WorkloadClass::SecondaryIndexQuery => "view-worker",
            WorkloadClass::IndexingServiceQuery => "n1ql-worker",
            WorkloadClass::FullText => "fts-es-worker",
        }
    }
}

impl fmt::Display for WorkloadClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Workload settings
// ============================================================================

/// Immutable per-run workload configuration shared read-only by all workers.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkloadSettings {
    /// Items already present when the run starts
    #[serde(default)]
    pub items: u64,

    /// Document size in bytes
    #[serde(default = "default_doc_size")]
    pub size: usize,

    // KV mix: integer proportions per batch
    #[serde(default)]
    pub creates: u64,
    #[serde(default)]
    pub reads: u64,
    #[serde(default)]
    pub updates: u64,
    #[serde(default)]
    pub deletes: u64,
    /// Compare-and-swap updates of existing keys
    #[serde(default)]
    pub cases: u64,

    /// Operation target per class ("max" or omitted = run until shutdown)
    #[serde(default)]
    pub ops: OpsTarget,

    /// Aggregate KV throughput across all KV workers (ops/sec)
    #[serde(default)]
    pub throughput: Throughput,

    /// KV worker count (0 disables the class)
    #[serde(default)]
    pub workers: usize,

    /// Hot working set as a percentage of existing items
    #[serde(default = "default_working_set")]
    pub working_set: f64,

    /// Percentage of accesses that go to the hot working set
    #[serde(default = "default_working_set_access")]
    pub working_set_access: u32,

    /// Migrate the hot working set every this often (e.g. "30s")
    #[serde(default, with = "humantime_serde")]
    pub working_set_move_time: Option<Duration>,

    /// Keys the hot window advances per migration (0 = one full hot-set width)
    #[serde(default)]
    pub working_set_moving_docs: u64,

    /// Percentage of created documents that get a TTL
    #[serde(default)]
    pub expiration: u32,

    /// Mixed into every per-shard RNG seed
    #[serde(default)]
    pub seed: Option<u64>,

    // Sub-document class
    #[serde(default)]
    pub subdoc_workers: usize,
    #[serde(default)]
    pub subdoc_fields: Vec<String>,

    // Secondary-index (view) query class
    #[serde(default)]
    pub query_workers: usize,
    #[serde(default)]
    pub query_throughput: Throughput,
    #[serde(default = "default_batch_size")]
    pub query_batch_size: u64,
    #[serde(default)]
    pub views: Vec<ViewSpec>,

    // Indexing-service (N1QL) class
    #[serde(default)]
    pub n1ql_workers: usize,
    #[serde(default)]
    pub n1ql_throughput: Throughput,
    #[serde(default = "default_batch_size")]
    pub n1ql_batch_size: u64,
    #[serde(default)]
    pub n1ql_op: N1qlOp,
    #[serde(default)]
    pub n1ql_queries: Vec<String>,

    // Full-text class
    #[serde(default)]
    pub fts: Option<FtsSettings>,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            items: 0,
            size: default_doc_size(),
            creates: 0,
            reads: 0,
            updates: 0,
            deletes: 0,
            cases: 0,
            ops: OpsTarget::Unbounded,
            throughput: Throughput::Unbounded,
            workers: 0,
            working_set: default_working_set(),
            working_set_access: default_working_set_access(),
            working_set_move_time: None,
            working_set_moving_docs: 0,
            expiration: 0,
            seed: None,
            subdoc_workers: 0,
            subdoc_fields: Vec::new(),
            query_workers: 0,
            query_throughput: Throughput::Unbounded,
            query_batch_size: default_batch_size(),
            views: Vec::new(),
            n1ql_workers: 0,
            n1ql_throughput: Throughput::Unbounded,
            n1ql_batch_size: default_batch_size(),
            n1ql_op: N1qlOp::Read,
            n1ql_queries: Vec::new(),
            fts: None,
        }
    }
}

fn default_doc_size() -> usize {
    crate::constants::DEFAULT_DOC_SIZE
}

fn default_working_set() -> f64 {
    crate::constants::DEFAULT_WORKING_SET
}

fn default_working_set_access() -> u32 {
    crate::constants::DEFAULT_WORKING_SET_ACCESS
}

fn default_batch_size() -> u64 {
    crate::constants::DEFAULT_BATCH_SIZE
}

impl WorkloadSettings {
    /// Operations per KV batch: the sum of the integer mix proportions
    pub fn kv_batch_size(&self) -> u64 {
        self.creates + self.reads + self.updates + self.deletes + self.cases
    }

    /// Number of workers to spawn for a class (0 disables it)
    pub fn workers_for(&self, class: WorkloadClass) -> usize {
        match class {
            WorkloadClass::Kv => self.workers,
            WorkloadClass::SubDoc => self.subdoc_workers,
            WorkloadClass::SecondaryIndexQuery => self.query_workers,
            WorkloadClass::IndexingServiceQuery => self.n1ql_workers,
            WorkloadClass::FullText => self.fts.as_ref().map(|f| f.workers).unwrap_or(0),
        }
    }

    /// Aggregate throughput target for a class
    pub fn throughput_for(&self, class: WorkloadClass) -> Throughput {
        match class {
            WorkloadClass::Kv | WorkloadClass::SubDoc => self.throughput,
            WorkloadClass::SecondaryIndexQuery => self.query_throughput,
            WorkloadClass::IndexingServiceQuery => self.n1ql_throughput,
            WorkloadClass::FullText => self
                .fts
                .as_ref()
                .map(|f| f.throughput)
                .unwrap_or(Throughput::Unbounded),
        }
    }

    /// Operations executed per batch by one worker of a class
    pub fn batch_size_for(&self, class: WorkloadClass) -> u64 {
        match class {
            WorkloadClass::Kv | WorkloadClass::SubDoc => self.kv_batch_size(),
            WorkloadClass::SecondaryIndexQuery => self.query_batch_size,
            WorkloadClass::IndexingServiceQuery => self.n1ql_batch_size,
            WorkloadClass::FullText => crate::constants::DEFAULT_BATCH_SIZE,
        }
    }

    /// Number of hot items out of `existing` items
    pub fn hot_items(&self, existing: u64) -> u64 {
        (existing as f64 * self.working_set / 100.0) as u64
    }

    /// Initial offset of the moving hot window
    pub fn initial_hot_load_start(&self) -> u64 {
        if self.working_set_move_time.is_some() {
            self.hot_items(self.items)
        } else {
            0
        }
    }

    pub fn validate(&self) -> Result<()> {
        let total: usize = WorkloadClass::ALL.iter().map(|c| self.workers_for(*c)).sum();
        if total == 0 {
            bail!("no workers configured: set workers, subdoc_workers, query_workers, n1ql_workers or fts.workers");
        }
        if !(0.0..=100.0).contains(&self.working_set) {
            bail!("working_set must be within [0, 100], got {}", self.working_set);
        }
        if self.working_set_access > 100 {
            bail!("working_set_access must be within [0, 100], got {}", self.working_set_access);
        }
        if self.expiration > 100 {
            bail!("expiration must be within [0, 100], got {}", self.expiration);
        }
        if let Some(move_time) = self.working_set_move_time {
            if move_time.is_zero() {
                bail!("working_set_move_time must be greater than zero");
            }
            if self.working_set >= 100.0 {
                bail!("a moving hot working set requires working_set < 100");
            }
        }
        for class in [WorkloadClass::Kv, WorkloadClass::SubDoc] {
            if self.workers_for(class) > 0 && self.kv_batch_size() == 0 {
                bail!("{} workers configured but creates/reads/updates/deletes/cases are all zero", class);
            }
        }
        if self.subdoc_workers > 0 && self.subdoc_fields.is_empty() {
            bail!("subdoc_workers > 0 requires at least one entry in subdoc_fields");
        }
        if self.query_workers > 0 {
            if self.views.is_empty() {
                bail!("query_workers > 0 requires at least one view");
            }
            if self.query_batch_size == 0 {
                bail!("query_batch_size must be greater than zero");
            }
        }
        if self.n1ql_workers > 0 {
            if self.n1ql_queries.is_empty() {
                bail!("n1ql_workers > 0 requires at least one statement in n1ql_queries");
            }
            if self.n1ql_batch_size == 0 {
                bail!("n1ql_batch_size must be greater than zero");
            }
        }
        if let Some(fts) = &self.fts {
            if fts.workers > 0 && fts.queries.is_empty() {
                bail!("fts.workers > 0 requires a non-empty fts.queries list");
            }
        }
        Ok(())
    }
}

/// Indexing-service command vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum N1qlOp {
    #[default]
    Read,
    Create,
    Update,
    #[serde(rename = "rangeupdate", alias = "range_update")]
    RangeUpdate,
}

/// One view to query: `field` of the selected document is bound as the key
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ViewSpec {
    pub design_doc: String,
    pub view: String,
    #[serde(default = "default_view_field")]
    pub field: String,
    /// Extra static query parameters (limit, stale, ...)
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

fn default_view_field() -> String {
    "name".to_string()
}

/// Full-text class settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FtsSettings {
    #[serde(default)]
    pub workers: usize,

    #[serde(default)]
    pub throughput: Throughput,

    /// Pre-built queries, drawn uniformly at random
    #[serde(default)]
    pub queries: Vec<FtsQuery>,

    /// Shard 0 appends failed or zero-hit queries here when set
    #[serde(default)]
    pub logfile: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FtsQuery {
    pub index: String,
    pub body: serde_json::Value,
}

// ============================================================================
// Target settings
// ============================================================================

/// Identifies one logical endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetSettings {
    /// Node address; `mem://` selects the built-in memory backend
    pub node: String,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Defaults to the bucket name
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: String,

    /// Keeps logical targets sharing a physical cluster apart
    #[serde(default)]
    pub prefix: String,
}

fn default_bucket() -> String {
    "bucket-1".to_string()
}

impl TargetSettings {
    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.bucket)
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResultsConfig {
    /// Base directory for the timestamped results directory
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Run name used in the directory name (defaults to the config file stem)
    #[serde(default)]
    pub name: Option<String>,

    /// Also write a `<name>-results.tsv` table
    #[serde(default)]
    pub tsv: bool,
}

// ============================================================================
// Throughput and operation targets
// ============================================================================

/// Aggregate operations/sec target for one workload class
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Throughput {
    /// Open-loop: never sleep between batches
    #[default]
    Unbounded,
    /// Target ops/sec, distributed evenly across the class's workers
    Limited(f64),
}

/// Total operations one workload class should issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpsTarget {
    /// Run until shutdown
    #[default]
    Unbounded,
    Count(u64),
}

impl OpsTarget {
    pub fn limit(&self) -> Option<u64> {
        match self {
            OpsTarget::Unbounded => None,
            OpsTarget::Count(n) => Some(*n),
        }
    }
}

/// Accepts "max", "inf", "unbounded" (any case), or a non-negative number.
/// Zero means unbounded, like the IOPS target it is modelled on.
fn parse_limit(value: &str) -> Option<Option<f64>> {
    match value.trim().to_ascii_lowercase().as_str() {
        "max" | "inf" | "infinity" | "unbounded" => Some(None),
        other => other
            .parse::<f64>()
            .ok()
            .filter(|n| *n >= 0.0)
            .map(|n| if n == 0.0 || n.is_infinite() { None } else { Some(n) }),
    }
}

struct LimitVisitor;

impl<'de> serde::de::Visitor<'de> for LimitVisitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a non-negative number, 0, \"max\" or \"inf\"")
    }

    fn visit_u64<E: serde::de::Error>(self, value: u64) -> Result<Self::Value, E> {
        Ok(if value == 0 { None } else { Some(value as f64) })
    }

    fn visit_i64<E: serde::de::Error>(self, value: i64) -> Result<Self::Value, E> {
        if value < 0 {
            return Err(E::custom(format!("negative limit: {}", value)));
        }
        self.visit_u64(value as u64)
    }

    fn visit_f64<E: serde::de::Error>(self, value: f64) -> Result<Self::Value, E> {
        if value < 0.0 {
            return Err(E::custom(format!("negative limit: {}", value)));
        }
        Ok(if value == 0.0 || value.is_infinite() { None } else { Some(value) })
    }

    fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Self::Value, E> {
        parse_limit(value).ok_or_else(|| E::custom(format!("invalid limit value: {}", value)))
    }
}

impl<'de> Deserialize<'de> for Throughput {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match deserializer.deserialize_any(LimitVisitor)? {
            None => Throughput::Unbounded,
            Some(n) => Throughput::Limited(n),
        })
    }
}

impl Serialize for Throughput {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Throughput::Unbounded => serializer.serialize_str("max"),
            Throughput::Limited(n) => serializer.serialize_f64(*n),
        }
    }
}

impl<'de> Deserialize<'de> for OpsTarget {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        match deserializer.deserialize_any(LimitVisitor)? {
            None => Ok(OpsTarget::Unbounded),
            Some(n) if n.fract() != 0.0 => {
                Err(D::Error::custom(format!("ops must be a whole number, got {}", n)))
            }
            Some(n) => Ok(OpsTarget::Count(n as u64)),
        }
    }
}

impl Serialize for OpsTarget {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            OpsTarget::Unbounded => serializer.serialize_str("max"),
            OpsTarget::Count(n) => serializer.serialize_u64(*n),
        }
    }
}
