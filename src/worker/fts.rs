//! Full-text query worker
//!
//! Stateless with respect to the key space: every operation is one of the
//! pre-built queries, drawn uniformly at random. Only shard 0 inspects
//! results, appending failed and zero-hit queries to the anomaly log when
//! one is configured; the other shards fire and forget.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::{Recorder, WorkerContext};
use crate::config::FtsQuery;
use crate::error::WorkerError;
use crate::reservoir::OpKind;
use crate::store::{KvStore, QueryRequest};

pub struct FullTextWorker {
    rng: StdRng,
    queries: Vec<FtsQuery>,
    /// Set on shard 0 only
    logfile: Option<PathBuf>,
}

impl FullTextWorker {
    pub fn new(ctx: &WorkerContext) -> Self {
        let fts = ctx.settings.fts.as_ref();
        let logfile = if ctx.sid == 0 {
            fts.and_then(|f| f.logfile.clone())
        } else {
            None
        };
        Self {
            rng: StdRng::seed_from_u64(ctx.seed()),
            queries: fts.map(|f| f.queries.clone()).unwrap_or_default(),
            logfile,
        }
    }

    pub fn validates(&self) -> bool {
        self.logfile.is_some()
    }

    pub fn next_query(&mut self) -> Option<&FtsQuery> {
        if self.queries.is_empty() {
            return None;
        }
        let i = self.rng.random_range(0..self.queries.len());
        self.queries.get(i)
    }

    async fn log_anomaly(&self, query: &FtsQuery, outcome: &str) {
        let Some(path) = &self.logfile else { return };
        let line = format!("{}\t{}\t{}\n", query.index, query.body, outcome);
        let result = async {
            let mut f = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            f.write_all(line.as_bytes()).await
        }
        .await;
        if let Err(e) = result {
            warn!("I/O error writing {}: {}", path.display(), e);
        }
    }

    pub async fn run_batch(
        &mut self,
        ctx: &WorkerContext,
        store: &dyn KvStore,
        rec: &mut Recorder,
    ) -> Result<(), WorkerError> {
        for _ in 0..ctx.batch_size() {
            let Some(query) = self.next_query().cloned() else {
                break;
            };
            let request = QueryRequest::FullText {
                index: query.index.clone(),
                body: query.body.clone(),
            };
            let outcome = rec.timed(OpKind::Query, store.query(&request)).await?;
            if !self.validates() {
                continue;
            }
            match outcome {
                Ok(result) if result.rows == 0 => self.log_anomaly(&query, "0 hits").await,
                Ok(_) => {}
                Err(e) => self.log_anomaly(&query, &e.to_string()).await,
            }
        }
        Ok(())
    }
}
