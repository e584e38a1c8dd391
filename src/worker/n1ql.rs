//! Indexing-service (N1QL) worker
//!
//! Same skeleton as the KV worker, but every operation is a statement sent
//! to the query service with the selected key bound as `$1`. Which keys get
//! bound depends on `n1ql_op`.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;

use super::{Recorder, WorkerContext};
use crate::config::N1qlOp;
use crate::constants::N1QL_KEY_PREFIX;
use crate::counters::SharedCounters;
use crate::docs::DocGenerator;
use crate::error::WorkerError;
use crate::keys::{ExistingKey, KeyForCasUpdate, KeyFormatter, NewKey};
use crate::reservoir::OpKind;
use crate::store::{KvStore, QueryRequest};

/// Indexing-service documents live under their own key prefix
pub fn key_prefix(target_prefix: &str) -> String {
    if target_prefix.is_empty() {
        N1QL_KEY_PREFIX.to_string()
    } else {
        format!("{}-{}", target_prefix, N1QL_KEY_PREFIX)
    }
}

pub struct IndexingServiceWorker {
    op: N1qlOp,
    sid: usize,
    batch_size: u64,
    rng: StdRng,
    statements: Vec<String>,
    next_statement: usize,
    existing: ExistingKey,
    new_keys: NewKey,
    cas_keys: KeyForCasUpdate,
    docs: DocGenerator,
}

impl IndexingServiceWorker {
    pub fn new(ctx: &WorkerContext) -> Self {
        let ws = &ctx.settings;
        let fmt = KeyFormatter::new(key_prefix(&ctx.target.prefix));
        Self {
            op: ws.n1ql_op,
            sid: ctx.sid,
            batch_size: ctx.batch_size(),
            rng: StdRng::seed_from_u64(ctx.seed()),
            statements: ws.n1ql_queries.clone(),
            next_statement: 0,
            existing: ExistingKey::new(ws.working_set, ws.working_set_access, fmt.clone()),
            new_keys: NewKey::new(fmt.clone(), ws.expiration),
            cas_keys: KeyForCasUpdate::new(ctx.workers(), fmt),
            docs: DocGenerator::new(ws.size),
        }
    }

    fn op_kind(&self) -> OpKind {
        match self.op {
            N1qlOp::Read => OpKind::Read,
            N1qlOp::Create => OpKind::Create,
            N1qlOp::Update | N1qlOp::RangeUpdate => OpKind::Update,
        }
    }

    /// Keys bound to the next batch of statements
    pub fn plan_keys(&mut self, counters: &SharedCounters) -> Vec<String> {
        let n = self.batch_size;
        match self.op {
            N1qlOp::Read => {
                let current = counters.current_items();
                (0..n).map(|_| self.existing.next(&mut self.rng, current, 0)).collect()
            }
            N1qlOp::Create => {
                let base = counters.reserve_creates(n);
                (base..base + n)
                    .map(|i| self.new_keys.next(&mut self.rng, i).0)
                    .collect()
            }
            N1qlOp::Update | N1qlOp::RangeUpdate => {
                counters.reserve_cas_updates(n);
                let current = counters.current_items().saturating_sub(n);
                (0..n)
                    .map(|_| self.cas_keys.next(&mut self.rng, self.sid, current))
                    .collect()
            }
        }
    }

    fn next_statement(&mut self, key: &str) -> Option<QueryRequest> {
        if self.statements.is_empty() {
            return None;
        }
        let statement = self.statements[self.next_statement % self.statements.len()].clone();
        self.next_statement = self.next_statement.wrapping_add(1);
        let mut args = vec![Value::String(key.to_string())];
        if !matches!(self.op, N1qlOp::Read) {
            args.push(self.docs.next(key));
        }
        Some(QueryRequest::Statement { statement, args })
    }

    pub async fn run_batch(
        &mut self,
        ctx: &WorkerContext,
        store: &dyn KvStore,
        rec: &mut Recorder,
    ) -> Result<(), WorkerError> {
        let op = self.op_kind();
        for key in self.plan_keys(&ctx.counters) {
            let Some(request) = self.next_statement(&key) else {
                break;
            };
            rec.exec(op, store.query(&request)).await?;
        }
        Ok(())
    }
}
