//! Key-value and sub-document workers
//!
//! Both classes share the batch skeleton: the mix (`creates`, `reads`,
//! `updates`, `deletes`, `cases`) is laid out exactly once per batch and then
//! shuffled. The sub-document flavour reads and mutates only the configured
//! `subdoc_fields`.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::time::Duration;

use super::{Recorder, WorkerContext};
use crate::config::WorkloadClass;
use crate::counters::SharedCounters;
use crate::docs::DocGenerator;
use crate::error::WorkerError;
use crate::keys::{ExistingKey, ExistingMovingHotWorkloadKey, KeyForRemoval, KeyFormatter, NewKey};
use crate::reservoir::OpKind;
use crate::store::{KvStore, Payload};

/// One planned operation of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvCommand {
    Create { key: String, ttl: Option<Duration> },
    Read { key: String },
    Update { key: String },
    Delete { key: String },
    Cas { key: String },
}

impl KvCommand {
    pub fn op(&self) -> OpKind {
        match self {
            KvCommand::Create { .. } => OpKind::Create,
            KvCommand::Read { .. } => OpKind::Read,
            KvCommand::Update { .. } => OpKind::Update,
            KvCommand::Delete { .. } => OpKind::Delete,
            KvCommand::Cas { .. } => OpKind::Cas,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            KvCommand::Create { key, .. }
            | KvCommand::Read { key }
            | KvCommand::Update { key }
            | KvCommand::Delete { key }
            | KvCommand::Cas { key } => key,
        }
    }
}

pub struct KvWorker {
    /// Field paths for sub-document access; empty means whole documents
    fields: Vec<String>,
    rng: StdRng,
    mix: Vec<OpKind>,
    creates: u64,
    deletes: u64,
    workers: u64,
    existing: ExistingKey,
    moving: Option<ExistingMovingHotWorkloadKey>,
    new_keys: NewKey,
    removal: KeyForRemoval,
    docs: DocGenerator,
}

impl KvWorker {
    pub fn new(ctx: &WorkerContext) -> Self {
        let ws = &ctx.settings;
        let fmt = KeyFormatter::new(ctx.target.prefix.clone());
        let fields = if ctx.class == WorkloadClass::SubDoc {
            ws.subdoc_fields.clone()
        } else {
            Vec::new()
        };

        let mut mix = Vec::with_capacity(ws.kv_batch_size() as usize);
        for (op, n) in [
            (OpKind::Create, ws.creates),
            (OpKind::Read, ws.reads),
            (OpKind::Update, ws.updates),
            (OpKind::Delete, ws.deletes),
            (OpKind::Cas, ws.cases),
        ] {
            mix.extend(std::iter::repeat(op).take(n as usize));
        }

        // Field mutations go through the static model, like sub-doc reads
        let moving = match (ws.working_set_move_time, fields.is_empty()) {
            (Some(_), true) => Some(ExistingMovingHotWorkloadKey::new(ws.working_set, fmt.clone())),
            _ => None,
        };

        Self {
            fields,
            rng: StdRng::seed_from_u64(ctx.seed()),
            mix,
            creates: ws.creates,
            deletes: ws.deletes,
            workers: ctx.workers().max(1) as u64,
            existing: ExistingKey::new(ws.working_set, ws.working_set_access, fmt.clone()),
            moving,
            new_keys: NewKey::new(fmt.clone(), ws.expiration),
            removal: KeyForRemoval::new(fmt),
            docs: DocGenerator::new(ws.size),
        }
    }

    /// Lay out the next batch.
    ///
    /// Creates and deletes reserve their index ranges on the shared counters
    /// up front. Reads and updates stay inside a conservative window that
    /// excludes the ranges every other worker may be creating or deleting
    /// right now; the window is best effort, not an exact visibility bound.
    pub fn plan_batch(&mut self, counters: &SharedCounters) -> Vec<KvCommand> {
        let mut ops = self.mix.clone();
        ops.shuffle(&mut self.rng);

        let (mut next_create, current_spot) = if self.creates > 0 {
            let base = counters.reserve_creates(self.creates);
            (base, base.saturating_sub(self.creates * self.workers))
        } else {
            let current = counters.current_items();
            (current, current)
        };
        let (mut next_delete, deleted_spot) = if self.deletes > 0 {
            let base = counters.reserve_deletes(self.deletes);
            (base, base + self.deletes * self.workers)
        } else {
            let deleted = counters.deleted_items();
            (deleted, deleted)
        };
        let hot_start = counters.hot().start();

        ops.into_iter()
            .map(|op| match op {
                OpKind::Create => {
                    let (key, ttl) = self.new_keys.next(&mut self.rng, next_create);
                    next_create += 1;
                    KvCommand::Create { key, ttl }
                }
                OpKind::Update => {
                    let key = match &self.moving {
                        Some(m) => m.next(&mut self.rng, current_spot, deleted_spot, hot_start),
                        None => self.existing.next(&mut self.rng, current_spot, deleted_spot),
                    };
                    KvCommand::Update { key }
                }
                OpKind::Delete => {
                    let key = self.removal.next(next_delete);
                    next_delete += 1;
                    KvCommand::Delete { key }
                }
                OpKind::Cas => KvCommand::Cas {
                    key: self.existing.next(&mut self.rng, current_spot, deleted_spot),
                },
                OpKind::Read | OpKind::Query => KvCommand::Read {
                    key: self.existing.next(&mut self.rng, current_spot, deleted_spot),
                },
            })
            .collect()
    }

    fn update_payload(&mut self, key: &str) -> Payload {
        if self.fields.is_empty() {
            Payload::Document(self.docs.next(key))
        } else {
            Payload::Fields(self.docs.mutate_fields(&self.fields, &mut self.rng))
        }
    }

    pub async fn run_batch(
        &mut self,
        ctx: &WorkerContext,
        store: &dyn KvStore,
        rec: &mut Recorder,
    ) -> Result<(), WorkerError> {
        for cmd in self.plan_batch(&ctx.counters) {
            match &cmd {
                KvCommand::Create { key, ttl } => {
                    let doc = self.docs.next(key);
                    rec.exec(OpKind::Create, store.create(key, &doc, *ttl)).await?;
                }
                KvCommand::Read { key } => {
                    rec.exec(OpKind::Read, store.read(key, &self.fields)).await?;
                }
                KvCommand::Update { key } => {
                    let payload = self.update_payload(key);
                    rec.exec(OpKind::Update, store.update(key, &payload)).await?;
                }
                KvCommand::Delete { key } => {
                    rec.exec(OpKind::Delete, store.delete(key)).await?;
                }
                KvCommand::Cas { key } => {
                    let payload = self.update_payload(key);
                    let fields = &self.fields;
                    rec.exec(OpKind::Cas, async {
                        store.read(key, fields).await?;
                        store.update(key, &payload).await
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }
}
