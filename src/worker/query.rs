//! Secondary-index (view) query worker
//!
//! Picks an existing key, looks up the value of the view's field in that
//! key's document and queries the view for it. Views are cycled round-robin.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;

use super::{Recorder, WorkerContext};
use crate::config::{ViewSpec, WorkloadClass};
use crate::docs::DocGenerator;
use crate::error::WorkerError;
use crate::keys::{ExistingKey, KeyFormatter};
use crate::reservoir::OpKind;
use crate::store::{KvStore, QueryRequest};

pub struct QueryWorker {
    rng: StdRng,
    existing: ExistingKey,
    docs: DocGenerator,
    views: Vec<ViewSpec>,
    next_view: usize,
    /// KV mix of the run: the safe window is computed against KV writers
    kv_creates: u64,
    kv_deletes: u64,
    kv_workers: u64,
}

impl QueryWorker {
    pub fn new(ctx: &WorkerContext) -> Self {
        let ws = &ctx.settings;
        let fmt = KeyFormatter::new(ctx.target.prefix.clone());
        Self {
            rng: StdRng::seed_from_u64(ctx.seed()),
            existing: ExistingKey::new(ws.working_set, ws.working_set_access, fmt),
            docs: DocGenerator::new(ws.size),
            views: ws.views.clone(),
            // Spread shards over the view list
            next_view: ctx.sid,
            kv_creates: ws.creates,
            kv_deletes: ws.deletes,
            kv_workers: ws.workers_for(WorkloadClass::Kv) as u64,
        }
    }

    /// Build the next view request
    pub fn next_request(&mut self, current: u64, deleted: u64) -> Option<QueryRequest> {
        if self.views.is_empty() {
            return None;
        }
        let current_spot = current.saturating_sub(self.kv_creates * self.kv_workers);
        let deleted_spot = deleted + self.kv_deletes * self.kv_workers;
        let key = self.existing.next(&mut self.rng, current_spot, deleted_spot);

        let view = &self.views[self.next_view % self.views.len()];
        self.next_view = self.next_view.wrapping_add(1);

        let mut params = view.params.clone();
        params.insert("field".to_string(), Value::String(view.field.clone()));
        params.insert("key".to_string(), self.docs.field(&key, &view.field));
        Some(QueryRequest::View {
            design_doc: view.design_doc.clone(),
            view: view.view.clone(),
            params,
        })
    }

    pub async fn run_batch(
        &mut self,
        ctx: &WorkerContext,
        store: &dyn KvStore,
        rec: &mut Recorder,
    ) -> Result<(), WorkerError> {
        for _ in 0..ctx.batch_size() {
            let current = ctx.counters.current_items();
            let deleted = ctx.counters.deleted_items();
            let Some(request) = self.next_request(current, deleted) else {
                break;
            };
            rec.exec(OpKind::Query, store.query(&request)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkloadSettings;
    use crate::store::{MemoryOptions, MemoryStore};
    use crate::worker::tests::context;
    use std::collections::BTreeMap;

    fn settings() -> WorkloadSettings {
        let view = |name: &str, field: &str| ViewSpec {
            design_doc: "ddoc".into(),
            view: name.into(),
            field: field.into(),
            params: BTreeMap::new(),
        };
        WorkloadSettings {
            items: 50,
            size: 256,
            query_workers: 2,
            query_batch_size: 10,
            views: vec![view("by_city", "city"), view("by_name", "name")],
            ..Default::default()
        }
    }

    #[test]
    fn test_views_cycle_and_bind_field_value() {
        let ctx = context(WorkloadClass::SecondaryIndexQuery, settings(), 0);
        let mut worker = QueryWorker::new(&ctx);
        let names: Vec<String> = (0..4)
            .map(|_| match worker.next_request(50, 0).unwrap() {
                QueryRequest::View { view, params, .. } => {
                    assert!(params["key"].is_string());
                    view
                }
                other => panic!("unexpected request {:?}", other),
            })
            .collect();
        assert_eq!(names, vec!["by_city", "by_name", "by_city", "by_name"]);
    }

    #[tokio::test]
    async fn test_view_queries_hit_matching_documents() {
        let ctx = context(WorkloadClass::SecondaryIndexQuery, settings(), 1);
        let store = MemoryStore::new(MemoryOptions::default());
        let docs = DocGenerator::new(256);
        let fmt = KeyFormatter::new("");
        store.load((0..50).map(|i| {
            let key = fmt.key(i);
            let doc = docs.next(&key);
            (key, doc)
        }));

        let mut worker = QueryWorker::new(&ctx);
        let mut rec = Recorder::new(ctx.name(), crate::reservoir::Reservoir::with_capacity(16, 0));
        worker.run_batch(&ctx, &store, &mut rec).await.unwrap();
        assert_eq!(rec.completed(), 10);

        let request = worker.next_request(50, 0).unwrap();
        assert!(store.query(&request).await.unwrap().rows >= 1);
    }
}
