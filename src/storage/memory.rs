//! In-process [`Datastore`] with optimistic transactions.
//!
//! Every entity carries a version. A transaction remembers the version of
//! each key it read and its commit fails with [`Error::Conflict`] if any of
//! them moved. Operation counts are kept in [`StoreStats`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{Datastore, Entity, EntityKey, MutationResult, Record, StoredEntity, Transaction};
use crate::entity::{Field, decode, indexed_value};
use crate::error::{Error, Result};
use crate::filter::{Query, compare_values};

/// Operation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Direct and transactional key lookups.
    pub gets: usize,
    pub queries: usize,
    /// Non-transactional save calls.
    pub saves: usize,
    /// Size of each delete call, in call order.
    pub delete_batches: Vec<usize>,
    pub transactions: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub conflicts: usize,
}

impl StoreStats {
    /// Store calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.gets + self.queries + self.saves + self.delete_batches.len() + self.transactions
    }
}

#[derive(Debug)]
struct Row {
    fields: Vec<Field>,
    version: u64,
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    rows: BTreeMap<EntityKey, Row>,
    clock: u64,
    stats: StoreStats,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn version_of(&self, key: &EntityKey) -> u64 {
        self.rows.get(key).map_or(0, |row| row.version)
    }

    fn put(&mut self, entity: Entity) {
        let version = self.tick();
        let seq = match self.rows.get(&entity.key) {
            Some(row) => row.seq,
            None => version,
        };
        self.rows.insert(
            entity.key,
            Row {
                fields: entity.fields,
                version,
                seq,
            },
        );
    }
}

/// Shared in-memory store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StoreStats {
        self.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.lock().stats = StoreStats::default();
    }

    /// Number of stored entities across all collections.
    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn get(&self, key: &EntityKey) -> Result<Option<Record>> {
        let mut inner = self.lock();
        inner.stats.gets += 1;
        Ok(inner.rows.get(key).map(|row| decode(&row.fields)))
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<StoredEntity>> {
        let mut inner = self.lock();
        inner.stats.queries += 1;

        let mut hits: Vec<(&EntityKey, &Row)> = inner
            .rows
            .iter()
            .filter(|(key, _)| key.namespace == query.namespace && key.kind == query.kind)
            .filter(|(_, row)| {
                query.predicates.iter().all(|p| {
                    indexed_value(&row.fields, &p.field).is_some_and(|v| p.op.holds(v, &p.value))
                })
            })
            .collect();
        hits.sort_by_key(|(_, row)| row.seq);

        if let Some(order) = &query.order {
            hits.retain(|(_, row)| indexed_value(&row.fields, order).is_some());
            hits.sort_by(|(_, a), (_, b)| {
                let (a, b) = (indexed_value(&a.fields, order), indexed_value(&b.fields, order));
                a.zip(b)
                    .and_then(|(a, b)| compare_values(a, b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }

        Ok(hits
            .into_iter()
            .map(|(key, row)| StoredEntity {
                key: key.clone(),
                record: decode(&row.fields),
            })
            .collect())
    }

    async fn save(&self, entities: Vec<Entity>) -> Result<MutationResult> {
        let mut inner = self.lock();
        inner.stats.saves += 1;
        let count = entities.len();
        for entity in entities {
            inner.put(entity);
        }
        Ok(MutationResult::new(count))
    }

    async fn delete(&self, keys: Vec<EntityKey>) -> Result<MutationResult> {
        let mut inner = self.lock();
        inner.stats.delete_batches.push(keys.len());
        for key in &keys {
            inner.rows.remove(key);
        }
        Ok(MutationResult::new(keys.len()))
    }

    async fn transaction(&self) -> Result<Box<dyn Transaction>> {
        self.lock().stats.transactions += 1;
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            reads: HashMap::new(),
            writes: Vec::new(),
            finished: false,
        }))
    }
}

/// Transaction over a [`MemoryStore`]. Writes are buffered until commit.
pub struct MemoryTransaction {
    store: MemoryStore,
    reads: HashMap<EntityKey, u64>,
    writes: Vec<Entity>,
    finished: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(Error::Other("transaction already finished".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, key: &EntityKey) -> Result<Option<Record>> {
        self.ensure_open()?;
        let mut inner = self.store.lock();
        inner.stats.gets += 1;
        let version = inner.version_of(key);
        self.reads.entry(key.clone()).or_insert(version);
        Ok(inner.rows.get(key).map(|row| decode(&row.fields)))
    }

    async fn save(&mut self, entity: Entity) -> Result<()> {
        self.ensure_open()?;
        self.writes.push(entity);
        Ok(())
    }

    async fn commit(&mut self) -> Result<MutationResult> {
        self.ensure_open()?;
        self.finished = true;

        let mut inner = self.store.lock();
        if let Some((key, _)) = self
            .reads
            .iter()
            .find(|(key, seen)| inner.version_of(key) != **seen)
        {
            let key = key.clone();
            inner.stats.conflicts += 1;
            debug!(%key, "commit rejected, entity changed since read");
            return Err(Error::Conflict(format!("{key} was modified concurrently")));
        }

        let count = self.writes.len();
        for entity in self.writes.drain(..) {
            inner.put(entity);
        }
        inner.stats.commits += 1;
        Ok(MutationResult::new(count))
    }

    async fn rollback(&mut self) -> Result<()> {
        self.finished = true;
        self.writes.clear();
        self.store.lock().stats.rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::encode;
    use crate::filter::{Clause, Filter};
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn entity(store: &MemoryStore, value: serde_json::Value) -> Entity {
        Entity {
            key: store.new_key("ns", "Job"),
            fields: encode(&record(value), 1500),
        }
    }

    #[tokio::test]
    async fn racing_transactions_one_commit_wins() {
        let store = MemoryStore::new();
        let e = entity(&store, json!({"status": "open"}));
        let key = e.key.clone();
        store.save(vec![e]).await.unwrap();

        let mut a = store.transaction().await.unwrap();
        let mut b = store.transaction().await.unwrap();
        a.get(&key).await.unwrap();
        b.get(&key).await.unwrap();

        let active = Entity {
            key: key.clone(),
            fields: encode(&record(json!({"status": "active"})), 1500),
        };
        let reserved = Entity {
            key: key.clone(),
            fields: encode(&record(json!({"status": "reserved"})), 1500),
        };
        a.save(active).await.unwrap();
        b.save(reserved).await.unwrap();

        assert_eq!(a.commit().await.unwrap().count, 1);
        assert!(matches!(b.commit().await, Err(Error::Conflict(_))));

        let current = store.get(&key).await.unwrap().unwrap();
        assert_eq!(current["status"], "active");
        assert_eq!(store.stats().conflicts, 1);
    }

    #[tokio::test]
    async fn query_honors_order_limit_and_insertion_order() {
        let store = MemoryStore::new();
        for (name, created) in [("c", 3), ("a", 1), ("b", 2)] {
            let e = entity(&store, json!({"name": name, "created": created, "status": "open"}));
            store.save(vec![e]).await.unwrap();
        }

        let unordered = Filter::matching(Clause::new().eq("status", "open"));
        let hits = store
            .run_query(&unordered.queries("ns", "Job")[0])
            .await
            .unwrap();
        let names: Vec<_> = hits.iter().map(|h| h.record["name"].clone()).collect();
        assert_eq!(names, [json!("c"), json!("a"), json!("b")]);

        let ordered = unordered.order("created").limit(2);
        let hits = store.run_query(&ordered.queries("ns", "Job")[0]).await.unwrap();
        let names: Vec<_> = hits.iter().map(|h| h.record["name"].clone()).collect();
        assert_eq!(names, [json!("a"), json!("b")]);
    }

    #[tokio::test]
    async fn other_collections_are_not_matched() {
        let store = MemoryStore::new();
        let mut e = entity(&store, json!({"status": "open"}));
        e.key.kind = "Audit".into();
        store.save(vec![e]).await.unwrap();

        let q = Filter::default().queries("ns", "Job").remove(0);
        assert!(store.run_query(&q).await.unwrap().is_empty());
    }
}
