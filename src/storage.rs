//! Store capability consumed by the coordinator.
//!
//! A [`Datastore`] runs conjunctive queries against a named collection,
//! saves and deletes whole entities, and opens [`Transaction`]s for
//! read-modify-write updates. Saves overwrite the full record, so partial
//! updates must read the current record inside a transaction first.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::entity::{Entity, EntityKey, Record};
use crate::error::Result;
use crate::filter::Query;

pub use memory::{MemoryStore, StoreStats};

/// Number of entities a save or delete affected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResult {
    pub count: usize,
}

impl MutationResult {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl std::ops::Add for MutationResult {
    type Output = MutationResult;

    fn add(self, rhs: MutationResult) -> MutationResult {
        MutationResult::new(self.count + rhs.count)
    }
}

impl std::ops::AddAssign for MutationResult {
    fn add_assign(&mut self, rhs: MutationResult) {
        self.count += rhs.count;
    }
}

/// A record read back from the store with its key.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub key: EntityKey,
    pub record: Record,
}

/// The backing key-value store.
///
/// Query semantics shared by every implementation:
/// - only entities of the query's namespace and kind are considered;
/// - each predicate must hold on an indexed field (missing or unindexed
///   fields never match), comparing like-typed values only;
/// - `order` sorts ascending and drops entities lacking the field;
/// - otherwise results come back in insertion order;
/// - `limit` truncates.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Allocate a key for a new entity in `kind`.
    fn new_key(&self, namespace: &str, kind: &str) -> EntityKey {
        EntityKey::new(namespace, kind, Uuid::new_v4())
    }

    async fn get(&self, key: &EntityKey) -> Result<Option<Record>>;

    async fn run_query(&self, query: &Query) -> Result<Vec<StoredEntity>>;

    /// Insert or overwrite entities. Count is the number of entities written.
    async fn save(&self, entities: Vec<Entity>) -> Result<MutationResult>;

    /// Delete by key. Count is the number of keys in the batch.
    async fn delete(&self, keys: Vec<EntityKey>) -> Result<MutationResult>;

    /// Begin a transaction.
    async fn transaction(&self) -> Result<Box<dyn Transaction>>;
}

/// A store transaction. Commits atomically or not at all.
///
/// A concurrent writer of an entity this transaction has read is never
/// silently overwritten. Of two overlapping transactions on one entity at
/// most one commits; the other fails with `Error::Conflict`.
#[async_trait]
pub trait Transaction: Send {
    async fn get(&mut self, key: &EntityKey) -> Result<Option<Record>>;

    async fn save(&mut self, entity: Entity) -> Result<()>;

    async fn commit(&mut self) -> Result<MutationResult>;

    async fn rollback(&mut self) -> Result<()>;
}
