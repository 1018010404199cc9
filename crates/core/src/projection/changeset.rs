//! Per-block write overlay over the committed entity store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{DomainError, DomainResult, StorageError};
use crate::ports::EntityStore;
use crate::projection::Entity;

/// Default maximum number of distinct entities touched by one block.
pub const DEFAULT_MAX_CHANGES: usize = 200_000;

type EntityKey = (String, String);

#[derive(Debug, Clone)]
enum PendingChange {
    Upsert(Value),
    Remove,
}

/// A write produced by a block, ready for the atomic commit.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityWrite {
    Upsert {
        kind: String,
        id: String,
        data: Value,
        created_block: u64,
        updated_block: u64,
    },
    Remove {
        kind: String,
        id: String,
    },
}

impl EntityWrite {
    pub fn kind(&self) -> &str {
        match self {
            Self::Upsert { kind, .. } | Self::Remove { kind, .. } => kind,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Upsert { id, .. } | Self::Remove { id, .. } => id,
        }
    }
}

/// Pending projection writes of one block.
///
/// Reads see the block's own writes first, then the committed store.
/// Nothing reaches storage until [`BlockChangeSet::into_writes`] is
/// committed together with the block; dropping the change set discards
/// the block's projection.
pub struct BlockChangeSet {
    block_number: u64,
    store: Arc<dyn EntityStore>,
    pending: Mutex<BTreeMap<EntityKey, PendingChange>>,
    locks: Mutex<HashMap<EntityKey, Arc<AsyncMutex<()>>>>,
    max_changes: usize,
}

impl BlockChangeSet {
    pub fn new(block_number: u64, store: Arc<dyn EntityStore>) -> Self {
        Self::with_max_changes(block_number, store, DEFAULT_MAX_CHANGES)
    }

    /// Create with a custom limit on distinct touched entities.
    pub fn with_max_changes(
        block_number: u64,
        store: Arc<dyn EntityStore>,
        max_changes: usize,
    ) -> Self {
        Self {
            block_number,
            store,
            pending: Mutex::new(BTreeMap::new()),
            locks: Mutex::new(HashMap::new()),
            max_changes,
        }
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    /// Number of distinct entities written or removed so far.
    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pending(&self) -> MutexGuard<'_, BTreeMap<EntityKey, PendingChange>> {
        // Guards are never held across a panic point that leaves the map
        // half-updated, so a poisoned lock still holds consistent data.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending_change(&self, kind: &str, id: &str) -> Option<PendingChange> {
        self.pending()
            .get(&(kind.to_string(), id.to_string()))
            .cloned()
    }

    fn put(&self, kind: &str, id: &str, change: PendingChange) -> DomainResult<()> {
        let mut pending = self.pending();
        let key = (kind.to_string(), id.to_string());
        if !pending.contains_key(&key) && pending.len() >= self.max_changes {
            return Err(StorageError::ChangeSetLimit(format!(
                "block {} touches more than {} entities",
                self.block_number, self.max_changes
            ))
            .into());
        }
        pending.insert(key, change);
        Ok(())
    }

    /// Current state of an entity, `None` if absent or removed in this block.
    pub async fn get<T: Entity>(&self, id: &str) -> DomainResult<Option<T>> {
        let data = match self.pending_change(T::KIND, id) {
            Some(PendingChange::Upsert(data)) => Some(data),
            Some(PendingChange::Remove) => None,
            None => self.store.get_entity(T::KIND, id).await?,
        };
        data.map(|d| decode::<T>(id, d)).transpose()
    }

    /// Like [`get`](Self::get), failing with `MissingEntity` when absent.
    pub async fn require<T: Entity>(&self, id: &str) -> DomainResult<T> {
        self.get(id)
            .await?
            .ok_or_else(|| DomainError::missing(T::KIND, id))
    }

    /// Existing entity or a fresh one from `init`. Nothing is written.
    pub async fn get_or_create<T: Entity>(
        &self,
        id: &str,
        init: impl FnOnce() -> T,
    ) -> DomainResult<T> {
        Ok(self.get(id).await?.unwrap_or_else(init))
    }

    pub async fn exists<T: Entity>(&self, id: &str) -> DomainResult<bool> {
        Ok(self.get::<T>(id).await?.is_some())
    }

    /// Buffer an upsert, stamping the entity with the current block.
    pub fn save<T: Entity>(&self, entity: &mut T) -> DomainResult<()> {
        entity.provenance_mut().touch(self.block_number);
        if entity.provenance().created_block_id == 0 {
            entity.provenance_mut().created_block_id = self.block_number;
        }
        let data = serde_json::to_value(&*entity).map_err(|e| {
            StorageError::SerializationError(format!("{} '{}': {}", T::KIND, entity.id(), e))
        })?;
        self.put(T::KIND, entity.id(), PendingChange::Upsert(data))
    }

    /// Bulk [`save`](Self::save).
    pub fn save_all<T: Entity>(&self, entities: &mut [T]) -> DomainResult<()> {
        entities.iter_mut().try_for_each(|e| self.save(e))
    }

    /// Buffer a removal. Removing an absent entity is a no-op at commit.
    pub fn remove<T: Entity>(&self, id: &str) -> DomainResult<()> {
        self.put(T::KIND, id, PendingChange::Remove)
    }

    /// All entities of `T` whose top-level `field` equals `value`,
    /// committed rows merged with this block's pending writes, ordered by id.
    pub async fn find_by<T: Entity>(&self, field: &str, value: &Value) -> DomainResult<Vec<T>> {
        let mut rows: BTreeMap<String, Value> = self
            .store
            .find_entities(T::KIND, field, value)
            .await?
            .into_iter()
            .collect();

        {
            let pending = self.pending();
            for ((kind, id), change) in pending.iter() {
                if kind != T::KIND {
                    continue;
                }
                match change {
                    PendingChange::Upsert(data) if data.get(field) == Some(value) => {
                        rows.insert(id.clone(), data.clone());
                    }
                    PendingChange::Upsert(_) | PendingChange::Remove => {
                        rows.remove(id);
                    }
                }
            }
        }

        rows.into_iter().map(|(id, d)| decode::<T>(&id, d)).collect()
    }

    /// Serialize read-modify-write sequences on one entity.
    ///
    /// Handlers of the same event run concurrently; any sequence that reads
    /// an entity, changes it and saves it back must hold this guard.
    pub async fn lock(&self, kind: &str, id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry((kind.to_string(), id.to_string()))
                .or_default()
                .clone()
        };
        mutex.lock_owned().await
    }

    /// Typed shorthand for [`lock`](Self::lock).
    pub async fn lock_entity<T: Entity>(&self, id: &str) -> OwnedMutexGuard<()> {
        self.lock(T::KIND, id).await
    }

    /// Drain the change set into commit-ready writes, ordered by `(kind, id)`.
    pub fn into_writes(self) -> Vec<EntityWrite> {
        let pending = self.pending.into_inner().unwrap_or_else(|e| e.into_inner());
        pending
            .into_iter()
            .map(|((kind, id), change)| match change {
                PendingChange::Upsert(data) => {
                    let stamp = |field: &str| data.get(field).and_then(Value::as_u64).unwrap_or(0);
                    let created_block = stamp("createdBlockId");
                    let updated_block = stamp("updatedBlockId");
                    EntityWrite::Upsert {
                        kind,
                        id,
                        data,
                        created_block,
                        updated_block,
                    }
                }
                PendingChange::Remove => EntityWrite::Remove { kind, id },
            })
            .collect()
    }
}

fn decode<T: Entity>(id: &str, data: Value) -> DomainResult<T> {
    serde_json::from_value(data).map_err(|e| {
        StorageError::SerializationError(format!("{} '{}': {}", T::KIND, id, e)).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_entity;
    use crate::projection::{MemoryEntityStore, Provenance};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Vote {
        id: String,
        proposal_id: String,
        action: String,
        #[serde(flatten)]
        provenance: Provenance,
    }

    impl_entity!(Vote, "Vote");

    fn vote(id: &str, proposal: &str, action: &str, block: u64) -> Vote {
        Vote {
            id: id.into(),
            proposal_id: proposal.into(),
            action: action.into(),
            provenance: Provenance::at(block),
        }
    }

    async fn committed(votes: Vec<Vote>) -> Arc<MemoryEntityStore> {
        let store = Arc::new(MemoryEntityStore::new());
        let changes = BlockChangeSet::new(1, store.clone());
        for mut v in votes {
            changes.save(&mut v).unwrap();
        }
        store.apply(&changes.into_writes());
        store
    }

    // Test critique: les lectures voient d'abord les écritures du bloc
    #[tokio::test]
    async fn test_reads_see_pending_writes() {
        let store = committed(vec![vote("p/a", "p", "Approved", 1)]).await;
        let changes = BlockChangeSet::new(5, store.clone());

        let mut v: Vote = changes.require("p/a").await.unwrap();
        v.action = "Rejected".into();
        changes.save(&mut v).unwrap();

        let seen: Vote = changes.require("p/a").await.unwrap();
        assert_eq!(seen.action, "Rejected");
        assert_eq!(seen.provenance, Provenance { created_block_id: 1, updated_block_id: 5 });

        // Le store n'est pas touché avant le commit
        let still: Vote = serde_json::from_value(store.get_raw("Vote", "p/a").unwrap()).unwrap();
        assert_eq!(still.action, "Approved");
    }

    #[tokio::test]
    async fn test_remove_hides_committed_row() {
        let store = committed(vec![vote("p/a", "p", "Approved", 1)]).await;
        let changes = BlockChangeSet::new(2, store);
        changes.remove::<Vote>("p/a").unwrap();
        assert!(changes.get::<Vote>("p/a").await.unwrap().is_none());
        assert!(matches!(
            changes.require::<Vote>("p/a").await.unwrap_err(),
            DomainError::MissingEntity { kind: "Vote", .. }
        ));
        assert_eq!(
            changes.into_writes(),
            vec![EntityWrite::Remove { kind: "Vote".into(), id: "p/a".into() }]
        );
    }

    // Test critique: find_by fusionne store et écritures en attente
    #[tokio::test]
    async fn test_find_by_merges_pending_changes() {
        let store = committed(vec![
            vote("p/a", "p", "Approved", 1),
            vote("p/b", "p", "Approved", 1),
            vote("q/a", "q", "Approved", 1),
        ])
        .await;
        let changes = BlockChangeSet::new(3, store);

        changes.remove::<Vote>("p/a").unwrap();
        changes.save(&mut vote("p/c", "p", "Rejected", 3)).unwrap();
        // Déplacé vers une autre proposition: ne correspond plus
        changes.save(&mut vote("p/b", "q", "Approved", 1)).unwrap();

        let rows: Vec<Vote> = changes.find_by("proposalId", &json!("p")).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["p/c"]);

        let rows: Vec<Vote> = changes.find_by("proposalId", &json!("q")).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["p/b", "q/a"]);
    }

    #[tokio::test]
    async fn test_get_or_create_does_not_write() {
        let changes = BlockChangeSet::new(9, Arc::new(MemoryEntityStore::new()));
        let v: Vote = changes
            .get_or_create("p/z", || vote("p/z", "p", "Approved", 9))
            .await
            .unwrap();
        assert_eq!(v.provenance.created_block_id, 9);
        assert!(changes.is_empty());
    }

    // Test critique: protection contre un change set démesuré
    #[test]
    fn test_change_limit_enforced() {
        let changes = BlockChangeSet::with_max_changes(1, Arc::new(MemoryEntityStore::new()), 2);
        changes.save(&mut vote("a", "p", "Approved", 1)).unwrap();
        changes.save(&mut vote("b", "p", "Approved", 1)).unwrap();
        // Réécrire une entité déjà présente reste permis
        changes.save(&mut vote("a", "p", "Rejected", 1)).unwrap();
        let err = changes.save(&mut vote("c", "p", "Approved", 1)).unwrap_err();
        assert!(err.to_string().contains("Change set limit"));
    }

    #[test]
    fn test_into_writes_carries_provenance() {
        let changes = BlockChangeSet::new(7, Arc::new(MemoryEntityStore::new()));
        changes.save(&mut vote("a", "p", "Approved", 3)).unwrap();
        match &changes.into_writes()[0] {
            EntityWrite::Upsert { created_block, updated_block, .. } => {
                assert_eq!((*created_block, *updated_block), (3, 7));
            }
            other => panic!("unexpected write {other:?}"),
        }
    }

    // Test critique: le verrou par entité sérialise les lecture-modification-écriture
    #[tokio::test]
    async fn test_entity_lock_serializes_updates() {
        #[derive(Debug, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Counter {
            id: String,
            count: u32,
            #[serde(flatten)]
            provenance: Provenance,
        }
        impl_entity!(Counter, "Counter");

        let changes = Arc::new(BlockChangeSet::new(1, Arc::new(MemoryEntityStore::new())));
        let tasks = (0..16).map(|_| {
            let changes = changes.clone();
            tokio::spawn(async move {
                let _guard = changes.lock_entity::<Counter>("c").await;
                let mut c: Counter = changes
                    .get_or_create("c", || Counter { id: "c".into(), count: 0, provenance: Provenance::at(1) })
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
                c.count += 1;
                changes.save(&mut c).unwrap();
            })
        });
        futures::future::join_all(tasks).await;

        let c: Counter = changes.require("c").await.unwrap();
        assert_eq!(c.count, 16);
    }
}
