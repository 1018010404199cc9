//! In-process entity store.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::StorageResult;
use crate::ports::EntityStore;
use crate::projection::{Entity, EntityWrite};

/// [`EntityStore`] backed by a map, with the same commit semantics as the
/// database adapter. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    rows: RwLock<BTreeMap<(String, String), Value>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<(String, String), Value>> {
        self.rows.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<(String, String), Value>> {
        self.rows.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a committed block's writes.
    pub fn apply(&self, writes: &[EntityWrite]) {
        let mut rows = self.write();
        for write in writes {
            match write {
                EntityWrite::Upsert { kind, id, data, .. } => {
                    rows.insert((kind.clone(), id.clone()), data.clone());
                }
                EntityWrite::Remove { kind, id } => {
                    rows.remove(&(kind.clone(), id.clone()));
                }
            }
        }
    }

    pub fn get_raw(&self, kind: &str, id: &str) -> Option<Value> {
        self.read().get(&(kind.to_string(), id.to_string())).cloned()
    }

    /// Typed lookup; rows that fail to decode read as absent.
    pub fn get<T: Entity>(&self, id: &str) -> Option<T> {
        self.get_raw(T::KIND, id)
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Every row of `T`, ordered by id.
    pub fn all<T: Entity>(&self) -> Vec<T> {
        self.read()
            .iter()
            .filter(|((kind, _), _)| kind == T::KIND)
            .filter_map(|(_, v)| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.read().keys().filter(|(k, _)| k == kind).count()
    }

    /// Whole content, for state comparisons.
    pub fn snapshot(&self) -> BTreeMap<(String, String), Value> {
        self.read().clone()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn get_entity(&self, kind: &str, id: &str) -> StorageResult<Option<Value>> {
        Ok(self.get_raw(kind, id))
    }

    async fn find_entities(
        &self,
        kind: &str,
        field: &str,
        value: &Value,
    ) -> StorageResult<Vec<(String, Value)>> {
        Ok(self
            .read()
            .iter()
            .filter(|((k, _), data)| k == kind && data.get(field) == Some(value))
            .map(|((_, id), data)| (id.clone(), data.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_apply_and_find() {
        let store = MemoryEntityStore::new();
        store.apply(&[
            EntityWrite::Upsert {
                kind: "Leg".into(),
                id: "1/0".into(),
                data: json!({"instructionId": "1"}),
                created_block: 1,
                updated_block: 1,
            },
            EntityWrite::Upsert {
                kind: "Leg".into(),
                id: "2/0".into(),
                data: json!({"instructionId": "2"}),
                created_block: 1,
                updated_block: 1,
            },
        ]);
        let found = store
            .find_entities("Leg", "instructionId", &json!("1"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "1/0");

        store.apply(&[EntityWrite::Remove { kind: "Leg".into(), id: "1/0".into() }]);
        assert_eq!(store.count("Leg"), 1);
        assert!(store.get_entity("Leg", "1/0").await.unwrap().is_none());
    }
}
