//! # In-Memory Backend
//!
//! Non-persistent adapter with the same ordering semantics as the SQLite
//! backend. Used in tests and when durability is not wanted.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use pulse_core::StorageSchema;
use serde_json::Value;
use tracing::debug;

use crate::adapter::{
    compare_json, value_at_path, Direction, QueryOptions, StorageAdapter, StorageUsage,
};
use crate::error::{StorageError, StorageResult};

type Collection = BTreeMap<String, Value>;

/// Adapter keeping every collection in a `BTreeMap` keyed by primary key.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    collections: RwLock<HashMap<String, Collection>>,
    /// Unique indexes per collection: (index name, key path).
    unique: RwLock<HashMap<String, Vec<(String, String)>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_collection<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&Collection) -> T,
    ) -> StorageResult<T> {
        let guard = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .get(collection)
            .map(f)
            .ok_or_else(|| StorageError::unknown_collection(collection))
    }

    fn with_collection_mut<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Collection) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut guard = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        guard
            .get_mut(collection)
            .ok_or_else(|| StorageError::unknown_collection(collection))
            .and_then(f)
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn open(&self, schema: &StorageSchema) -> StorageResult<()> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let mut unique = self.unique.write().unwrap_or_else(PoisonError::into_inner);

        for collection in &schema.collections {
            collections.entry(collection.name.clone()).or_default();
            unique.insert(
                collection.name.clone(),
                collection
                    .indexes
                    .iter()
                    .filter(|i| i.unique)
                    .map(|i| (i.name.clone(), i.key_path.clone()))
                    .collect(),
            );
        }

        debug!(collections = schema.collections.len(), "In-memory storage opened");
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Value>> {
        self.with_collection(collection, |records| records.get(key).cloned())
    }

    async fn put(&self, collection: &str, key: &str, value: &Value) -> StorageResult<()> {
        let unique = self
            .unique
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .cloned()
            .unwrap_or_default();

        self.with_collection_mut(collection, |records| {
            for (index, path) in &unique {
                let Some(new_value) = value_at_path(value, path) else {
                    continue;
                };
                let clash = records.iter().any(|(other_key, other)| {
                    other_key != key
                        && value_at_path(other, path)
                            .is_some_and(|v| compare_json(v, new_value).is_eq())
                });
                if clash {
                    return Err(StorageError::UniqueViolation {
                        collection: collection.to_string(),
                        reason: format!("index {} already contains {}", index, new_value),
                    });
                }
            }
            records.insert(key.to_string(), value.clone());
            Ok(())
        })
    }

    async fn delete(&self, collection: &str, key: &str) -> StorageResult<()> {
        self.with_collection_mut(collection, |records| {
            records.remove(key);
            Ok(())
        })
    }

    async fn query(
        &self,
        collection: &str,
        index_path: Option<&str>,
        options: &QueryOptions,
    ) -> StorageResult<Vec<Value>> {
        self.with_collection(collection, |records| {
            // (sort key, primary key, record)
            let mut rows: Vec<(Value, &String, &Value)> = records
                .iter()
                .filter_map(|(key, record)| {
                    let sort_key = match index_path {
                        // Records without the indexed field are not in the index
                        Some(path) => value_at_path(record, path)?.clone(),
                        None => Value::String(key.clone()),
                    };
                    Some((sort_key, key, record))
                })
                .filter(|(sort_key, _, _)| {
                    options.range.as_ref().map_or(true, |r| r.contains(sort_key))
                })
                .collect();

            rows.sort_by(|a, b| compare_json(&a.0, &b.0).then_with(|| a.1.cmp(b.1)));
            if options.direction == Direction::Descending {
                rows.reverse();
            }

            rows.into_iter()
                .take(options.limit.unwrap_or(usize::MAX))
                .map(|(_, _, record)| record.clone())
                .collect()
        })
    }

    async fn clear(&self, collection: &str) -> StorageResult<()> {
        self.with_collection_mut(collection, |records| {
            records.clear();
            Ok(())
        })
    }

    async fn count(&self, collection: &str) -> StorageResult<u64> {
        self.with_collection(collection, |records| records.len() as u64)
    }

    async fn usage(&self) -> StorageResult<StorageUsage> {
        let guard = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let used_bytes = guard
            .values()
            .flat_map(|records| records.iter())
            .map(|(key, value)| (key.len() + value.to_string().len()) as u64)
            .sum();
        Ok(StorageUsage {
            used_bytes,
            quota_bytes: None,
        })
    }

    async fn close(&self) {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::KeyRange;
    use pulse_core::{CollectionSchema, IndexSchema};
    use serde_json::json;

    fn schema() -> StorageSchema {
        StorageSchema {
            name: "test".into(),
            version: 1,
            collections: vec![CollectionSchema::new("items", "id")
                .index(IndexSchema::on("rank"))
                .index(IndexSchema::on("email").unique())],
        }
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let adapter = MemoryAdapter::new();
        adapter.open(&schema()).await.unwrap();
        assert!(matches!(
            adapter.get("nope", "x").await,
            Err(StorageError::UnknownCollection { .. })
        ));
    }

    #[tokio::test]
    async fn test_index_query_skips_records_without_field() {
        let adapter = MemoryAdapter::new();
        adapter.open(&schema()).await.unwrap();
        adapter.put("items", "a", &json!({"id": "a", "rank": 3})).await.unwrap();
        adapter.put("items", "b", &json!({"id": "b", "rank": 1})).await.unwrap();
        adapter.put("items", "c", &json!({"id": "c"})).await.unwrap();

        let rows = adapter
            .query("items", Some("rank"), &QueryOptions::by_index("rank"))
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let rows = adapter
            .query(
                "items",
                Some("rank"),
                &QueryOptions::by_index("rank").range(KeyRange::lower_bound(2, false)),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_unique_index_enforced() {
        let adapter = MemoryAdapter::new();
        adapter.open(&schema()).await.unwrap();
        adapter
            .put("items", "a", &json!({"id": "a", "email": "x@y"}))
            .await
            .unwrap();
        // Same key may be rewritten
        adapter
            .put("items", "a", &json!({"id": "a", "email": "x@y"}))
            .await
            .unwrap();
        let err = adapter
            .put("items", "b", &json!({"id": "b", "email": "x@y"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation { .. }));
    }
}
