//! # Storage Manager
//!
//! Public entry point for persistence: typed records over a pluggable
//! [`StorageAdapter`].
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      StorageManager Lifecycle                           │
//! │                                                                         │
//! │  StorageManager::sqlite(config, schema)   (nothing opened yet)         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  initialize() ──┬── caller A ──┐                                        │
//! │                 ├── caller B ──┼──► one in-flight open + provision      │
//! │                 └── caller C ──┘    (tokio OnceCell, all await it)      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  get / set / delete / get_many / clear / count / storage_info          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  close()  ──► every later call returns StorageError::Closed            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed initialization leaves the cell empty, so the next call retries.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pulse_core::{CollectionSchema, StorageSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Connection;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::adapter::{key_to_string, value_at_path, QueryOptions, StorageAdapter};
use crate::error::{StorageError, StorageResult};
use crate::memory::MemoryAdapter;
use crate::sqlite::{SqliteAdapter, SqliteConfig, IN_MEMORY_PATH};

// =============================================================================
// Storage Info
// =============================================================================

/// Usage snapshot returned by [`StorageManager::storage_info`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub backend: String,
    pub initialized: bool,
    /// Record count per collection.
    pub collections: BTreeMap<String, u64>,
    pub total_records: u64,
    pub used_bytes: u64,
    pub quota_bytes: Option<u64>,
}

// =============================================================================
// Storage Manager
// =============================================================================

pub struct StorageManager {
    adapter: Arc<dyn StorageAdapter>,
    schema: StorageSchema,
    init: OnceCell<()>,
    closed: AtomicBool,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("backend", &self.adapter.backend())
            .field("schema", &self.schema.name)
            .field("version", &self.schema.version)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl StorageManager {
    /// Creates a manager over any adapter. Nothing is opened until
    /// [`initialize`](Self::initialize).
    pub fn new(adapter: Arc<dyn StorageAdapter>, schema: StorageSchema) -> Self {
        StorageManager {
            adapter,
            schema,
            init: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// SQLite-backed manager.
    pub fn sqlite(config: SqliteConfig, schema: StorageSchema) -> Self {
        Self::new(Arc::new(SqliteAdapter::new(config)), schema)
    }

    /// Non-persistent manager.
    pub fn in_memory(schema: StorageSchema) -> Self {
        Self::new(Arc::new(MemoryAdapter::new()), schema)
    }

    pub fn schema(&self) -> &StorageSchema {
        &self.schema
    }

    pub fn backend(&self) -> &'static str {
        self.adapter.backend()
    }

    pub fn is_initialized(&self) -> bool {
        self.init.initialized() && !self.closed.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Opens the store and provisions collections.
    ///
    /// Idempotent. Concurrent callers await the same in-flight attempt.
    pub async fn initialize(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }

        self.init
            .get_or_try_init(|| async {
                self.schema.validate()?;
                self.adapter.open(&self.schema).await?;
                info!(
                    backend = self.adapter.backend(),
                    database = %self.schema.name,
                    version = self.schema.version,
                    collections = self.schema.collections.len(),
                    "Storage initialized"
                );
                Ok::<(), StorageError>(())
            })
            .await?;

        Ok(())
    }

    fn ready(&self, collection: &str) -> StorageResult<&CollectionSchema> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        if !self.init.initialized() {
            return Err(StorageError::NotInitialized);
        }
        self.schema
            .collection(collection)
            .ok_or_else(|| StorageError::unknown_collection(collection))
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Fetches one record by primary key.
    pub async fn get<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> StorageResult<Option<T>> {
        self.ready(collection)?;
        match self.adapter.get(collection, key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StorageError::serialization(collection, e)),
            None => Ok(None),
        }
    }

    /// Inserts or replaces a record. The key is read from the collection's
    /// key path. Returns the key.
    pub async fn set<T: Serialize>(&self, collection: &str, record: &T) -> StorageResult<String> {
        let schema = self.ready(collection)?;
        let value =
            serde_json::to_value(record).map_err(|e| StorageError::serialization(collection, e))?;

        let key = value_at_path(&value, &schema.key_path)
            .and_then(key_to_string)
            .ok_or_else(|| StorageError::MissingKey {
                collection: collection.to_string(),
                key_path: schema.key_path.clone(),
            })?;

        self.adapter.put(collection, &key, &value).await?;
        debug!(collection, key = %key, "Record stored");
        Ok(key)
    }

    /// Removes a record. Missing keys are ignored.
    pub async fn delete(&self, collection: &str, key: &str) -> StorageResult<()> {
        self.ready(collection)?;
        self.adapter.delete(collection, key).await
    }

    /// Range query in primary key or index order.
    pub async fn get_many<T: DeserializeOwned>(
        &self,
        collection: &str,
        options: QueryOptions,
    ) -> StorageResult<Vec<T>> {
        let schema = self.ready(collection)?;

        let index_path = match options.index.as_deref() {
            Some(name) => Some(
                schema
                    .find_index(name)
                    .map(|i| i.key_path.as_str())
                    .ok_or_else(|| StorageError::UnknownIndex {
                        collection: collection.to_string(),
                        index: name.to_string(),
                    })?,
            ),
            None => None,
        };

        self.adapter
            .query(collection, index_path, &options)
            .await?
            .into_iter()
            .map(|value: Value| {
                serde_json::from_value(value).map_err(|e| StorageError::serialization(collection, e))
            })
            .collect()
    }

    /// Removes every record in a collection.
    pub async fn clear(&self, collection: &str) -> StorageResult<()> {
        self.ready(collection)?;
        self.adapter.clear(collection).await?;
        info!(collection, "Collection cleared");
        Ok(())
    }

    pub async fn count(&self, collection: &str) -> StorageResult<u64> {
        self.ready(collection)?;
        self.adapter.count(collection).await
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Record counts and usage. Never fails: anything that can't be read is
    /// reported as zero.
    pub async fn storage_info(&self) -> StorageInfo {
        let mut info = StorageInfo {
            backend: self.adapter.backend().to_string(),
            initialized: self.is_initialized(),
            ..Default::default()
        };
        if !info.initialized {
            return info;
        }

        for collection in &self.schema.collections {
            let count = match self.adapter.count(&collection.name).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(collection = %collection.name, error = %e, "Failed to count collection");
                    0
                }
            };
            info.total_records += count;
            info.collections.insert(collection.name.clone(), count);
        }

        match self.adapter.usage().await {
            Ok(usage) => {
                info.used_bytes = usage.used_bytes;
                info.quota_bytes = usage.quota_bytes;
            }
            Err(e) => warn!(error = %e, "Failed to read storage usage"),
        }

        info
    }

    /// Checks that the store answers a trivial query.
    pub async fn health_check(&self) -> bool {
        match self.schema.collections.first() {
            Some(collection) => self.count(&collection.name).await.is_ok(),
            None => self.is_initialized(),
        }
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Closes the backend. Idempotent; every later call fails with
    /// [`StorageError::Closed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.init.initialized() {
            self.adapter.close().await;
        }
        info!(database = %self.schema.name, "Storage closed");
    }

    // =========================================================================
    // Environment
    // =========================================================================

    /// Returns true if the SQLite engine can be opened in this environment.
    pub async fn is_available() -> bool {
        match sqlx::SqliteConnection::connect("sqlite::memory:").await {
            Ok(conn) => {
                let _ = conn.close().await;
                true
            }
            Err(e) => {
                warn!(error = %e, "SQLite storage unavailable");
                false
            }
        }
    }

    /// Deletes a database file together with its WAL and shared-memory
    /// side files. Missing files are ignored.
    pub async fn delete_database(path: impl AsRef<Path>) -> StorageResult<()> {
        let path = path.as_ref();
        if path.as_os_str() == IN_MEMORY_PATH {
            return Ok(());
        }

        let base = path.as_os_str().to_owned();
        for suffix in ["", "-wal", "-shm"] {
            let mut candidate = base.clone();
            candidate.push(suffix);
            match tokio::fs::remove_file(&candidate).await {
                Ok(()) => debug!(path = ?candidate, "Removed database file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StorageError::Io {
                        path: Path::new(&candidate).display().to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        info!(path = %path.display(), "Database deleted");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Direction, KeyRange};
    use chrono::{Duration as ChronoDuration, Utc};
    use pulse_core::schema::OPERATIONS_COLLECTION;
    use pulse_core::QueuedOperation;
    use serde_json::json;

    fn ops_at(offsets_ms: &[i64]) -> Vec<QueuedOperation> {
        let start = Utc::now();
        offsets_ms
            .iter()
            .map(|ms| {
                QueuedOperation::new("ping", json!({}), 3)
                    .with_timestamp(start + ChronoDuration::milliseconds(*ms))
            })
            .collect()
    }

    async fn managers() -> Vec<StorageManager> {
        let dir = tempfile::tempdir().unwrap().into_path();
        let managers = vec![
            StorageManager::in_memory(StorageSchema::default()),
            StorageManager::sqlite(SqliteConfig::in_memory(), StorageSchema::default()),
            StorageManager::sqlite(
                SqliteConfig::new(dir.join("pulse.db")),
                StorageSchema::default(),
            ),
        ];
        for m in &managers {
            m.initialize().await.unwrap();
        }
        managers
    }

    #[tokio::test]
    async fn test_concurrent_initialize_is_single_flight() {
        let manager = Arc::new(StorageManager::sqlite(
            SqliteConfig::in_memory(),
            StorageSchema::default(),
        ));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let m = manager.clone();
                tokio::spawn(async move { m.initialize().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(manager.is_initialized());
        assert_eq!(manager.count(OPERATIONS_COLLECTION).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_operations_queue_ordering_across_backends() {
        for manager in managers().await {
            let ops = ops_at(&[300, 100, 200]);
            for op in &ops {
                manager.set(OPERATIONS_COLLECTION, op).await.unwrap();
            }

            let loaded: Vec<QueuedOperation> = manager
                .get_many(OPERATIONS_COLLECTION, QueryOptions::by_index("timestamp"))
                .await
                .unwrap();
            let ids: Vec<_> = loaded.iter().map(|o| o.id.clone()).collect();
            assert_eq!(ids, vec![ops[1].id.clone(), ops[2].id.clone(), ops[0].id.clone()]);

            let newest: Vec<QueuedOperation> = manager
                .get_many(
                    OPERATIONS_COLLECTION,
                    QueryOptions::by_index("timestamp")
                        .direction(Direction::Descending)
                        .limit(1),
                )
                .await
                .unwrap();
            assert_eq!(newest[0].id, ops[0].id, "backend {}", manager.backend());

            manager.delete(OPERATIONS_COLLECTION, &ops[1].id).await.unwrap();
            assert_eq!(manager.count(OPERATIONS_COLLECTION).await.unwrap(), 2);

            let fetched: Option<QueuedOperation> =
                manager.get(OPERATIONS_COLLECTION, &ops[0].id).await.unwrap();
            assert_eq!(fetched.as_ref(), Some(&ops[0]));

            manager.clear(OPERATIONS_COLLECTION).await.unwrap();
            assert_eq!(manager.count(OPERATIONS_COLLECTION).await.unwrap(), 0);
            manager.close().await;
        }
    }

    #[tokio::test]
    async fn test_boolean_index_range() {
        for manager in managers().await {
            for (id, read) in [("n1", false), ("n2", true), ("n3", false)] {
                manager
                    .set("notifications", &json!({"id": id, "read": read, "timestamp": 1}))
                    .await
                    .unwrap();
            }
            let unread: Vec<Value> = manager
                .get_many(
                    "notifications",
                    QueryOptions::by_index("read").range(KeyRange::only(false)),
                )
                .await
                .unwrap();
            assert_eq!(unread.len(), 2, "backend {}", manager.backend());
        }
    }

    #[tokio::test]
    async fn test_errors_name_the_problem() {
        let manager = StorageManager::in_memory(StorageSchema::default());
        assert!(matches!(
            manager.count(OPERATIONS_COLLECTION).await,
            Err(StorageError::NotInitialized)
        ));

        manager.initialize().await.unwrap();
        assert!(matches!(
            manager.count("unknown").await,
            Err(StorageError::UnknownCollection { .. })
        ));
        assert!(matches!(
            manager
                .get_many::<Value>("messages", QueryOptions::by_index("nope"))
                .await,
            Err(StorageError::UnknownIndex { .. })
        ));
        assert!(matches!(
            manager.set("messages", &json!({"text": "no id"})).await,
            Err(StorageError::MissingKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_storage_info_and_close() {
        let manager = StorageManager::sqlite(SqliteConfig::in_memory(), StorageSchema::default());
        let info = manager.storage_info().await;
        assert!(!info.initialized);
        assert_eq!(info.total_records, 0);

        manager.initialize().await.unwrap();
        manager
            .set("conversations", &json!({"id": "c1", "updatedAt": 5}))
            .await
            .unwrap();
        let info = manager.storage_info().await;
        assert!(info.initialized);
        assert_eq!(info.collections.get("conversations"), Some(&1));
        assert_eq!(info.total_records, 1);
        assert!(info.used_bytes > 0);
        assert!(manager.health_check().await);

        manager.close().await;
        manager.close().await;
        assert!(!manager.health_check().await);
        assert!(matches!(manager.initialize().await, Err(StorageError::Closed)));
        assert!(matches!(
            manager.count("conversations").await,
            Err(StorageError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_delete_database_removes_side_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.db");

        let manager = StorageManager::sqlite(SqliteConfig::new(&path), StorageSchema::default());
        manager.initialize().await.unwrap();
        manager.close().await;
        assert!(path.exists());

        StorageManager::delete_database(&path).await.unwrap();
        assert!(!path.exists());
        assert!(!dir.path().join("gone.db-wal").exists());

        // Deleting again is fine
        StorageManager::delete_database(&path).await.unwrap();
        StorageManager::delete_database(IN_MEMORY_PATH).await.unwrap();
    }

    #[tokio::test]
    async fn test_is_available() {
        assert!(StorageManager::is_available().await);
    }
}
