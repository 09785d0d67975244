//! # SQLite Backend
//!
//! Connection pool creation and collection provisioning for SQLite.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SQLite Storage Layout                              │
//! │                                                                         │
//! │  _pulse_meta                                                           │
//! │  ┌──────────────┬─────────┐                                            │
//! │  │ name (PK)    │ version │   one row per database name                │
//! │  └──────────────┴─────────┘                                            │
//! │                                                                         │
//! │  "operations"  (one table per collection)                              │
//! │  ┌──────────────┬─────────────────────────────┐                        │
//! │  │ key (PK)     │ value (JSON text)           │                        │
//! │  └──────────────┴─────────────────────────────┘                        │
//! │      │                                                                  │
//! │      └── idx_operations_timestamp ON json_extract(value,'$.timestamp') │
//! │      └── idx_operations_event     ON json_extract(value,'$.event')     │
//! │                                                                         │
//! │  Provisioning runs when _pulse_meta has no row for the database or     │
//! │  holds an older version. Tables and indexes use IF NOT EXISTS, so a    │
//! │  version bump only adds what is new.                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! File databases run in WAL mode so readers don't block the queue writer.
//!
//! Identifiers are validated by `StorageSchema::validate` before they are
//! interpolated into SQL. Values are always bound.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use pulse_core::StorageSchema;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::query::Query;
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, info, warn};

use crate::adapter::{Direction, QueryOptions, StorageAdapter, StorageUsage};
use crate::error::{StorageError, StorageResult};

/// Path value selecting a private in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

const META_TABLE: &str = "_pulse_meta";

// =============================================================================
// Configuration
// =============================================================================

/// SQLite backend configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = SqliteConfig::new("/path/to/pulse.db")
///     .max_connections(4)
///     .connect_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the SQLite database file. Created if missing.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 4
    pub max_connections: u32,

    /// Connection timeout.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,
}

impl SqliteConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SqliteConfig {
            database_path: path.into(),
            max_connections: 4,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Creates an in-memory database configuration.
    ///
    /// ## Note
    /// The database lives exactly as long as its single pooled connection,
    /// so the pool is pinned to one connection that never idles out.
    pub fn in_memory() -> Self {
        SqliteConfig {
            database_path: PathBuf::from(IN_MEMORY_PATH),
            max_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
        }
    }

    /// Returns true for the in-memory sentinel path.
    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY_PATH
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// SQLite-backed storage adapter.
#[derive(Debug)]
pub struct SqliteAdapter {
    config: SqliteConfig,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteAdapter {
    pub fn new(config: SqliteConfig) -> Self {
        SqliteAdapter {
            config,
            pool: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    fn pool(&self) -> StorageResult<SqlitePool> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StorageError::NotInitialized)
    }

    async fn connect(&self) -> StorageResult<SqlitePool> {
        let path = self.config.database_path.display().to_string();
        info!(path = %path, "Opening SQLite storage");

        let open_failed = |e: sqlx::Error| StorageError::OpenFailed {
            path: path.clone(),
            reason: e.to_string(),
        };

        let (options, pool_options) = if self.config.is_in_memory() {
            let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(open_failed)?;
            let pool_options = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
            (options, pool_options)
        } else {
            let options = SqliteConnectOptions::new()
                .filename(&self.config.database_path)
                // WAL mode: readers don't block writers, writers don't block readers
                .journal_mode(SqliteJournalMode::Wal)
                // NORMAL synchronous: safe from corruption, may lose the last
                // transaction on power loss
                .synchronous(SqliteSynchronous::Normal)
                .create_if_missing(true);
            let pool_options = SqlitePoolOptions::new()
                .max_connections(self.config.max_connections)
                .idle_timeout(Some(self.config.idle_timeout));
            (options, pool_options)
        };

        let pool = pool_options
            .acquire_timeout(self.config.connect_timeout)
            .connect_with(options)
            .await
            .map_err(open_failed)?;

        debug!(max_connections = self.config.max_connections, "SQLite pool created");
        Ok(pool)
    }

    async fn provision(pool: &SqlitePool, schema: &StorageSchema) -> StorageResult<()> {
        let meta_err = |e| StorageError::query(META_TABLE, e);

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {META_TABLE} (name TEXT PRIMARY KEY, version INTEGER NOT NULL)"
        ))
        .execute(pool)
        .await
        .map_err(meta_err)?;

        let stored: Option<i64> =
            sqlx::query_scalar(&format!("SELECT version FROM {META_TABLE} WHERE name = ?"))
                .bind(&schema.name)
                .fetch_optional(pool)
                .await
                .map_err(meta_err)?;

        let requested = i64::from(schema.version);
        match stored {
            Some(v) if v == requested => {
                debug!(version = v, "Storage schema up to date");
                return Ok(());
            }
            Some(v) if v > requested => {
                return Err(StorageError::VersionMismatch {
                    stored: u32::try_from(v).unwrap_or(u32::MAX),
                    requested: schema.version,
                });
            }
            Some(v) => info!(from = v, to = requested, "Upgrading storage schema"),
            None => info!(version = requested, "Creating storage schema"),
        }

        let mut tx = pool.begin().await.map_err(meta_err)?;

        for collection in &schema.collections {
            let table = &collection.name;
            let err = |e| StorageError::query(table, e);

            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS \"{table}\" (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL)"
            ))
            .execute(&mut *tx)
            .await
            .map_err(err)?;

            for index in &collection.indexes {
                let unique = if index.unique { "UNIQUE " } else { "" };
                sqlx::query(&format!(
                    "CREATE {unique}INDEX IF NOT EXISTS \"idx_{table}_{name}\" ON \"{table}\" (json_extract(value, '$.{path}'))",
                    name = index.name,
                    path = index.key_path,
                ))
                .execute(&mut *tx)
                .await
                .map_err(err)?;
            }

            debug!(collection = %table, indexes = collection.indexes.len(), "Collection provisioned");
        }

        sqlx::query(&format!(
            "INSERT INTO {META_TABLE} (name, version) VALUES (?, ?) \
             ON CONFLICT(name) DO UPDATE SET version = excluded.version"
        ))
        .bind(&schema.name)
        .bind(requested)
        .execute(&mut *tx)
        .await
        .map_err(meta_err)?;

        tx.commit().await.map_err(meta_err)?;
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteAdapter {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn open(&self, schema: &StorageSchema) -> StorageResult<()> {
        let pool = match self.pool() {
            Ok(pool) => pool,
            Err(_) => {
                let pool = self.connect().await?;
                *self.pool.write().unwrap_or_else(PoisonError::into_inner) = Some(pool.clone());
                pool
            }
        };

        Self::provision(&pool, schema).await
    }

    async fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Value>> {
        let pool = self.pool()?;
        let raw: Option<String> =
            sqlx::query_scalar(&format!("SELECT value FROM \"{collection}\" WHERE key = ?"))
                .bind(key)
                .fetch_optional(&pool)
                .await
                .map_err(|e| StorageError::query(collection, e))?;

        raw.map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(|e| StorageError::serialization(collection, e))
    }

    async fn put(&self, collection: &str, key: &str, value: &Value) -> StorageResult<()> {
        let pool = self.pool()?;
        let text =
            serde_json::to_string(value).map_err(|e| StorageError::serialization(collection, e))?;

        sqlx::query(&format!(
            "INSERT INTO \"{collection}\" (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value"
        ))
        .bind(key)
        .bind(text)
        .execute(&pool)
        .await
        .map_err(|e| StorageError::query(collection, e))?;

        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> StorageResult<()> {
        let pool = self.pool()?;
        sqlx::query(&format!("DELETE FROM \"{collection}\" WHERE key = ?"))
            .bind(key)
            .execute(&pool)
            .await
            .map_err(|e| StorageError::query(collection, e))?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        index_path: Option<&str>,
        options: &QueryOptions,
    ) -> StorageResult<Vec<Value>> {
        let pool = self.pool()?;

        let sort_expr = match index_path {
            Some(path) => format!("json_extract(value, '$.{path}')"),
            None => "key".to_string(),
        };

        let mut clauses = Vec::new();
        let mut args = Vec::new();
        if index_path.is_some() {
            // Records missing the field are not part of the index
            clauses.push(format!("{sort_expr} IS NOT NULL"));
        }
        if let Some(range) = &options.range {
            if let Some(lower) = &range.lower {
                let op = if range.lower_open { ">" } else { ">=" };
                clauses.push(format!("{sort_expr} {op} ?"));
                args.push(SqlArg::from_json(lower));
            }
            if let Some(upper) = &range.upper {
                let op = if range.upper_open { "<" } else { "<=" };
                clauses.push(format!("{sort_expr} {op} ?"));
                args.push(SqlArg::from_json(upper));
            }
        }

        let dir = match options.direction {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        };
        let mut sql = format!("SELECT value FROM \"{collection}\"");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY {sort_expr} {dir}, key {dir}"));
        if let Some(limit) = options.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query(&sql);
        for arg in args {
            query = arg.bind(query);
        }

        let rows = query
            .fetch_all(&pool)
            .await
            .map_err(|e| StorageError::query(collection, e))?;

        rows.iter()
            .map(|row| {
                let text: String = row
                    .try_get("value")
                    .map_err(|e| StorageError::query(collection, e))?;
                serde_json::from_str(&text).map_err(|e| StorageError::serialization(collection, e))
            })
            .collect()
    }

    async fn clear(&self, collection: &str) -> StorageResult<()> {
        let pool = self.pool()?;
        sqlx::query(&format!("DELETE FROM \"{collection}\""))
            .execute(&pool)
            .await
            .map_err(|e| StorageError::query(collection, e))?;
        Ok(())
    }

    async fn count(&self, collection: &str) -> StorageResult<u64> {
        let pool = self.pool()?;
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{collection}\""))
            .fetch_one(&pool)
            .await
            .map_err(|e| StorageError::query(collection, e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn usage(&self) -> StorageResult<StorageUsage> {
        let pool = self.pool()?;
        let err = |e| StorageError::query(META_TABLE, e);

        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&pool)
            .await
            .map_err(err)?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&pool)
            .await
            .map_err(err)?;

        Ok(StorageUsage {
            used_bytes: u64::try_from(page_count.saturating_mul(page_size)).unwrap_or(0),
            quota_bytes: None,
        })
    }

    async fn close(&self) {
        let pool = self.pool.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(pool) = pool {
            info!("Closing SQLite storage");
            pool.close().await;
        } else {
            warn!("SQLite storage closed before it was opened");
        }
    }
}

// =============================================================================
// Bind Helpers
// =============================================================================

/// A JSON scalar converted to the type `json_extract` would return for it.
enum SqlArg {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl SqlArg {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlArg::Null,
            Value::Bool(b) => SqlArg::Int(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlArg::Int(i),
                None => SqlArg::Real(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => SqlArg::Text(s.clone()),
            // json_extract returns JSON text for containers
            other => SqlArg::Text(other.to_string()),
        }
    }

    fn bind<'q>(
        self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            SqlArg::Null => query.bind(Option::<String>::None),
            SqlArg::Int(i) => query.bind(i),
            SqlArg::Real(f) => query.bind(f),
            SqlArg::Text(s) => query.bind(s),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::KeyRange;
    use pulse_core::{CollectionSchema, IndexSchema};
    use serde_json::json;

    fn schema(version: u32) -> StorageSchema {
        let mut items = CollectionSchema::new("items", "id").index(IndexSchema::on("rank"));
        if version > 1 {
            items = items.index(IndexSchema::on("email").unique());
        }
        StorageSchema {
            name: "test".into(),
            version,
            collections: vec![items],
        }
    }

    async fn open_memory() -> SqliteAdapter {
        let adapter = SqliteAdapter::new(SqliteConfig::in_memory());
        adapter.open(&schema(1)).await.unwrap();
        adapter
    }

    #[tokio::test]
    async fn test_put_get_roundtrip_and_overwrite() {
        let adapter = open_memory().await;
        adapter.put("items", "a", &json!({"id": "a", "rank": 1})).await.unwrap();
        adapter.put("items", "a", &json!({"id": "a", "rank": 2})).await.unwrap();

        let got = adapter.get("items", "a").await.unwrap().unwrap();
        assert_eq!(got["rank"], 2);
        assert_eq!(adapter.count("items").await.unwrap(), 1);
        assert!(adapter.get("items", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_index_order_range_and_limit() {
        let adapter = open_memory().await;
        for (id, rank) in [("a", 30), ("b", 10), ("c", 20), ("d", 40)] {
            adapter
                .put("items", id, &json!({"id": id, "rank": rank}))
                .await
                .unwrap();
        }
        adapter.put("items", "e", &json!({"id": "e"})).await.unwrap();

        let rows = adapter
            .query("items", Some("rank"), &QueryOptions::by_index("rank"))
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap().to_string()).collect();
        assert_eq!(ids, vec!["b", "c", "a", "d"]);

        let rows = adapter
            .query(
                "items",
                Some("rank"),
                &QueryOptions::by_index("rank")
                    .range(KeyRange::bound(15, 35))
                    .direction(Direction::Descending)
                    .limit(1),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "a");
    }

    #[tokio::test]
    async fn test_version_bump_adds_index() {
        let dir = tempfile::tempdir().unwrap();
        let config = SqliteConfig::new(dir.path().join("bump.db"));

        let adapter = SqliteAdapter::new(config.clone());
        adapter.open(&schema(1)).await.unwrap();
        adapter.close().await;

        let adapter = SqliteAdapter::new(config.clone());
        adapter.open(&schema(2)).await.unwrap();
        adapter
            .put("items", "a", &json!({"id": "a", "email": "x@y"}))
            .await
            .unwrap();
        let err = adapter
            .put("items", "b", &json!({"id": "b", "email": "x@y"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation { .. }));
        adapter.close().await;

        // Opening with an older version is refused
        let adapter = SqliteAdapter::new(config);
        let err = adapter.open(&schema(1)).await.unwrap_err();
        assert!(matches!(err, StorageError::VersionMismatch { stored: 2, requested: 1 }));
        adapter.close().await;
    }

    #[tokio::test]
    async fn test_usage_reports_pages() {
        let adapter = open_memory().await;
        let usage = adapter.usage().await.unwrap();
        assert!(usage.used_bytes > 0);
        assert_eq!(usage.quota_bytes, None);
    }

    #[tokio::test]
    async fn test_operations_before_open_fail() {
        let adapter = SqliteAdapter::new(SqliteConfig::in_memory());
        assert!(matches!(
            adapter.get("items", "a").await,
            Err(StorageError::NotInitialized)
        ));
    }
}
