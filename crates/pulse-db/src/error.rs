//! # Storage Error Types
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  sqlx::Error / serde_json::Error                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StorageError (this module) ← adds the collection name                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError::Storage (pulse-sync) ← logged, treated as a cache miss     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use pulse_core::ValidationError;
use thiserror::Error;

/// Storage operation errors.
///
/// Every variant tied to a collection names it, along with the underlying
/// cause.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An operation ran before `initialize()`.
    #[error("Storage not initialized")]
    NotInitialized,

    /// The storage manager was closed.
    #[error("Storage is closed")]
    Closed,

    /// The database could not be opened or created.
    ///
    /// ## When This Occurs
    /// - Parent directory doesn't exist or isn't writable
    /// - File is locked or corrupt
    #[error("Failed to open database {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    /// Stored schema is newer than the one requested.
    #[error("Database schema version {stored} is newer than requested version {requested}")]
    VersionMismatch { stored: u32, requested: u32 },

    /// Collection not declared in the schema.
    #[error("Unknown collection: {collection}")]
    UnknownCollection { collection: String },

    /// Index not declared on the collection.
    #[error("Unknown index {index} on collection {collection}")]
    UnknownIndex { collection: String, index: String },

    /// Record lacks a usable primary key at the collection's key path.
    #[error("Record in {collection} has no valid key at '{key_path}'")]
    MissingKey { collection: String, key_path: String },

    /// Query execution failed.
    #[error("Query on {collection} failed: {reason}")]
    QueryFailed { collection: String, reason: String },

    /// A record could not be (de)serialized.
    #[error("Serialization failed for {collection}: {reason}")]
    Serialization { collection: String, reason: String },

    /// Unique index violation.
    #[error("Duplicate value in {collection}: {reason}")]
    UniqueViolation { collection: String, reason: String },

    /// File system error (database deletion).
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    /// Invalid identifier or schema.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl StorageError {
    /// Maps a sqlx error raised while working on `collection`.
    pub fn query(collection: &str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) if db_err.message().contains("UNIQUE constraint failed") => {
                StorageError::UniqueViolation {
                    collection: collection.to_string(),
                    reason: db_err.message().to_string(),
                }
            }
            sqlx::Error::PoolClosed => StorageError::Closed,
            other => StorageError::QueryFailed {
                collection: collection.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Maps a serde error raised while converting a record of `collection`.
    pub fn serialization(collection: &str, err: serde_json::Error) -> Self {
        StorageError::Serialization {
            collection: collection.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn unknown_collection(collection: &str) -> Self {
        StorageError::UnknownCollection {
            collection: collection.to_string(),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_collection() {
        let err = StorageError::QueryFailed {
            collection: "operations".into(),
            reason: "disk I/O error".into(),
        };
        assert_eq!(err.to_string(), "Query on operations failed: disk I/O error");

        let err = StorageError::unknown_collection("nope");
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_pool_closed_maps_to_closed() {
        let err = StorageError::query("operations", sqlx::Error::PoolClosed);
        assert!(matches!(err, StorageError::Closed));
    }
}
