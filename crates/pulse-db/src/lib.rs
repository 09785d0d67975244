//! # pulse-db: Storage Layer for the Pulse Sync Client
//!
//! Durable local persistence with named collections, each keyed and
//! secondarily indexed.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Pulse Storage Flow                               │
//! │                                                                         │
//! │  SyncClient (offline queue) / feed caches                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     pulse-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │StorageManager │    │StorageAdapter │    │   Backends   │  │   │
//! │  │   │ (manager.rs)  │───►│  (adapter.rs) │◄───│              │  │   │
//! │  │   │               │    │               │    │ SqliteAdapter│  │   │
//! │  │   │ single-flight │    │ get/set/query │    │ MemoryAdapter│  │   │
//! │  │   │ init, typed   │    │ clear/count   │    │              │  │   │
//! │  │   │ records       │    │ usage/close   │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   one table per collection • json_extract expression indexes    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`manager`] - `StorageManager`, the public entry point
//! - [`adapter`] - `StorageAdapter` trait and query types
//! - [`sqlite`] - SQLite backend (sqlx)
//! - [`memory`] - In-memory backend
//! - [`error`] - Storage error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pulse_db::{QueryOptions, SqliteConfig, StorageManager};
//! use pulse_core::StorageSchema;
//!
//! let storage = StorageManager::sqlite(SqliteConfig::new("./pulse.db"), StorageSchema::default());
//! storage.initialize().await?;
//!
//! storage.set("operations", &op).await?;
//! let oldest: Vec<QueuedOperation> = storage
//!     .get_many("operations", QueryOptions::by_index("timestamp").limit(10))
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod adapter;
pub mod error;
pub mod manager;
pub mod memory;
pub mod sqlite;

// =============================================================================
// Re-exports
// =============================================================================

pub use adapter::{Direction, KeyRange, QueryOptions, StorageAdapter, StorageUsage};
pub use error::{StorageError, StorageResult};
pub use manager::{StorageInfo, StorageManager};
pub use memory::MemoryAdapter;
pub use sqlite::{SqliteAdapter, SqliteConfig};
