//! # pulse-sync: Real-Time Sync Client
//!
//! Keeps one authenticated connection to the sync server alive, correlates
//! requests with their acknowledgements and queues events while offline.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            SyncClient                                   │
//! │                                                                         │
//! │   send_event ──┬──► ConnectionManager ──► Transport ──► server          │
//! │                │         │    ▲                                         │
//! │                │         │    └── reconnect / ping / health tasks       │
//! │                │         ▼                                              │
//! │                │    EventManager ──► connection:*, auth:*, offline:*    │
//! │                │                                                        │
//! │                └──► OfflineQueue ◄──► StorageManager (`operations`)     │
//! │                          │                                              │
//! │                          └── replayed in timestamp order on reconnect   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`client`] - `SyncClient` orchestrator and its builder
//! - [`connection`] - Connection lifecycle, requests, health, reconnection
//! - [`events`] - Lifecycle event bus with per-event listener caps
//! - [`transport`] - Transport trait, WebSocket and mock implementations
//! - [`auth`] - Token provider contract
//! - [`config`] - TOML/env configuration
//! - [`queue`] - In-memory offline queue
//! - [`reconnect`] - Exponential backoff with jitter
//! - [`tasks`] - Named background tasks
//! - [`logging`] - Tracing subscriber setup
//! - [`error`] - Error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod logging;
pub mod queue;
pub mod reconnect;
pub mod tasks;
pub mod transport;

mod util;

// =============================================================================
// Re-exports
// =============================================================================

pub use auth::{AuthProvider, StaticTokenProvider};
pub use client::{DebugInfo, ReplaySummary, SyncClient, SyncClientBuilder};
pub use config::ClientConfig;
pub use connection::ConnectionManager;
pub use error::{AuthErrorKind, ConnectionErrorKind, SyncError, SyncResult};
pub use events::{names, EventDebugInfo, EventManager, Subscription};
pub use logging::init_tracing;
pub use transport::{MockTransport, Transport, WebSocketTransport};

pub use pulse_core::{
    ClientState, ConnectionMetrics, ConnectionState, ConnectionStatus, EventResponse,
    QueuedOperation,
};
pub use pulse_db::StorageManager;
