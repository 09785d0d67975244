//! # pulse-core: Pure Types for the Pulse Sync Client
//!
//! Everything the storage layer and the network layer need to agree on,
//! with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Pulse Architecture                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Application (notification feed, messenger, ...)        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ send_event / on / subscribe            │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 pulse-sync (SyncClient)                         │   │
//! │  │    EventManager ◄── ConnectionManager ── Offline queue         │   │
//! │  └──────────────┬──────────────────────────────────┬───────────────┘   │
//! │                 │                                  │                    │
//! │  ┌──────────────▼──────────────┐   ┌───────────────▼───────────────┐   │
//! │  │  pulse-db (StorageManager)  │   │   WebSocket (server)          │   │
//! │  └──────────────┬──────────────┘   └───────────────────────────────┘   │
//! │                 │                                                       │
//! │  ┌──────────────▼──────────────────────────────────────────────────┐   │
//! │  │               ★ pulse-core (THIS CRATE) ★                       │   │
//! │  │   types • protocol • schema • backoff • validation              │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Connection state, queued operations, client state, metrics
//! - [`protocol`] - Wire envelope and request/response types
//! - [`schema`] - Persistent collection definitions
//! - [`backoff`] - Reconnect delay arithmetic
//! - [`error`] - Error payloads and validation errors
//! - [`validation`] - Input checks for event and collection names

// =============================================================================
// Module Declarations
// =============================================================================

pub mod backoff;
pub mod error;
pub mod protocol;
pub mod schema;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{ErrorCode, SyncBaseError, ValidationError};
pub use protocol::{Envelope, EventResponse, ResponseError};
pub use schema::{CollectionSchema, IndexSchema, StorageSchema};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default number of replay attempts for a queued operation before it is
/// abandoned and reported through `offline:operation_failed`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default ceiling on listeners registered for a single event name.
pub const DEFAULT_MAX_LISTENERS: usize = 100;
