//! # Domain Types
//!
//! Core state types shared by the connection layer, the offline queue and
//! the storage layer.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Client Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ ConnectionState │   │ QueuedOperation │   │ConnectionMetrics│       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  status         │   │  id (UUID)      │   │  latency_ms     │       │
//! │  │  last_connected │   │  event          │   │  messages_sent  │       │
//! │  │  reconnect_     │   │  payload (JSON) │   │  messages_recv  │       │
//! │  │    attempts     │   │  timestamp      │   │  error_count    │       │
//! │  │  error          │   │  seq            │   │  uptime_ms      │       │
//! │  │                 │   │  retry_count    │   │                 │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │          │                     │                                        │
//! │          └──────────┬──────────┘                                        │
//! │                     ▼                                                   │
//! │            ┌─────────────────┐                                          │
//! │            │   ClientState   │  recomputed on demand, never persisted  │
//! │            └─────────────────┘                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//! - `ConnectionState` and `ConnectionMetrics` are written only by the
//!   connection manager; everyone else receives copies.
//! - `QueuedOperation` is owned by the sync client's in-memory queue and
//!   mirrored to the `operations` collection.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// Connection Status
// =============================================================================

/// Coarse connection status.
///
/// ```text
/// Disconnected ──connect()──► Connecting ──┬──► Connected
///      ▲                                   └──► Error
///      │                                          │
///      └──────── transport close / destroy ◄──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// A connection attempt is in flight.
    Connecting,
    /// Transport is open and usable.
    Connected,
    /// No transport. Initial and terminal state.
    #[default]
    Disconnected,
    /// The last attempt failed. A retry may be scheduled.
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Snapshot of the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    /// Current status.
    pub status: ConnectionStatus,

    /// When the last successful connect completed.
    pub last_connected: Option<DateTime<Utc>>,

    /// Retries scheduled since the last successful connect.
    pub reconnect_attempts: u32,

    /// Message of the most recent failure, if any.
    pub error: Option<String>,
}

impl ConnectionState {
    /// Returns true if the status is `Connected`.
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

// =============================================================================
// Queued Operation
// =============================================================================

/// An outbound event captured while the transport was unavailable.
///
/// Serialized in camelCase so the `timestamp` key path lines up with the
/// secondary index of the `operations` collection.
///
/// ## Invariant
/// `retry_count <= max_retries` at all times. Once `retry_count` reaches
/// `max_retries` the operation is abandoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Event name as given to `send_event`.
    pub event: String,

    /// Opaque payload.
    pub payload: Value,

    /// Capture time, millisecond precision. Stored as epoch milliseconds so
    /// the storage index orders numerically. Replay order is ascending by
    /// this field.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Enqueue sequence, breaks ties between equal timestamps. Assigned by
    /// the offline queue.
    #[serde(default)]
    pub seq: u64,

    /// Failed replay attempts so far.
    #[serde(default)]
    pub retry_count: u32,

    /// Attempts allowed before the operation is dropped.
    pub max_retries: u32,
}

impl QueuedOperation {
    /// Creates a new operation stamped with the current time.
    pub fn new(event: impl Into<String>, payload: Value, max_retries: u32) -> Self {
        QueuedOperation {
            id: Uuid::new_v4().to_string(),
            event: event.into(),
            payload,
            timestamp: Utc::now().trunc_subsecs(3),
            seq: 0,
            retry_count: 0,
            max_retries,
        }
    }

    /// Overrides the capture time.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp.trunc_subsecs(3);
        self
    }

    /// Replay order key.
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.seq)
    }

    /// Records a failed replay attempt.
    ///
    /// Returns `true` when the operation has used up its retries and must
    /// be dropped. The counter never passes `max_retries`.
    pub fn record_failure(&mut self) -> bool {
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
        }
        self.is_exhausted()
    }

    /// Returns true once no retries remain.
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

// =============================================================================
// Connection Metrics
// =============================================================================

/// Counters maintained by the connection manager.
///
/// Counters only grow. They are reset when the connection manager is
/// destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetrics {
    /// Most recent round-trip estimate in milliseconds.
    pub latency_ms: u64,

    /// Requests written to the transport.
    pub messages_sent: u64,

    /// Acknowledgements received.
    pub messages_received: u64,

    /// Failed connects, failed acks, timeouts and failed health checks.
    pub error_count: u64,

    /// Time since the current connection was established (0 if never).
    pub connection_uptime_ms: u64,
}

// =============================================================================
// Client State
// =============================================================================

/// Aggregate view of the sync client, recomputed on demand.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientState {
    pub is_initialized: bool,
    pub is_connected: bool,
    pub is_authenticated: bool,
    pub connection_state: ConnectionState,

    /// Raw server-push subscriptions currently registered.
    pub active_subscriptions: usize,

    /// Snapshot of the offline queue in replay order.
    pub queued_operations: Vec<QueuedOperation>,

    /// Last time the client sent or queued an event.
    pub last_activity: Option<DateTime<Utc>>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_status_display() {
        assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_connection_state_serializes_camel_case() {
        let state = ConnectionState {
            status: ConnectionStatus::Connected,
            reconnect_attempts: 2,
            ..Default::default()
        };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["status"], "connected");
        assert_eq!(value["reconnectAttempts"], 2);
        assert!(state.is_connected());
    }

    #[test]
    fn test_record_failure_never_exceeds_max() {
        let mut op = QueuedOperation::new("message:send", json!({"text": "hi"}), 2);
        assert!(!op.is_exhausted());

        assert!(!op.record_failure());
        assert_eq!(op.retry_count, 1);

        assert!(op.record_failure());
        assert_eq!(op.retry_count, 2);

        // Further failures are clamped
        assert!(op.record_failure());
        assert_eq!(op.retry_count, 2);
    }

    #[test]
    fn test_zero_max_retries_is_immediately_exhausted() {
        let op = QueuedOperation::new("ping", Value::Null, 0);
        assert!(op.is_exhausted());
    }

    #[test]
    fn test_queued_operation_json_shape() {
        let op = QueuedOperation::new("ping", json!({}), 3);
        let value = serde_json::to_value(&op).unwrap();
        assert!(value.get("retryCount").is_some());
        assert!(value.get("maxRetries").is_some());
        assert!(value["timestamp"].is_i64());
        assert_eq!(value["seq"], 0);

        let back: QueuedOperation = serde_json::from_value(value).unwrap();
        assert_eq!(back, op);
    }
}
