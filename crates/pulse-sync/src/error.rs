//! # Sync Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Connection    │  │      Auth       │  │       Request           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Failed         │  │  Failed         │  │  NotConnected           │ │
//! │  │  Timeout        │  │  Expired        │  │  Request {code,..}      │ │
//! │  │  Lost           │  │  Invalid        │  │  Validation             │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Storage      │  │   Transport     │  │      Lifecycle          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  StorageError   │  │  WebSocket,     │  │  Config                 │ │
//! │  │  (pulse-db)     │  │  framing        │  │  Destroyed, Internal    │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Every variant maps to a SyncBaseError {code, message, details,        │
//! │  timestamp} via `to_base()`.                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use pulse_core::{ErrorCode, SyncBaseError, ValidationError};
use pulse_db::StorageError;
use serde_json::{json, Value};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Transport could not be opened.
    Failed,
    /// Connect or request exceeded its deadline.
    Timeout,
    /// An established connection went away.
    Lost,
}

impl std::fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionErrorKind::Failed => write!(f, "failed"),
            ConnectionErrorKind::Timeout => write!(f, "timed out"),
            ConnectionErrorKind::Lost => write!(f, "lost"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Credentials were rejected or refresh failed.
    Failed,
    /// Token expired.
    Expired,
    /// No usable token.
    Invalid,
}

impl std::fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthErrorKind::Failed => write!(f, "failed"),
            AuthErrorKind::Expired => write!(f, "expired"),
            AuthErrorKind::Invalid => write!(f, "invalid"),
        }
    }
}

/// Every failure the client can report.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Connection / Auth
    // =========================================================================
    #[error("Connection {kind}: {message}")]
    Connection {
        kind: ConnectionErrorKind,
        message: String,
    },

    #[error("Authentication {kind}: {message}")]
    Auth { kind: AuthErrorKind, message: String },

    // =========================================================================
    // Requests
    // =========================================================================
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The call needs a live connection and there is none.
    #[error("Not connected")]
    NotConnected,

    /// The server rejected a request.
    #[error("Request '{event}' failed: [{code}] {message}")]
    Request {
        event: String,
        code: String,
        message: String,
        details: Option<Value>,
    },

    // =========================================================================
    // Infrastructure
    // =========================================================================
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    // =========================================================================
    // Lifecycle
    // =========================================================================
    /// The component was destroyed and can't be used again.
    #[error("Client has been destroyed")]
    Destroyed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn connection_failed(message: impl Into<String>) -> Self {
        SyncError::Connection {
            kind: ConnectionErrorKind::Failed,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        SyncError::Connection {
            kind: ConnectionErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        SyncError::Connection {
            kind: ConnectionErrorKind::Lost,
            message: message.into(),
        }
    }

    pub fn auth(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        SyncError::Auth {
            kind,
            message: message.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::Connection { kind, .. } => match kind {
                ConnectionErrorKind::Failed => ErrorCode::ConnectionFailed,
                ConnectionErrorKind::Timeout => ErrorCode::ConnectionTimeout,
                ConnectionErrorKind::Lost => ErrorCode::ConnectionLost,
            },
            SyncError::Auth { kind, .. } => match kind {
                AuthErrorKind::Failed => ErrorCode::AuthFailed,
                AuthErrorKind::Expired => ErrorCode::AuthExpired,
                AuthErrorKind::Invalid => ErrorCode::AuthInvalid,
            },
            SyncError::Validation(_) => ErrorCode::ValidationError,
            SyncError::NotConnected => ErrorCode::NotConnected,
            SyncError::Request { .. } => ErrorCode::RequestFailed,
            SyncError::Storage(_) => ErrorCode::StorageError,
            SyncError::Transport(_) => ErrorCode::TransportError,
            SyncError::Config(_) => ErrorCode::ConfigError,
            SyncError::Destroyed => ErrorCode::ClientDestroyed,
            SyncError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Converts to the serializable error record.
    pub fn to_base(&self) -> SyncBaseError {
        let base = SyncBaseError::new(self.code().as_str(), self.to_string());
        match self {
            SyncError::Request {
                event,
                code,
                details,
                ..
            } => base.with_details(json!({
                "event": event,
                "serverCode": code,
                "details": details,
            })),
            _ => base,
        }
    }

    /// Returns true if retrying the same operation later may succeed.
    ///
    /// ## Retryable Errors
    /// - Connection failures, timeouts and drops
    /// - Missing connection
    /// - Transport errors
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Connection { .. } | SyncError::NotConnected | SyncError::Transport(_)
        )
    }

    /// Returns true if the error means the transport is gone, as opposed to
    /// the server answering badly or slowly.
    pub fn is_connectivity_loss(&self) -> bool {
        matches!(
            self,
            SyncError::NotConnected
                | SyncError::Connection {
                    kind: ConnectionErrorKind::Lost,
                    ..
                }
        )
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Transport(format!("serialization failed: {}", err))
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::Config(format!("invalid url: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                SyncError::connection_lost("websocket closed")
            }
            WsError::Io(io) => SyncError::connection_failed(io.to_string()),
            WsError::Http(response) => match response.status().as_u16() {
                401 | 403 => SyncError::auth(
                    AuthErrorKind::Failed,
                    format!("handshake rejected with {}", response.status()),
                ),
                _ => SyncError::connection_failed(format!(
                    "handshake rejected with {}",
                    response.status()
                )),
            },
            other => SyncError::Transport(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config(format!("failed to parse config: {}", err))
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::Config(format!("failed to write config: {}", err))
    }
}
