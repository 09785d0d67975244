//! # Error Types
//!
//! Serializable error payloads and validation errors for pulse-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  pulse-core (this file)                                                │
//! │  ├── ErrorCode        - Stable machine-readable codes                  │
//! │  ├── SyncBaseError    - {code, message, details, timestamp} payload    │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  pulse-db                                                              │
//! │  └── StorageError     - Persistence failures (collection + cause)      │
//! │                                                                         │
//! │  pulse-sync                                                            │
//! │  └── SyncError        - Connection/Auth/Request/... taxonomy           │
//! │                                                                         │
//! │  Flow: ValidationError / StorageError → SyncError → SyncBaseError      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// =============================================================================
// Error Codes
// =============================================================================

/// Stable error codes exposed to callers and carried in event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConnectionFailed,
    ConnectionTimeout,
    ConnectionLost,
    AuthFailed,
    AuthExpired,
    AuthInvalid,
    ValidationError,
    NotConnected,
    RequestFailed,
    StorageError,
    TransportError,
    ConfigError,
    ClientDestroyed,
    InternalError,

    /// Not a failure: the event was captured for later replay.
    Queued,
}

impl ErrorCode {
    /// Returns the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::ConnectionLost => "CONNECTION_LOST",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::AuthExpired => "AUTH_EXPIRED",
            ErrorCode::AuthInvalid => "AUTH_INVALID",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::RequestFailed => "REQUEST_FAILED",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::TransportError => "TRANSPORT_ERROR",
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::ClientDestroyed => "CLIENT_DESTROYED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::Queued => "QUEUED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Base Error Payload
// =============================================================================

/// Serializable error record, the common shape of every client error.
///
/// ## Usage
/// Emitted as the payload of `connection:error` and
/// `offline:operation_failed`, and returned by `SyncError::to_base()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBaseError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl SyncBaseError {
    /// Creates an error record stamped with the current time.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        SyncBaseError {
            code: code.into(),
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    /// Attaches structured details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for SyncBaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before anything touches the network or the database.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g., a collection name with punctuation).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: u64, max: u64 },
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_code_wire_format() {
        assert_eq!(ErrorCode::Queued.as_str(), "QUEUED");
        assert_eq!(
            serde_json::to_value(ErrorCode::ConnectionTimeout).unwrap(),
            json!("CONNECTION_TIMEOUT")
        );
        assert_eq!(ErrorCode::AuthInvalid.to_string(), "AUTH_INVALID");
    }

    #[test]
    fn test_base_error_details_skipped_when_absent() {
        let err = SyncBaseError::new("NOT_CONNECTED", "Not connected");
        let value = serde_json::to_value(&err).unwrap();
        assert!(value.get("details").is_none());
        assert_eq!(err.to_string(), "[NOT_CONNECTED] Not connected");

        let err = err.with_details(json!({"attempt": 3}));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["details"]["attempt"], 3);
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "event".to_string(),
        };
        assert_eq!(err.to_string(), "event is required");

        let err = ValidationError::TooLong {
            field: "event".to_string(),
            max: 128,
        };
        assert_eq!(err.to_string(), "event must be at most 128 characters");
    }
}
