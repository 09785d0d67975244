//! # Validation Module
//!
//! Input checks applied before anything reaches the transport or storage.
//!
//! ## Where Validation Runs
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Points                                  │
//! │                                                                         │
//! │  SyncClient::send_event(name, ..)                                      │
//! │  └── validate_event_name      (before queueing or sending)             │
//! │                                                                         │
//! │  StorageManager::initialize / get / set                                │
//! │  └── validate_collection_name (collection names become table names)    │
//! │  └── validate_key_path        (key paths become json_extract paths)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use pulse_core::validation::{validate_collection_name, validate_event_name};
//!
//! assert!(validate_event_name("message:send").is_ok());
//! assert!(validate_collection_name("operations").is_ok());
//! assert!(validate_collection_name("drop table").is_err());
//! ```

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted event name.
pub const MAX_EVENT_NAME_LEN: usize = 128;

/// Longest accepted collection name.
pub const MAX_COLLECTION_NAME_LEN: usize = 64;

// =============================================================================
// Event Names
// =============================================================================

/// Validates an outbound event name.
///
/// ## Rules
/// - Must not be empty or whitespace
/// - At most 128 characters
pub fn validate_event_name(name: &str) -> ValidationResult<()> {
    if name.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "event".to_string(),
        });
    }

    if name.len() > MAX_EVENT_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "event".to_string(),
            max: MAX_EVENT_NAME_LEN,
        });
    }

    Ok(())
}

// =============================================================================
// Storage Identifiers
// =============================================================================

/// Validates a collection name.
///
/// ## Rules
/// - Starts with an ASCII letter
/// - Only ASCII letters, digits and underscores
/// - At most 64 characters
///
/// Collection names are used verbatim as SQLite table names, so this is the
/// only thing standing between a caller and SQL injection.
pub fn validate_collection_name(name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "collection".to_string(),
        });
    }

    if name.len() > MAX_COLLECTION_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "collection".to_string(),
            max: MAX_COLLECTION_NAME_LEN,
        });
    }

    if !is_identifier(name) {
        return Err(ValidationError::InvalidFormat {
            field: "collection".to_string(),
            reason: format!("'{}' must match [A-Za-z][A-Za-z0-9_]*", name),
        });
    }

    Ok(())
}

/// Validates a key path such as `timestamp` or `meta.updatedAt`.
///
/// Each dot-separated segment must be an identifier.
pub fn validate_key_path(path: &str) -> ValidationResult<()> {
    if path.is_empty() {
        return Err(ValidationError::Required {
            field: "key_path".to_string(),
        });
    }

    if path.split('.').all(is_identifier) {
        Ok(())
    } else {
        Err(ValidationError::InvalidFormat {
            field: "key_path".to_string(),
            reason: format!("'{}' must be dot-separated identifiers", path),
        })
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name_rules() {
        assert!(validate_event_name("notification:read").is_ok());
        assert!(matches!(
            validate_event_name("   "),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_event_name(&"x".repeat(MAX_EVENT_NAME_LEN + 1)),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_collection_name_rules() {
        assert!(validate_collection_name("operations").is_ok());
        assert!(validate_collection_name("chat_messages2").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("2fast").is_err());
        assert!(validate_collection_name("ops; DROP TABLE x").is_err());
        assert!(validate_collection_name("_meta").is_err());
    }

    #[test]
    fn test_key_path_rules() {
        assert!(validate_key_path("timestamp").is_ok());
        assert!(validate_key_path("meta.updatedAt").is_ok());
        assert!(validate_key_path("meta..x").is_err());
        assert!(validate_key_path("$.x").is_err());
        assert!(validate_key_path("").is_err());
    }
}
