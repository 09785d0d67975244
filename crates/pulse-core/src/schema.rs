//! # Storage Schema
//!
//! Declarative description of the persistent collections.
//!
//! ## Default Collections
//! ```text
//! ┌───────────────┬──────────┬──────────────────────────────────────────┐
//! │ collection    │ key path │ secondary indexes                        │
//! ├───────────────┼──────────┼──────────────────────────────────────────┤
//! │ operations    │ id       │ timestamp, event                         │
//! │ notifications │ id       │ timestamp, read, type                    │
//! │ conversations │ id       │ updatedAt                                │
//! │ messages      │ id       │ conversationId, timestamp                │
//! └───────────────┴──────────┴──────────────────────────────────────────┘
//! ```
//!
//! `operations` backs the offline queue. The other three are caches used by
//! feeds built on top of the client.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::validation::{validate_collection_name, validate_key_path, ValidationResult};

/// Collection holding queued offline operations.
pub const OPERATIONS_COLLECTION: &str = "operations";

/// Default database name.
pub const DEFAULT_DATABASE_NAME: &str = "pulse";

/// Current schema version. Bump when collections or indexes change.
pub const SCHEMA_VERSION: u32 = 1;

// =============================================================================
// Schema Types
// =============================================================================

/// A secondary index over a JSON key path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub key_path: String,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSchema {
    /// Non-unique index named after its key path.
    pub fn on(key_path: impl Into<String>) -> Self {
        let key_path = key_path.into();
        IndexSchema {
            name: key_path.clone(),
            key_path,
            unique: false,
        }
    }

    /// Marks the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A keyed collection of JSON records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    /// Field holding the primary key of each record.
    pub key_path: String,
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        CollectionSchema {
            name: name.into(),
            key_path: key_path.into(),
            indexes: Vec::new(),
        }
    }

    /// Adds a secondary index.
    pub fn index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    /// Looks up an index by name.
    pub fn find_index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// The full database description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSchema {
    pub name: String,
    pub version: u32,
    pub collections: Vec<CollectionSchema>,
}

impl Default for StorageSchema {
    fn default() -> Self {
        StorageSchema {
            name: DEFAULT_DATABASE_NAME.to_string(),
            version: SCHEMA_VERSION,
            collections: default_collections(),
        }
    }
}

impl StorageSchema {
    /// Looks up a collection by name.
    pub fn collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Checks every identifier and rejects duplicate collections.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.version == 0 {
            return Err(ValidationError::OutOfRange {
                field: "version".to_string(),
                min: 1,
                max: u32::MAX as u64,
            });
        }

        for (i, collection) in self.collections.iter().enumerate() {
            validate_collection_name(&collection.name)?;
            validate_key_path(&collection.key_path)?;
            for index in &collection.indexes {
                validate_collection_name(&index.name)?;
                validate_key_path(&index.key_path)?;
            }

            if self.collections[..i].iter().any(|c| c.name == collection.name) {
                return Err(ValidationError::InvalidFormat {
                    field: "collections".to_string(),
                    reason: format!("duplicate collection '{}'", collection.name),
                });
            }
        }

        Ok(())
    }
}

/// The collections every client provisions.
pub fn default_collections() -> Vec<CollectionSchema> {
    vec![
        CollectionSchema::new(OPERATIONS_COLLECTION, "id")
            .index(IndexSchema::on("timestamp"))
            .index(IndexSchema::on("event")),
        CollectionSchema::new("notifications", "id")
            .index(IndexSchema::on("timestamp"))
            .index(IndexSchema::on("read"))
            .index(IndexSchema::on("type")),
        CollectionSchema::new("conversations", "id").index(IndexSchema::on("updatedAt")),
        CollectionSchema::new("messages", "id")
            .index(IndexSchema::on("conversationId"))
            .index(IndexSchema::on("timestamp")),
    ]
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schema_is_valid() {
        let schema = StorageSchema::default();
        assert!(schema.validate().is_ok());
        assert_eq!(schema.collections.len(), 4);

        let ops = schema.collection(OPERATIONS_COLLECTION).unwrap();
        assert_eq!(ops.key_path, "id");
        assert!(ops.find_index("timestamp").is_some());
        assert!(ops.find_index("event").is_some());
    }

    #[test]
    fn test_duplicate_collection_rejected() {
        let mut schema = StorageSchema::default();
        schema.collections.push(CollectionSchema::new("messages", "id"));
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_bad_index_path_rejected() {
        let schema = StorageSchema {
            name: "t".into(),
            version: 1,
            collections: vec![CollectionSchema::new("items", "id").index(IndexSchema {
                name: "evil".into(),
                key_path: "a'); DROP".into(),
                unique: false,
            })],
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_zero_version_rejected() {
        let schema = StorageSchema {
            version: 0,
            ..Default::default()
        };
        assert!(schema.validate().is_err());
    }
}
