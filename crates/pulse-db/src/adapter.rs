//! # Storage Adapter
//!
//! The seam between `StorageManager` and a concrete backend.
//!
//! ```text
//! StorageManager ──► dyn StorageAdapter ──┬──► SqliteAdapter (sqlx)
//!                                         └──► MemoryAdapter (tests, ephemeral)
//! ```
//!
//! Adapters deal in raw JSON records and string keys. Typed access, key
//! extraction and schema checks live in the manager.

use std::cmp::Ordering;

use async_trait::async_trait;
use pulse_core::StorageSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageResult;

// =============================================================================
// Adapter Trait
// =============================================================================

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Short backend name for diagnostics.
    fn backend(&self) -> &'static str;

    /// Opens the store and provisions collections when the schema is new or
    /// its version was bumped.
    async fn open(&self, schema: &StorageSchema) -> StorageResult<()>;

    async fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Value>>;

    /// Inserts or replaces the record stored under `key`.
    async fn put(&self, collection: &str, key: &str, value: &Value) -> StorageResult<()>;

    /// Removes a record. Missing keys are not an error.
    async fn delete(&self, collection: &str, key: &str) -> StorageResult<()>;

    /// Range query over the primary key, or over `options.index` when set.
    /// `index_path` is the resolved key path of that index.
    async fn query(
        &self,
        collection: &str,
        index_path: Option<&str>,
        options: &QueryOptions,
    ) -> StorageResult<Vec<Value>>;

    async fn clear(&self, collection: &str) -> StorageResult<()>;

    async fn count(&self, collection: &str) -> StorageResult<u64>;

    async fn usage(&self) -> StorageResult<StorageUsage>;

    async fn close(&self);
}

/// Bytes used and, when the backend knows it, the quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageUsage {
    pub used_bytes: u64,
    pub quota_bytes: Option<u64>,
}

// =============================================================================
// Query Options
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Bounds on the queried key (primary key or index value).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KeyRange {
    pub lower: Option<Value>,
    pub upper: Option<Value>,
    #[serde(default)]
    pub lower_open: bool,
    #[serde(default)]
    pub upper_open: bool,
}

impl KeyRange {
    /// Exactly `value`.
    pub fn only(value: impl Into<Value>) -> Self {
        let value = value.into();
        KeyRange {
            lower: Some(value.clone()),
            upper: Some(value),
            ..Default::default()
        }
    }

    /// `lower <= key <= upper`.
    pub fn bound(lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
        KeyRange {
            lower: Some(lower.into()),
            upper: Some(upper.into()),
            ..Default::default()
        }
    }

    /// `key >= lower` (or `>` when `open`).
    pub fn lower_bound(lower: impl Into<Value>, open: bool) -> Self {
        KeyRange {
            lower: Some(lower.into()),
            lower_open: open,
            ..Default::default()
        }
    }

    /// `key <= upper` (or `<` when `open`).
    pub fn upper_bound(upper: impl Into<Value>, open: bool) -> Self {
        KeyRange {
            upper: Some(upper.into()),
            upper_open: open,
            ..Default::default()
        }
    }

    /// Returns true if `key` falls inside the range.
    pub fn contains(&self, key: &Value) -> bool {
        let above = match &self.lower {
            Some(lower) => match compare_json(key, lower) {
                Ordering::Greater => true,
                Ordering::Equal => !self.lower_open,
                Ordering::Less => false,
            },
            None => true,
        };
        let below = match &self.upper {
            Some(upper) => match compare_json(key, upper) {
                Ordering::Less => true,
                Ordering::Equal => !self.upper_open,
                Ordering::Greater => false,
            },
            None => true,
        };
        above && below
    }
}

/// Options for `get_many`.
///
/// ## Example
/// ```rust
/// use pulse_db::{Direction, KeyRange, QueryOptions};
///
/// let unread = QueryOptions::by_index("read").range(KeyRange::only(false)).limit(20);
/// let newest = QueryOptions::by_index("timestamp").direction(Direction::Descending);
/// # let _ = (unread, newest);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    pub limit: Option<usize>,
    pub index: Option<String>,
    pub range: Option<KeyRange>,
    #[serde(default)]
    pub direction: Direction,
}

impl QueryOptions {
    /// All records in primary key order.
    pub fn all() -> Self {
        Self::default()
    }

    /// Records ordered by a secondary index.
    pub fn by_index(index: impl Into<String>) -> Self {
        QueryOptions {
            index: Some(index.into()),
            ..Default::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn range(mut self, range: KeyRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// Reads the value at a dot-separated key path.
pub fn value_at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}

/// Turns a primary key value into its stored string form.
///
/// Only strings and integers are valid keys.
pub fn key_to_string(key: &Value) -> Option<String> {
    match key {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Total order over JSON scalars matching SQLite's comparison of
/// `json_extract` results: NULL < numbers (booleans as 0/1) < text.
/// Arrays and objects sort last, compared by their JSON text.
pub fn compare_json(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) | Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Array(_) | Value::Object(_) => 3,
        }
    }
    fn as_f64(v: &Value) -> f64 {
        match v {
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => match (a, b) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Array(_) | Value::Object(_), _) => a.to_string().cmp(&b.to_string()),
            _ => as_f64(a).total_cmp(&as_f64(b)),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_at_path() {
        let v = json!({"id": "a", "meta": {"updatedAt": 5}});
        assert_eq!(value_at_path(&v, "id"), Some(&json!("a")));
        assert_eq!(value_at_path(&v, "meta.updatedAt"), Some(&json!(5)));
        assert_eq!(value_at_path(&v, "meta.missing"), None);
    }

    #[test]
    fn test_key_to_string() {
        assert_eq!(key_to_string(&json!("op-1")), Some("op-1".to_string()));
        assert_eq!(key_to_string(&json!(42)), Some("42".to_string()));
        assert_eq!(key_to_string(&json!("")), None);
        assert_eq!(key_to_string(&json!(1.5)), None);
        assert_eq!(key_to_string(&json!(null)), None);
    }

    #[test]
    fn test_compare_json_ordering() {
        assert_eq!(compare_json(&json!(null), &json!(0)), Ordering::Less);
        assert_eq!(compare_json(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_json(&json!(false), &json!(1)), Ordering::Less);
        assert_eq!(compare_json(&json!(true), &json!(1)), Ordering::Equal);
        assert_eq!(compare_json(&json!(99), &json!("a")), Ordering::Less);
        assert_eq!(compare_json(&json!("b"), &json!("a")), Ordering::Greater);
    }

    #[test]
    fn test_key_range_contains() {
        let range = KeyRange::bound(10, 20);
        assert!(range.contains(&json!(10)));
        assert!(range.contains(&json!(20)));
        assert!(!range.contains(&json!(21)));

        let open = KeyRange::lower_bound(10, true);
        assert!(!open.contains(&json!(10)));
        assert!(open.contains(&json!(11)));

        assert!(KeyRange::only(false).contains(&json!(false)));
        assert!(!KeyRange::only(false).contains(&json!(true)));
    }
}
