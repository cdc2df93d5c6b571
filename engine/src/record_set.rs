//! Versioned record sets: the persisted form of a record collection.
//!
//! A set carries the schema version its items conform to plus the history of
//! migrations that brought it there. Items are kept as raw JSON so that
//! migrations can reshape them freely; [`VersionedRecordSet::records`] parses
//! them into [`Record`]s on demand.

use crate::{error::Result, Error, Record, SchemaVersion, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One completed `migrate()` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub from_version: SchemaVersion,
    pub to_version: SchemaVersion,
    pub timestamp: Timestamp,
    /// Number of items after the migration
    pub item_count: usize,
    /// Wall time spent in transforms, milliseconds
    pub duration: u64,
}

/// A record collection tagged with its schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedRecordSet {
    pub items: Vec<Value>,
    pub version: SchemaVersion,
    #[serde(default)]
    pub migration_history: Vec<MigrationRecord>,
}

impl VersionedRecordSet {
    /// Create a set at `version` with no history.
    pub fn new(items: Vec<Value>, version: SchemaVersion) -> Self {
        Self {
            items,
            version,
            migration_history: Vec::new(),
        }
    }

    /// Build a set from typed records.
    pub fn from_records(records: &[Record], version: SchemaVersion) -> Self {
        Self::new(records.iter().map(Record::to_value).collect(), version)
    }

    /// Interpret any stored JSON as a record set.
    ///
    /// A bare array is an unversioned (version 1) set; `null` is an empty one.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::new(Vec::new(), 1)),
            Value::Array(items) => Ok(Self::new(items, 1)),
            value @ Value::Object(_) => serde_json::from_value(value)
                .map_err(|e| Error::InvalidRecordSet(e.to_string())),
            other => Err(Error::InvalidRecordSet(format!(
                "expected an array or object, got {other}"
            ))),
        }
    }

    /// Parse from a stored JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| Error::InvalidRecordSet(e.to_string()))?;
        Self::from_value(value)
    }

    /// Serialize for storage.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidRecordSet(e.to_string()))
    }

    /// Parse all items as records.
    pub fn records(&self) -> Result<Vec<Record>> {
        self.items.iter().cloned().map(Record::from_value).collect()
    }

    /// Number of items flagged as needing sync.
    pub fn pending_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.get("_needsSync").and_then(Value::as_bool) == Some(true))
            .count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
