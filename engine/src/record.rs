//! Record types for storing data.

use crate::{error::Result, Error, RecordId, Timestamp, Version};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Metadata associated with a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    /// When the record was first created
    pub created_at: Timestamp,
    /// When the record was last mutated locally
    pub updated_at: Timestamp,
    /// Version number, incremented on each local mutation
    #[serde(default = "initial_version")]
    pub version: Version,
}

fn initial_version() -> Version {
    1
}

impl RecordMetadata {
    /// Create metadata for a freshly created record.
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            created_at: timestamp,
            updated_at: timestamp,
            version: 1,
        }
    }

    /// Stamp a local mutation.
    ///
    /// `updated_at` never moves below `created_at`, even if the supplied clock
    /// reads earlier than the creation time.
    pub fn touch(&mut self, timestamp: Timestamp) {
        self.updated_at = timestamp.max(self.created_at);
        self.version += 1;
    }
}

/// A data record: application fields plus sync metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier (string or number on the wire)
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RecordId,
    /// Application-defined fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    /// Sync metadata; absent on records that were never stamped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RecordMetadata>,
    /// Local changes not yet confirmed by the remote
    #[serde(default, rename = "_needsSync", skip_serializing_if = "is_false")]
    pub needs_sync: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Canonical string form of a raw JSON id, if it is a string or number.
///
/// Stored items keep whatever id type the application wrote; this is only
/// used to compare ids.
pub fn id_key(id: &Value) -> Option<RecordId> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accept both `"id": "abc"` and `"id": 42`.
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<RecordId, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    id_key(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("record id must be a string or number, got {raw}"))
    })
}

impl Record {
    /// Create a new record with fresh metadata.
    pub fn new(id: impl Into<RecordId>, fields: Map<String, Value>, timestamp: Timestamp) -> Self {
        Self {
            id: id.into(),
            fields,
            metadata: Some(RecordMetadata::new(timestamp)),
            needs_sync: false,
        }
    }

    /// Parse a record from an arbitrary JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::InvalidRecord(e.to_string()))
    }

    /// Convert the record back into a JSON value.
    pub fn to_value(&self) -> Value {
        // Serialization of a map-backed struct cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Version of this record; unstamped records count as version 1.
    pub fn version(&self) -> Version {
        self.metadata.as_ref().map_or(1, |m| m.version)
    }

    /// Last local mutation time, if the record carries metadata.
    pub fn updated_at(&self) -> Option<Timestamp> {
        self.metadata.as_ref().map(|m| m.updated_at)
    }

    /// Record a local mutation: bump metadata and flag for sync.
    pub fn touch(&mut self, timestamp: Timestamp) {
        match self.metadata.as_mut() {
            Some(metadata) => metadata.touch(timestamp),
            None => self.metadata = Some(RecordMetadata::new(timestamp)),
        }
        self.needs_sync = true;
    }

    /// Whether `other` describes a different state of this record than we hold.
    ///
    /// Either a different version or a different `updated_at` counts.
    pub fn diverges_from(&self, other: &Record) -> bool {
        self.version() != other.version() || self.updated_at() != other.updated_at()
    }
}
