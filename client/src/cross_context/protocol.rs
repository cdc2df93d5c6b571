//! Change notification wire format shared between contexts.
//!
//! Messages are JSON-encoded with camelCase field names:
//! `{"type": "update" | "remove" | "clear", "originId": "...", "items": [...]}`.

use ferry_engine::Record;
use serde::{Deserialize, Serialize};

/// Kind of local mutation being announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Update,
    Remove,
    Clear,
}

/// A mutation announced by one context to its siblings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Identity of the publishing context
    pub origin_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Record>>,
}

impl ChangeNotification {
    pub fn update(origin_id: impl Into<String>, items: Vec<Record>) -> Self {
        Self {
            kind: ChangeKind::Update,
            origin_id: origin_id.into(),
            items: Some(items),
        }
    }

    pub fn remove(origin_id: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Remove,
            origin_id: origin_id.into(),
            items: None,
        }
    }

    pub fn clear(origin_id: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Clear,
            origin_id: origin_id.into(),
            items: None,
        }
    }
}
