//! Remote endpoint collaborator and its wire protocol.
//!
//! Single-item delivery POSTs the record (fields + metadata) to the endpoint.
//! The reply is either `{success, item?}` or the remote's version of the item
//! itself. Batch delivery POSTs `{items: [...]}` and expects
//! `{results: [{success, itemId, error?} | {success, item}]}`.
//! Any non-2xx status is a transport failure for every item in the request.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use ferry_engine::{id_key, Record, RecordId};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SyncConfig;
use crate::error::{Error, Result};

/// Network or server failure for a whole request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server responded with status {0}")]
    Status(u16),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// The remote's answer to a single-item delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryResponse {
    /// `{success: true}`, optionally echoing the remote's copy of the item
    Accepted { item: Option<Record> },
    /// `{success: false}`
    Rejected { error: Option<String> },
    /// The body is the remote's version of the item
    Returned(Record),
}

impl DeliveryResponse {
    /// Interpret a 2xx response body.
    pub fn from_body(body: Value) -> std::result::Result<Self, TransportError> {
        let Some(obj) = body.as_object() else {
            return Err(TransportError::InvalidResponse(format!(
                "expected an object, got {body}"
            )));
        };

        match obj.get("success").and_then(Value::as_bool) {
            Some(true) => {
                let item = match obj.get("item") {
                    Some(item) if !item.is_null() => Some(parse_record(item.clone())?),
                    _ => None,
                };
                Ok(DeliveryResponse::Accepted { item })
            }
            Some(false) => Ok(DeliveryResponse::Rejected {
                error: obj.get("error").and_then(Value::as_str).map(str::to_string),
            }),
            None => Ok(DeliveryResponse::Returned(parse_record(body)?)),
        }
    }
}

fn parse_record(value: Value) -> std::result::Result<Record, TransportError> {
    Record::from_value(value).map_err(|e| TransportError::InvalidResponse(e.to_string()))
}

/// Per-item outcome inside a batch response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItemResult {
    /// The record this result refers to, from `itemId` or the inline item.
    pub fn record_id(&self) -> Option<RecordId> {
        match self.item_id.as_ref().and_then(id_key) {
            Some(id) => Some(id),
            None => self.item.as_ref().map(|item| item.id.clone()),
        }
    }
}

/// Body of a batch delivery response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub results: Vec<BatchItemResult>,
}

/// The wire form of a record: fields and metadata, without local sync flags.
pub fn wire_value(record: &Record) -> Value {
    let mut record = record.clone();
    record.needs_sync = false;
    record.to_value()
}

/// Delivers records to the remote authority.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    async fn deliver(&self, record: &Record) -> std::result::Result<DeliveryResponse, TransportError>;

    async fn deliver_batch(
        &self,
        records: &[Record],
    ) -> std::result::Result<BatchResponse, TransportError>;
}

/// HTTP implementation of [`RemoteEndpoint`].
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRemote {
    pub fn new(
        endpoint: impl Into<String>,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(Error::Config("sync endpoint is required".into()));
        }

        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::Config(format!("invalid header name: {name}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| Error::Config(format!("invalid value for header {name}")))?;
            header_map.insert(header, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, endpoint })
    }

    /// Build from a sync configuration.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(config.endpoint.clone(), &config.headers, config.timeout)
    }

    async fn post(&self, body: &Value) -> std::result::Result<Value, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(endpoint = %self.endpoint, status = status.as_u16(), "Delivery rejected");
            return Err(TransportError::Status(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl RemoteEndpoint for HttpRemote {
    async fn deliver(&self, record: &Record) -> std::result::Result<DeliveryResponse, TransportError> {
        let body = self.post(&wire_value(record)).await?;
        DeliveryResponse::from_body(body)
    }

    async fn deliver_batch(
        &self,
        records: &[Record],
    ) -> std::result::Result<BatchResponse, TransportError> {
        let items: Vec<Value> = records.iter().map(wire_value).collect();
        let body = self.post(&serde_json::json!({ "items": items })).await?;
        serde_json::from_value(body).map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }
}
