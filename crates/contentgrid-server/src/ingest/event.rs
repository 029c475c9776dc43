//! Versioned publish event carried in the `payload` field of a log entry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use contentgrid_storage::ContentItem;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::observability;

/// The only event version this build reads or writes.
pub const EVENT_VERSION: u32 = 1;

/// Log entry field that holds the encoded event.
pub const PAYLOAD_FIELD: &str = "payload";

/// A log entry whose payload cannot be turned into an event.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("log entry has no '{PAYLOAD_FIELD}' field")]
    Missing,

    #[error("malformed publish event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported publish event version {found} (expected {EVENT_VERSION})")]
    UnsupportedVersion { found: u32 },
}

/// W3C trace context of the publishing request. Empty strings mean the
/// publisher had no active trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceMetadata {
    pub traceparent: String,
    pub tracestate: String,
}

impl TraceMetadata {
    /// Captures the current span's context.
    pub fn capture() -> Self {
        let mut headers = observability::current_trace_headers();
        Self {
            traceparent: headers.remove("traceparent").unwrap_or_default(),
            tracestate: headers.remove("tracestate").unwrap_or_default(),
        }
    }

    /// Remote parent context for the consumer's span. Invalid or empty
    /// metadata yields an empty context (the span becomes a new root).
    pub fn parent_context(&self) -> opentelemetry::Context {
        let mut carrier = HashMap::new();
        if !self.traceparent.is_empty() {
            carrier.insert("traceparent".to_string(), self.traceparent.clone());
        }
        if !self.tracestate.is_empty() {
            carrier.insert("tracestate".to_string(), self.tracestate.clone());
        }
        observability::context_from_headers(&carrier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishEvent {
    pub version: u32,
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub region: String,
    pub published_at: DateTime<Utc>,
    pub trace: TraceMetadata,
}

impl PublishEvent {
    pub fn new(item: &ContentItem, trace: TraceMetadata) -> Self {
        Self {
            version: EVENT_VERSION,
            id: item.id,
            title: item.title.clone(),
            body: item.body.clone(),
            region: item.region.clone(),
            published_at: item.published_at,
            trace,
        }
    }

    pub fn encode(&self) -> Result<String, PayloadError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Strict decode: unknown fields, missing fields and other versions are
    /// all rejected.
    pub fn decode(raw: &str) -> Result<Self, PayloadError> {
        let event: Self = serde_json::from_str(raw)?;
        if event.version != EVENT_VERSION {
            return Err(PayloadError::UnsupportedVersion {
                found: event.version,
            });
        }
        Ok(event)
    }

    pub fn to_item(&self) -> ContentItem {
        ContentItem {
            id: self.id,
            title: self.title.clone(),
            body: self.body.clone(),
            region: self.region.clone(),
            published_at: self.published_at,
        }
    }
}
