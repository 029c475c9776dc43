use std::sync::Arc;

use chrono::{DateTime, Utc};
use contentgrid_storage::ContentItem;
use serde::Serialize;
use uuid::Uuid;

use super::event::{PublishEvent, TraceMetadata};
use super::log::EventLog;
use super::{IngestError, stream_name};
use crate::shard::ShardRouter;

/// What a caller gets back once an event is durably appended.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReceipt {
    pub id: Uuid,
    pub region: String,
    pub shard: String,
    pub stream: String,
    pub entry_id: String,
    pub published_at: DateTime<Utc>,
}

/// Appends publish events to the per-shard streams.
#[derive(Clone)]
pub struct Publisher {
    router: ShardRouter,
    log: Arc<dyn EventLog>,
    stream_prefix: String,
}

impl Publisher {
    pub fn new(router: ShardRouter, log: Arc<dyn EventLog>, stream_prefix: impl Into<String>) -> Self {
        Self {
            router,
            log,
            stream_prefix: stream_prefix.into(),
        }
    }

    /// Routes the region, builds a new event carrying the current trace
    /// context and appends it to the shard's stream.
    #[tracing::instrument(skip(self, title, body), fields(shard))]
    pub async fn publish(
        &self,
        region: &str,
        title: &str,
        body: &str,
    ) -> Result<PublishReceipt, IngestError> {
        let resolved = self.router.resolve(region)?;
        tracing::Span::current().record("shard", resolved.shard.as_str());

        let item = ContentItem::new(&resolved.region, title, body);
        let event = PublishEvent::new(&item, TraceMetadata::capture());
        let payload = event.encode()?;

        let stream = stream_name(&self.stream_prefix, &resolved.shard);
        let entry_id = self.log.append(&stream, &payload).await?;
        tracing::info!(id = %item.id, stream = %stream, entry_id = %entry_id, "Publish event appended");

        Ok(PublishReceipt {
            id: item.id,
            region: resolved.region,
            shard: resolved.shard,
            stream,
            entry_id,
            published_at: item.published_at,
        })
    }
}
