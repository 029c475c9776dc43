//! Ingest worker: the consumer side of the publish pipeline.
//!
//! One looping task per process. Entries are acknowledged only after the
//! item is stored and the caches are warm, so a crash at any earlier point
//! leaves the entry pending. On restart the worker replays its own pending
//! entries; entries abandoned by a consumer that never comes back are
//! reclaimed once they have been idle for `reclaim_idle_ms`.

use std::sync::Arc;

use futures_util::future::try_join_all;
use tokio::sync::watch;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::event::{PayloadError, PublishEvent};
use super::log::{EventLog, LogEntry};
use super::{IngestError, stream_name};
use crate::cache::{Caches, warm};
use crate::config::{DuplicatePolicy, IngestConfig};
use crate::shard::ShardSet;

/// What happened to one claimed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Acknowledged,
    LeftPending,
}

pub struct IngestWorker {
    shards: ShardSet,
    caches: Caches,
    log: Arc<dyn EventLog>,
    config: IngestConfig,
    streams: Vec<String>,
}

impl IngestWorker {
    pub fn new(shards: ShardSet, caches: Caches, log: Arc<dyn EventLog>, config: IngestConfig) -> Self {
        let streams = shards
            .router()
            .shard_keys()
            .iter()
            .map(|shard| stream_name(&config.stream_prefix, shard))
            .collect();
        Self {
            shards,
            caches,
            log,
            config,
            streams,
        }
    }

    /// Streams this worker consumes, one per shard key.
    pub fn streams(&self) -> &[String] {
        &self.streams
    }

    /// Runs until the shutdown channel flips to `true` or closes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            consumer = %self.config.consumer_name,
            group = %self.config.group,
            streams = self.streams.len(),
            log = self.log.backend_name(),
            "Starting ingest worker"
        );

        // Group creation is retried until it works: nothing can be read before.
        while let Err(e) = self.ensure_groups().await {
            tracing::error!(error = %e, "Failed to create consumer groups");
            if wait_or_shutdown(&mut shutdown, self.config.idle_sleep()).await {
                return;
            }
        }

        let replayed = self.replay_pending(&shutdown).await;
        if replayed > 0 {
            tracing::info!(replayed, "Replayed pending entries from a previous run");
        }

        let mut start = 0;
        loop {
            if is_shutdown(&shutdown) {
                break;
            }

            let claimed = self.round(start, &shutdown).await;
            start = start.wrapping_add(1);

            if claimed == 0 && wait_or_shutdown(&mut shutdown, self.config.idle_sleep()).await {
                break;
            }
        }

        tracing::info!("Ingest worker shutting down");
    }

    async fn ensure_groups(&self) -> Result<(), IngestError> {
        try_join_all(
            self.streams
                .iter()
                .map(|stream| self.log.ensure_group(stream, &self.config.group)),
        )
        .await?;
        Ok(())
    }

    /// Replays this consumer's own pending entries on every stream.
    /// Returns how many entries were processed.
    async fn replay_pending(&self, shutdown: &watch::Receiver<bool>) -> usize {
        let mut total = 0;
        for stream in &self.streams {
            let mut cursor = "0".to_string();
            loop {
                if is_shutdown(shutdown) {
                    return total;
                }
                let batch = match self
                    .log
                    .read_pending(
                        stream,
                        &self.config.group,
                        &self.config.consumer_name,
                        &cursor,
                        self.config.batch_size,
                    )
                    .await
                {
                    Ok(batch) => batch,
                    Err(e) => {
                        tracing::warn!(stream = %stream, error = %e, "Failed to read pending entries");
                        break;
                    }
                };
                let Some(last) = batch.last() else {
                    break;
                };
                cursor = last.id.clone();
                total += self.process_batch(stream, &batch, shutdown).await;
            }
        }
        total
    }

    /// One pass over every stream starting at `start`. Returns how many
    /// entries were claimed.
    async fn round(&self, start: usize, shutdown: &watch::Receiver<bool>) -> usize {
        let n = self.streams.len();
        let mut claimed = 0;
        for offset in 0..n {
            if is_shutdown(shutdown) {
                break;
            }
            let stream = &self.streams[(start + offset) % n];
            claimed += self.poll_stream(stream, shutdown).await;
        }
        claimed
    }

    async fn poll_stream(&self, stream: &str, shutdown: &watch::Receiver<bool>) -> usize {
        let group = &self.config.group;
        let consumer = &self.config.consumer_name;
        let count = self.config.batch_size;
        let mut claimed = 0;

        match self
            .log
            .reclaim_stale(stream, group, consumer, self.config.reclaim_idle(), count)
            .await
        {
            Ok(batch) if !batch.is_empty() => {
                tracing::info!(stream, reclaimed = batch.len(), "Reclaimed idle pending entries");
                claimed += batch.len();
                self.process_batch(stream, &batch, shutdown).await;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(stream, error = %e, "Failed to reclaim idle entries"),
        }

        match self.log.read_new(stream, group, consumer, count).await {
            Ok(batch) => {
                claimed += batch.len();
                self.process_batch(stream, &batch, shutdown).await;
            }
            Err(e) => tracing::warn!(stream, error = %e, "Failed to read new entries"),
        }

        claimed
    }

    /// Processes entries in order, stopping early on shutdown. Returns how
    /// many were looked at.
    async fn process_batch(
        &self,
        stream: &str,
        batch: &[LogEntry],
        shutdown: &watch::Receiver<bool>,
    ) -> usize {
        let mut seen = 0;
        let mut acked = 0;
        for entry in batch {
            if is_shutdown(shutdown) {
                break;
            }
            if self.process_entry(stream, entry).await == Outcome::Acknowledged {
                acked += 1;
            }
            seen += 1;
        }
        if seen > 0 {
            tracing::debug!(stream, seen, acked, "Batch processed");
        }
        seen
    }

    async fn process_entry(&self, stream: &str, entry: &LogEntry) -> Outcome {
        let event = match decode(entry) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(stream, entry_id = %entry.id, error = %e, "Undecodable publish event left pending");
                return Outcome::LeftPending;
            }
        };

        let span = tracing::info_span!(
            "ingest.entry",
            stream,
            entry_id = %entry.id,
            item_id = %event.id,
            region = %event.region,
        );
        span.set_parent(event.trace.parent_context());

        async {
            match self.ingest(stream, &entry.id, &event).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(error = %e, "Ingest failed, entry left pending");
                    Outcome::LeftPending
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn ingest(&self, stream: &str, entry_id: &str, event: &PublishEvent) -> Result<Outcome, IngestError> {
        let item = event.to_item();
        let (resolved, storage) = self.shards.storage_for(&item.region)?;

        match storage.insert_item(&item).await {
            Ok(()) => tracing::debug!(shard = %resolved.shard, "Item stored"),
            Err(e) if e.is_already_exists() => match self.config.duplicate_policy {
                DuplicatePolicy::Acknowledge => {
                    tracing::warn!(shard = %resolved.shard, "Item already stored, re-warming and acknowledging");
                }
                DuplicatePolicy::Skip => {
                    tracing::warn!(shard = %resolved.shard, "Item already stored, leaving entry pending");
                    return Ok(Outcome::LeftPending);
                }
            },
            Err(e) => return Err(e.into()),
        }

        warm::bounded(self.caches.warm_timeout, self.caches.lists.warm_item(&item)).await?;
        self.log.ack(stream, &self.config.group, entry_id).await?;
        tracing::info!("Publish event ingested");
        Ok(Outcome::Acknowledged)
    }
}

fn decode(entry: &LogEntry) -> Result<PublishEvent, PayloadError> {
    let raw = entry.payload.as_deref().ok_or(PayloadError::Missing)?;
    PublishEvent::decode(raw)
}

fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Sleeps for `period` unless shutdown is signalled first. Returns `true`
/// when the worker should stop.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, period: std::time::Duration) -> bool {
    tokio::select! {
        biased;

        result = shutdown.changed() => match result {
            Ok(()) => *shutdown.borrow(),
            // Sender dropped: the server is going away.
            Err(_) => true,
        },
        _ = tokio::time::sleep(period) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheBackend;
    use crate::config::CacheConfig;
    use crate::ingest::event::TraceMetadata;
    use crate::ingest::log::MemoryEventLog;
    use crate::shard::ShardRouter;
    use contentgrid_db_memory::InMemoryStorage;
    use contentgrid_storage::{ContentItem, ContentStorage, DynStorage};
    use std::collections::HashMap;
    use std::time::Duration;

    struct Fixture {
        worker: IngestWorker,
        log: Arc<MemoryEventLog>,
        memory: Arc<InMemoryStorage>,
        caches: Caches,
    }

    fn fixture(policy: DuplicatePolicy) -> Fixture {
        let router = ShardRouter::new([("global", "memory://global")]);
        let memory = Arc::new(InMemoryStorage::new());
        let storage: DynStorage = memory.clone();
        let shards = ShardSet::new(router, HashMap::from([("memory://global".to_string(), storage)])).unwrap();
        let caches = Caches::new(CacheBackend::new_local(), &CacheConfig::default());
        let log = Arc::new(MemoryEventLog::new());
        let config = IngestConfig {
            duplicate_policy: policy,
            reclaim_idle_ms: 10,
            idle_sleep_ms: 5,
            ..IngestConfig::default()
        };
        let worker = IngestWorker::new(shards, caches.clone(), log.clone(), config);
        Fixture {
            worker,
            log,
            memory,
            caches,
        }
    }

    const STREAM: &str = "content:publish:global";
    const GROUP: &str = "content-ingest";

    async fn append(log: &MemoryEventLog, item: &ContentItem) {
        let payload = PublishEvent::new(item, TraceMetadata::default()).encode().unwrap();
        log.append(STREAM, &payload).await.unwrap();
    }

    fn open() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);
        rx
    }

    #[tokio::test]
    async fn test_round_stores_warms_and_acknowledges() {
        let fx = fixture(DuplicatePolicy::Acknowledge);
        fx.worker.ensure_groups().await.unwrap();
        let item = ContentItem::new("europe", "T", "B");
        append(&fx.log, &item).await;

        assert_eq!(fx.worker.round(0, &open()).await, 1);
        assert_eq!(fx.memory.get_item(item.id).await.unwrap(), Some(item.clone()));
        assert!(fx.caches.items.contains("europe", &item.id.to_string()).await.unwrap());
        assert_eq!(fx.caches.lists.len("europe").await.unwrap(), 1);
        assert_eq!(fx.log.pending_count(STREAM, GROUP), 0);
    }

    #[tokio::test]
    async fn test_undecodable_entry_stays_pending() {
        let fx = fixture(DuplicatePolicy::Acknowledge);
        fx.worker.ensure_groups().await.unwrap();
        fx.log.append(STREAM, "{\"version\":1}").await.unwrap();

        fx.worker.round(0, &open()).await;
        assert_eq!(fx.log.pending_count(STREAM, GROUP), 1);
    }

    #[tokio::test]
    async fn test_duplicate_policies() {
        for (policy, pending) in [(DuplicatePolicy::Acknowledge, 0), (DuplicatePolicy::Skip, 1)] {
            let fx = fixture(policy);
            fx.worker.ensure_groups().await.unwrap();
            let item = ContentItem::new("europe", "T", "B");
            fx.memory.insert_item(&item).await.unwrap();
            append(&fx.log, &item).await;

            fx.worker.round(0, &open()).await;
            assert_eq!(fx.log.pending_count(STREAM, GROUP), pending, "{policy:?}");
        }
    }

    #[tokio::test]
    async fn test_entry_abandoned_by_dead_consumer_is_reclaimed() {
        let fx = fixture(DuplicatePolicy::Acknowledge);
        fx.worker.ensure_groups().await.unwrap();
        let item = ContentItem::new("europe", "T", "B");
        append(&fx.log, &item).await;
        fx.log.read_new(STREAM, GROUP, "crashed", 10).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        fx.worker.round(0, &open()).await;
        assert!(fx.memory.get_item(item.id).await.unwrap().is_some());
        assert_eq!(fx.log.pending_count(STREAM, GROUP), 0);
    }

    #[tokio::test]
    async fn test_replay_processes_own_pending_entries() {
        let fx = fixture(DuplicatePolicy::Acknowledge);
        fx.worker.ensure_groups().await.unwrap();
        let item = ContentItem::new("europe", "T", "B");
        append(&fx.log, &item).await;
        // Claimed under our own name by a previous run that died before acking.
        fx.log.read_new(STREAM, GROUP, "contentgrid-ingest", 10).await.unwrap();

        assert_eq!(fx.worker.replay_pending(&open()).await, 1);
        assert!(fx.memory.get_item(item.id).await.unwrap().is_some());
        assert_eq!(fx.log.pending_count(STREAM, GROUP), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let fx = fixture(DuplicatePolicy::Acknowledge);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(fx.worker.run(rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
