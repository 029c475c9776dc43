//! Asynchronous publish pipeline.
//!
//! A [`Publisher`] appends versioned [`PublishEvent`]s to one durable stream
//! per shard key (`<prefix>:<shard>`). The [`IngestWorker`] consumes every
//! stream through a single consumer group, writes items into their shard,
//! warms the caches and only then acknowledges. Anything it cannot finish
//! stays pending for redelivery.

pub mod event;
pub mod log;
pub mod producer;
pub mod redis_log;
pub mod worker;

pub use event::{EVENT_VERSION, PayloadError, PublishEvent, TraceMetadata};
pub use log::{EventLog, EventLogError, LogEntry, MemoryEventLog};
pub use producer::{PublishReceipt, Publisher};
pub use redis_log::RedisEventLog;
pub use worker::IngestWorker;

use contentgrid_storage::StorageError;

use crate::cache::CacheError;
use crate::shard::ConfigurationError;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Log(#[from] EventLogError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cache warm failed: {0}")]
    Cache(#[from] CacheError),
}

/// Stream holding a shard's publish events.
pub fn stream_name(prefix: &str, shard: &str) -> String {
    format!("{prefix}:{shard}")
}
