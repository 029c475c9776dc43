//! Redis Streams implementation of [`EventLog`].
//!
//! Commands: `XGROUP CREATE .. MKSTREAM`, `XADD`, `XREADGROUP`,
//! `XAUTOCLAIM` (Redis 6.2+) and `XACK`.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply,
};

use super::event::PAYLOAD_FIELD;
use super::log::{EventLog, EventLogError, LogEntry};

/// Reply code Redis uses when the group already exists.
const BUSYGROUP: &str = "BUSYGROUP";

#[derive(Clone)]
pub struct RedisEventLog {
    pool: Pool,
}

impl RedisEventLog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        id: &str,
        count: usize,
    ) -> Result<Vec<LogEntry>, EventLogError> {
        let mut conn = self.pool.get().await?;
        let opts = StreamReadOptions::default().group(group, consumer).count(count);
        // Nil when nothing is available.
        let reply: Option<StreamReadReply> = conn.xread_options(&[stream], &[id], &opts).await?;

        Ok(reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .map(to_entry)
            .collect())
    }
}

fn to_entry(id: StreamId) -> LogEntry {
    LogEntry {
        payload: id.get::<String>(PAYLOAD_FIELD),
        id: id.id,
    }
}

#[async_trait]
impl EventLog for RedisEventLog {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), EventLogError> {
        let mut conn = self.pool.get().await?;
        let created: Result<(), redis::RedisError> =
            conn.xgroup_create_mkstream(stream, group, "0").await;
        match created {
            Ok(()) => {
                tracing::info!(stream, group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some(BUSYGROUP) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn append(&self, stream: &str, payload: &str) -> Result<String, EventLogError> {
        let mut conn = self.pool.get().await?;
        let id: String = conn.xadd(stream, "*", &[(PAYLOAD_FIELD, payload)]).await?;
        Ok(id)
    }

    async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<LogEntry>, EventLogError> {
        self.read_group(stream, group, consumer, ">", count).await
    }

    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        after: &str,
        count: usize,
    ) -> Result<Vec<LogEntry>, EventLogError> {
        // Any explicit id reads this consumer's pending entries after it.
        self.read_group(stream, group, consumer, after, count).await
    }

    async fn reclaim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<LogEntry>, EventLogError> {
        let mut conn = self.pool.get().await?;
        let opts = StreamAutoClaimOptions::default().count(count);
        let min_idle_ms = min_idle.as_millis() as u64;
        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(stream, group, consumer, min_idle_ms, "0-0", opts)
            .await?;
        Ok(reply.claimed.into_iter().map(to_entry).collect())
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), EventLogError> {
        let mut conn = self.pool.get().await?;
        let _: usize = conn.xack(stream, group, &[id]).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
