//! Durable append log with consumer-group delivery.
//!
//! Entries move Pending → Claimed → Acknowledged. A claimed entry that is
//! never acknowledged stays in its group's pending list, where the owning
//! consumer can replay it after a restart and any consumer can reclaim it
//! once it has been idle long enough.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

/// One log entry as handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Log-assigned entry id, ordered within a stream
    pub id: String,
    /// The `payload` field, if the entry has one
    pub payload: Option<String>,
}

/// Log failures. Transient; the worker logs them and retries next round.
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("log connection unavailable: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("log command failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("stream '{stream}' has no consumer group '{group}'")]
    NoGroup { stream: String, group: String },

    #[error("invalid entry id '{0}'")]
    InvalidId(String),
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Creates the stream and the group if either is missing. The group
    /// starts at the beginning of the stream so nothing appended before it
    /// existed is lost.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), EventLogError>;

    /// Appends a payload and returns the new entry id.
    async fn append(&self, stream: &str, payload: &str) -> Result<String, EventLogError>;

    /// Claims up to `count` never-delivered entries for `consumer`.
    async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<LogEntry>, EventLogError>;

    /// Re-reads `consumer`'s own unacknowledged entries with ids after
    /// `after` (`"0"` for all).
    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        after: &str,
        count: usize,
    ) -> Result<Vec<LogEntry>, EventLogError>;

    /// Transfers up to `count` entries idle for at least `min_idle` from
    /// any consumer to `consumer`.
    async fn reclaim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<LogEntry>, EventLogError>;

    /// Acknowledges an entry, removing it from the pending list.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), EventLogError>;

    /// Returns the name of this log backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct Group {
    last_delivered: u64,
    pending: BTreeMap<u64, PendingEntry>,
}

impl Group {
    /// Lowest sequence this group may still read: its oldest pending entry,
    /// or the next undelivered one.
    fn oldest_needed(&self) -> u64 {
        let next = self.last_delivered + 1;
        self.pending.keys().next().map_or(next, |seq| (*seq).min(next))
    }
}

#[derive(Debug, Default)]
struct Stream {
    entries: BTreeMap<u64, String>,
    groups: HashMap<String, Group>,
}

/// In-process log with the same group semantics as Redis Streams.
///
/// Used when Redis is disabled and by tests. Entry ids are `<seq>-0`.
/// Acknowledging drops every entry no group can still read, so memory is
/// bounded by the unconsumed backlog. A group created afterwards starts at
/// the oldest retained entry.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    streams: DashMap<String, Stream>,
    seq: AtomicU64,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unacknowledged entries in a group (all consumers).
    pub fn pending_count(&self, stream: &str, group: &str) -> usize {
        self.streams
            .get(stream)
            .and_then(|s| s.groups.get(group).map(|g| g.pending.len()))
            .unwrap_or(0)
    }

    /// Entries a stream still retains.
    pub fn len(&self, stream: &str) -> usize {
        self.streams.get(stream).map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }

    /// How many times a pending entry has been handed out, `None` once acked.
    pub fn delivery_count(&self, stream: &str, group: &str, id: &str) -> Option<u32> {
        let seq = Self::parse_id(id).ok()?;
        let s = self.streams.get(stream)?;
        s.groups.get(group)?.pending.get(&seq).map(|p| p.deliveries)
    }

    fn parse_id(id: &str) -> Result<u64, EventLogError> {
        id.split('-')
            .next()
            .and_then(|seq| seq.parse().ok())
            .ok_or_else(|| EventLogError::InvalidId(id.to_string()))
    }

    fn format_id(seq: u64) -> String {
        format!("{seq}-0")
    }

    fn with_group<R>(
        &self,
        stream: &str,
        group: &str,
        f: impl FnOnce(&BTreeMap<u64, String>, &mut Group) -> R,
    ) -> Result<R, EventLogError> {
        let no_group = || EventLogError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        };
        let mut s = self.streams.get_mut(stream).ok_or_else(no_group)?;
        let Stream { entries, groups } = &mut *s;
        let g = groups.get_mut(group).ok_or_else(no_group)?;
        Ok(f(entries, g))
    }
}

fn to_entry(entries: &BTreeMap<u64, String>, seq: u64) -> LogEntry {
    LogEntry {
        id: MemoryEventLog::format_id(seq),
        payload: entries.get(&seq).cloned(),
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), EventLogError> {
        self.streams
            .entry(stream.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn append(&self, stream: &str, payload: &str) -> Result<String, EventLogError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.streams
            .entry(stream.to_string())
            .or_default()
            .entries
            .insert(seq, payload.to_string());
        Ok(Self::format_id(seq))
    }

    async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<LogEntry>, EventLogError> {
        self.with_group(stream, group, |entries, g| {
            let fresh: Vec<u64> = entries
                .range(g.last_delivered + 1..)
                .take(count)
                .map(|(seq, _)| *seq)
                .collect();
            for seq in &fresh {
                g.last_delivered = *seq;
                g.pending.insert(
                    *seq,
                    PendingEntry {
                        consumer: consumer.to_string(),
                        delivered_at: Instant::now(),
                        deliveries: 1,
                    },
                );
            }
            fresh.into_iter().map(|seq| to_entry(entries, seq)).collect()
        })
    }

    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        after: &str,
        count: usize,
    ) -> Result<Vec<LogEntry>, EventLogError> {
        let after = Self::parse_id(after)?;
        self.with_group(stream, group, |entries, g| {
            let mut out = Vec::new();
            for (seq, pending) in g.pending.range_mut(after + 1..) {
                if out.len() == count {
                    break;
                }
                if pending.consumer == consumer {
                    pending.delivered_at = Instant::now();
                    pending.deliveries += 1;
                    out.push(to_entry(entries, *seq));
                }
            }
            out
        })
    }

    async fn reclaim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<LogEntry>, EventLogError> {
        self.with_group(stream, group, |entries, g| {
            let mut out = Vec::new();
            for (seq, pending) in g.pending.iter_mut() {
                if out.len() == count {
                    break;
                }
                if pending.delivered_at.elapsed() >= min_idle {
                    pending.consumer = consumer.to_string();
                    pending.delivered_at = Instant::now();
                    pending.deliveries += 1;
                    out.push(to_entry(entries, *seq));
                }
            }
            out
        })
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), EventLogError> {
        let seq = Self::parse_id(id)?;
        let no_group = || EventLogError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        };
        let mut s = self.streams.get_mut(stream).ok_or_else(no_group)?;
        let Stream { entries, groups } = &mut *s;
        groups.get_mut(group).ok_or_else(no_group)?.pending.remove(&seq);

        if let Some(floor) = groups.values().map(Group::oldest_needed).min() {
            *entries = entries.split_off(&floor);
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "content:publish:europe";
    const GROUP: &str = "ingest";

    #[tokio::test]
    async fn test_group_sees_entries_appended_before_it_existed() {
        let log = MemoryEventLog::new();
        log.append(STREAM, "a").await.unwrap();
        log.ensure_group(STREAM, GROUP).await.unwrap();
        log.ensure_group(STREAM, GROUP).await.unwrap();

        let entries = log.read_new(STREAM, GROUP, "c1", 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload.as_deref(), Some("a"));
        assert!(log.read_new(STREAM, GROUP, "c1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_without_group_fails() {
        let log = MemoryEventLog::new();
        let err = log.read_new(STREAM, GROUP, "c1", 1).await.unwrap_err();
        assert!(matches!(err, EventLogError::NoGroup { .. }));
    }

    #[tokio::test]
    async fn test_unacked_entries_replay_for_owner_only() {
        let log = MemoryEventLog::new();
        log.ensure_group(STREAM, GROUP).await.unwrap();
        let first = log.append(STREAM, "a").await.unwrap();
        log.append(STREAM, "b").await.unwrap();

        let claimed = log.read_new(STREAM, GROUP, "c1", 10).await.unwrap();
        assert_eq!(claimed.len(), 2);
        log.ack(STREAM, GROUP, &first).await.unwrap();

        let replay = log.read_pending(STREAM, GROUP, "c1", "0", 10).await.unwrap();
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].payload.as_deref(), Some("b"));

        // Cursor moves past what was already replayed.
        let after = log
            .read_pending(STREAM, GROUP, "c1", &replay[0].id, 10)
            .await
            .unwrap();
        assert!(after.is_empty());
        assert!(log.read_pending(STREAM, GROUP, "c2", "0", 10).await.unwrap().is_empty());
        assert_eq!(log.pending_count(STREAM, GROUP), 1);
    }

    #[tokio::test]
    async fn test_reclaim_stale_transfers_ownership() {
        let log = MemoryEventLog::new();
        log.ensure_group(STREAM, GROUP).await.unwrap();
        log.append(STREAM, "a").await.unwrap();
        log.read_new(STREAM, GROUP, "dead", 10).await.unwrap();

        let too_soon = log
            .reclaim_stale(STREAM, GROUP, "alive", Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert!(too_soon.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let reclaimed = log
            .reclaim_stale(STREAM, GROUP, "alive", Duration::from_millis(10), 10)
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(log.delivery_count(STREAM, GROUP, &reclaimed[0].id), Some(2));
        assert_eq!(
            log.read_pending(STREAM, GROUP, "alive", "0", 10).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_acked_entries_are_released() {
        let log = MemoryEventLog::new();
        log.ensure_group(STREAM, GROUP).await.unwrap();
        for i in 0..1000 {
            log.append(STREAM, &format!("payload {i}")).await.unwrap();
        }

        let claimed = log.read_new(STREAM, GROUP, "c1", 1000).await.unwrap();
        assert_eq!(claimed.len(), 1000);
        // Still pending: nothing can go yet.
        assert_eq!(log.len(STREAM), 1000);

        for entry in &claimed[1..] {
            log.ack(STREAM, GROUP, &entry.id).await.unwrap();
        }
        // The oldest entry is still pending, so nothing is released yet.
        assert_eq!(log.len(STREAM), 1000);
        log.ack(STREAM, GROUP, &claimed[0].id).await.unwrap();

        assert_eq!(log.pending_count(STREAM, GROUP), 0);
        assert!(log.is_empty(STREAM));
    }

    #[tokio::test]
    async fn test_entries_are_kept_for_the_slowest_group() {
        let log = MemoryEventLog::new();
        log.ensure_group(STREAM, GROUP).await.unwrap();
        log.ensure_group(STREAM, "audit").await.unwrap();
        let id = log.append(STREAM, "a").await.unwrap();
        log.append(STREAM, "b").await.unwrap();

        for entry in log.read_new(STREAM, GROUP, "c1", 10).await.unwrap() {
            log.ack(STREAM, GROUP, &entry.id).await.unwrap();
        }
        assert_eq!(log.len(STREAM), 2);

        let audit = log.read_new(STREAM, "audit", "c1", 1).await.unwrap();
        assert_eq!(audit[0].id, id);
        log.ack(STREAM, "audit", &id).await.unwrap();
        assert_eq!(log.len(STREAM), 1);

        let rest = log.read_new(STREAM, "audit", "c1", 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].payload.as_deref(), Some("b"));
    }
}
