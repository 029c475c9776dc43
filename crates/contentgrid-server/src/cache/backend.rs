//! Cache store backend: Redis, or a local DashMap store with the same semantics.

use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Failures talking to the cache store. Always recoverable: callers fall
/// back to storage.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache connection unavailable: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("cache command failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache codec error: {0}")]
    Codec(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
}

/// A cached blob with TTL support.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Ordered set with Redis ZSET ordering: ascending score, ties broken by
/// member bytes.
#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => self.ordered.remove(&(score, member.to_string())),
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.scores.len()
    }

    fn range(&self, start: isize, stop: isize, reverse: bool) -> Vec<String> {
        let Some((from, to)) = rank_window(self.len(), start, stop) else {
            return Vec::new();
        };
        let take = to - from + 1;
        if reverse {
            self.ordered
                .iter()
                .rev()
                .skip(from)
                .take(take)
                .map(|(_, m)| m.clone())
                .collect()
        } else {
            self.ordered
                .iter()
                .skip(from)
                .take(take)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    fn remove_range(&mut self, start: isize, stop: isize) -> usize {
        let doomed = self.range(start, stop, false);
        for member in &doomed {
            self.remove(member);
        }
        doomed.len()
    }
}

/// Resolves a Redis rank window (inclusive, negative counts from the end)
/// against a set of `len` members.
fn rank_window(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// In-process store used when Redis is disabled or unreachable.
#[derive(Debug, Default)]
pub struct LocalStore {
    blobs: DashMap<String, CachedEntry>,
    sets: DashMap<String, SortedSet>,
}

/// Cache store handle.
///
/// ## Cache Modes
///
/// - **Local**: Single-instance mode using DashMap blobs and ordered sets
/// - **Redis**: Shared mode; every operation is one Redis command
///
/// Both modes expose the same primitives (`GET`, `SET EX`, `DEL`, `MGET`,
/// `ZADD`, `ZCARD`, `ZRANGE`, `ZREVRANGE`, `ZREMRANGEBYRANK`, `ZREM`) with
/// the same semantics, so the caches above never branch on the mode.
#[derive(Clone)]
pub enum CacheBackend {
    /// Single-instance: local DashMap only
    Local(Arc<LocalStore>),

    /// Multi-instance: Redis
    Redis(Pool),
}

impl CacheBackend {
    /// Create a new local-only cache backend.
    pub fn new_local() -> Self {
        CacheBackend::Local(Arc::new(LocalStore::default()))
    }

    /// Create a new Redis-backed cache backend.
    pub fn new_redis(redis_pool: Pool) -> Self {
        CacheBackend::Redis(redis_pool)
    }

    pub fn mode(&self) -> &'static str {
        match self {
            CacheBackend::Local(_) => "local",
            CacheBackend::Redis(_) => "redis",
        }
    }

    /// The Redis pool, when running in shared mode.
    pub fn redis_pool(&self) -> Option<&Pool> {
        match self {
            CacheBackend::Local(_) => None,
            CacheBackend::Redis(pool) => Some(pool),
        }
    }

    // ==================== Blobs ====================

    pub async fn get(&self, key: &str) -> Result<Option<Arc<Vec<u8>>>, CacheError> {
        match self {
            CacheBackend::Local(store) => {
                let hit = store.blobs.get(key).map(|e| e.value().clone());
                match hit {
                    Some(entry) if !entry.is_expired() => Ok(Some(entry.data)),
                    Some(_) => {
                        store.blobs.remove(key);
                        Ok(None)
                    }
                    None => Ok(None),
                }
            }
            CacheBackend::Redis(redis) => {
                let mut conn = redis.get().await?;
                let data: Option<Vec<u8>> = conn.get(key).await?;
                Ok(data.map(Arc::new))
            }
        }
    }

    /// Batch read; one slot per key, `None` for missing or expired keys.
    pub async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Arc<Vec<u8>>>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            CacheBackend::Local(store) => Ok(keys
                .iter()
                .map(|key| {
                    store
                        .blobs
                        .get(key)
                        .filter(|e| !e.is_expired())
                        .map(|e| Arc::clone(&e.data))
                })
                .collect()),
            CacheBackend::Redis(redis) => {
                let mut conn = redis.get().await?;
                let values: Vec<Option<Vec<u8>>> =
                    redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
                Ok(values.into_iter().map(|v| v.map(Arc::new)).collect())
            }
        }
    }

    pub async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        match self {
            CacheBackend::Local(store) => {
                store.blobs.insert(key.to_string(), CachedEntry::new(value, ttl));
                Ok(())
            }
            CacheBackend::Redis(redis) => {
                let mut conn = redis.get().await?;
                let ttl_secs = ttl.as_secs().max(1);
                conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
                Ok(())
            }
        }
    }

    pub async fn del(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        match self {
            CacheBackend::Local(store) => {
                for key in keys {
                    store.blobs.remove(key);
                }
                Ok(())
            }
            CacheBackend::Redis(redis) => {
                let mut conn = redis.get().await?;
                conn.del::<_, ()>(keys).await?;
                Ok(())
            }
        }
    }

    // ==================== Ordered sets ====================

    /// Adds or re-scores one member.
    pub async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), CacheError> {
        match self {
            CacheBackend::Local(store) => {
                store.sets.entry(key.to_string()).or_default().insert(member, score);
                Ok(())
            }
            CacheBackend::Redis(redis) => {
                let mut conn = redis.get().await?;
                conn.zadd::<_, _, _, ()>(key, member, score).await?;
                Ok(())
            }
        }
    }

    pub async fn zcard(&self, key: &str) -> Result<usize, CacheError> {
        match self {
            CacheBackend::Local(store) => Ok(store.sets.get(key).map(|s| s.len()).unwrap_or(0)),
            CacheBackend::Redis(redis) => {
                let mut conn = redis.get().await?;
                Ok(conn.zcard::<_, usize>(key).await?)
            }
        }
    }

    /// Members by ascending score within an inclusive rank window.
    pub async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, CacheError> {
        match self {
            CacheBackend::Local(store) => Ok(store
                .sets
                .get(key)
                .map(|s| s.range(start, stop, false))
                .unwrap_or_default()),
            CacheBackend::Redis(redis) => {
                let mut conn = redis.get().await?;
                Ok(conn.zrange::<_, Vec<String>>(key, start, stop).await?)
            }
        }
    }

    /// Members by descending score within an inclusive rank window.
    pub async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, CacheError> {
        match self {
            CacheBackend::Local(store) => Ok(store
                .sets
                .get(key)
                .map(|s| s.range(start, stop, true))
                .unwrap_or_default()),
            CacheBackend::Redis(redis) => {
                let mut conn = redis.get().await?;
                Ok(conn.zrevrange::<_, Vec<String>>(key, start, stop).await?)
            }
        }
    }

    /// Removes the ascending rank window; returns how many members went.
    pub async fn zremrangebyrank(&self, key: &str, start: isize, stop: isize) -> Result<usize, CacheError> {
        match self {
            CacheBackend::Local(store) => Ok(store
                .sets
                .get_mut(key)
                .map(|mut s| s.remove_range(start, stop))
                .unwrap_or(0)),
            CacheBackend::Redis(redis) => {
                let mut conn = redis.get().await?;
                Ok(conn.zremrangebyrank::<_, usize>(key, start, stop).await?)
            }
        }
    }

    pub async fn zrem(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        if members.is_empty() {
            return Ok(());
        }
        match self {
            CacheBackend::Local(store) => {
                if let Some(mut set) = store.sets.get_mut(key) {
                    for member in members {
                        set.remove(member);
                    }
                }
                Ok(())
            }
            CacheBackend::Redis(redis) => {
                let mut conn = redis.get().await?;
                conn.zrem::<_, _, ()>(key, members).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_window() {
        assert_eq!(rank_window(5, 0, -1), Some((0, 4)));
        assert_eq!(rank_window(5, 1, 2), Some((1, 2)));
        assert_eq!(rank_window(5, 3, 100), Some((3, 4)));
        assert_eq!(rank_window(5, 5, 9), None);
        assert_eq!(rank_window(5, 2, 1), None);
        assert_eq!(rank_window(5, -2, -1), Some((3, 4)));
        assert_eq!(rank_window(0, 0, -1), None);
    }

    #[tokio::test]
    async fn test_local_blob_ttl() {
        let cache = CacheBackend::new_local();
        cache
            .set_ex("k", b"v".to_vec(), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(Arc::new(b"v".to_vec())));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_mget_and_del() {
        let cache = CacheBackend::new_local();
        let ttl = Duration::from_secs(60);
        cache.set_ex("a", b"1".to_vec(), ttl).await.unwrap();
        cache.set_ex("c", b"3".to_vec(), ttl).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let values = cache.mget(&keys).await.unwrap();
        assert!(values[0].is_some());
        assert!(values[1].is_none());
        assert!(values[2].is_some());

        cache.del(&keys).await.unwrap();
        assert!(cache.mget(&keys).await.unwrap().iter().all(Option::is_none));
    }

    #[tokio::test]
    async fn test_local_sorted_set_matches_redis_ordering() {
        let cache = CacheBackend::new_local();
        cache.zadd("z", "b", 10).await.unwrap();
        cache.zadd("z", "a", 10).await.unwrap();
        cache.zadd("z", "c", 5).await.unwrap();

        // Equal scores order by member ascending, reversed for ZREVRANGE.
        assert_eq!(cache.zrange("z", 0, -1).await.unwrap(), vec!["c", "a", "b"]);
        assert_eq!(cache.zrevrange("z", 0, 1).await.unwrap(), vec!["b", "a"]);

        // Re-scoring moves the member.
        cache.zadd("z", "c", 20).await.unwrap();
        assert_eq!(cache.zrevrange("z", 0, 0).await.unwrap(), vec!["c"]);
        assert_eq!(cache.zcard("z").await.unwrap(), 3);

        assert_eq!(cache.zremrangebyrank("z", 0, 0).await.unwrap(), 1);
        assert_eq!(cache.zrange("z", 0, -1).await.unwrap(), vec!["b", "c"]);

        cache.zrem("z", &["b".to_string()]).await.unwrap();
        assert_eq!(cache.zcard("z").await.unwrap(), 1);
        assert_eq!(cache.zcard("missing").await.unwrap(), 0);
    }
}
