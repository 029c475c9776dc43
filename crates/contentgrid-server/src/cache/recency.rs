//! Bounded recency cache.
//!
//! Values are stored as MessagePack blobs with a TTL. Every touch records
//! the access time in a per-region ordered set; once that set grows past
//! its capacity the least recently touched members lose their blobs and
//! their index entries.
//!
//! ## Key Format
//!
//! - blob: `cg:{scope}:obj:{region}:{id}`
//! - recency index: `cg:{scope}:idx:{region}`
//!
//! Regions are caller input, so the fixed `obj`/`idx` segment keeps any
//! region from naming another region's index.
//!
//! Eviction is two commands (delete blobs, then trim the index), not a
//! transaction. A crash in between leaves index members without blobs;
//! readers see those as ordinary misses and the next eviction removes them.

use std::marker::PhantomData;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::backend::{CacheBackend, CacheError};

pub struct BoundedRecencyCache<T> {
    backend: CacheBackend,
    scope: &'static str,
    capacity: usize,
    ttl: Duration,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for BoundedRecencyCache<T> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            scope: self.scope,
            capacity: self.capacity,
            ttl: self.ttl,
            _value: PhantomData,
        }
    }
}

impl<T> BoundedRecencyCache<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Creates a cache keeping at most `capacity` entries per region.
    pub fn new(backend: CacheBackend, scope: &'static str, capacity: usize, ttl: Duration) -> Self {
        Self {
            backend,
            scope,
            capacity: capacity.max(1),
            ttl,
            _value: PhantomData,
        }
    }

    #[inline]
    fn blob_key(&self, region: &str, id: &str) -> String {
        format!("cg:{}:obj:{region}:{id}", self.scope)
    }

    #[inline]
    fn index_key(&self, region: &str) -> String {
        format!("cg:{}:idx:{region}", self.scope)
    }

    /// Reads a value. A hit refreshes its recency; undecodable blobs are
    /// dropped and reported as a miss.
    pub async fn get(&self, region: &str, id: &str) -> Result<Option<T>, CacheError> {
        let key = self.blob_key(region, id);
        let Some(data) = self.backend.get(&key).await? else {
            tracing::debug!(key = %key, "cache miss");
            return Ok(None);
        };

        match rmp_serde::from_slice::<T>(&data) {
            Ok(value) => {
                tracing::debug!(key = %key, "cache hit");
                if let Err(e) = self.touch(region, id).await {
                    tracing::warn!(key = %key, error = %e, "Failed to refresh recency");
                }
                Ok(Some(value))
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to deserialize cached value");
                self.invalidate(region, id).await?;
                Ok(None)
            }
        }
    }

    /// Batch read without touching recency. One slot per id.
    pub async fn get_many(&self, region: &str, ids: &[String]) -> Result<Vec<Option<T>>, CacheError> {
        let keys: Vec<String> = ids.iter().map(|id| self.blob_key(region, id)).collect();
        let blobs = self.backend.mget(&keys).await?;

        let mut undecodable = Vec::new();
        let values: Vec<Option<T>> = blobs
            .into_iter()
            .zip(&keys)
            .map(|(blob, key)| {
                let data = blob?;
                match rmp_serde::from_slice::<T>(&data) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Failed to deserialize cached value");
                        undecodable.push(key.clone());
                        None
                    }
                }
            })
            .collect();

        self.backend.del(&undecodable).await?;
        Ok(values)
    }

    /// Stores a value and marks it most recently used.
    pub async fn put(&self, region: &str, id: &str, value: &T) -> Result<(), CacheError> {
        let data = rmp_serde::to_vec(value).map_err(|e| CacheError::Codec(e.to_string()))?;
        self.backend
            .set_ex(&self.blob_key(region, id), data, self.ttl)
            .await?;
        self.touch(region, id).await
    }

    /// Removes the blob and its recency entry.
    pub async fn invalidate(&self, region: &str, id: &str) -> Result<(), CacheError> {
        self.backend.del(&[self.blob_key(region, id)]).await?;
        self.backend
            .zrem(&self.index_key(region), &[id.to_string()])
            .await?;
        tracing::debug!(scope = self.scope, region, id, "cache invalidated");
        Ok(())
    }

    /// Sets the member's score to now (microseconds) and enforces capacity.
    pub async fn touch(&self, region: &str, id: &str) -> Result<(), CacheError> {
        let now = Utc::now().timestamp_micros();
        self.backend.zadd(&self.index_key(region), id, now).await?;
        self.enforce_capacity(region).await?;
        Ok(())
    }

    /// Evicts the least recently touched entries beyond capacity.
    /// Returns how many were evicted.
    pub async fn enforce_capacity(&self, region: &str) -> Result<usize, CacheError> {
        let index = self.index_key(region);
        let n = self.backend.zcard(&index).await?;
        if n <= self.capacity {
            return Ok(0);
        }

        let last = (n - self.capacity - 1) as isize;
        let victims = self.backend.zrange(&index, 0, last).await?;
        let blob_keys: Vec<String> = victims.iter().map(|id| self.blob_key(region, id)).collect();
        self.backend.del(&blob_keys).await?;
        let removed = self.backend.zremrangebyrank(&index, 0, last).await?;

        tracing::debug!(
            scope = self.scope,
            region,
            evicted = victims.len(),
            removed,
            "recency capacity enforced"
        );
        Ok(victims.len())
    }

    /// Ids currently tracked for a region, least recent first.
    pub async fn tracked(&self, region: &str) -> Result<Vec<String>, CacheError> {
        self.backend.zrange(&self.index_key(region), 0, -1).await
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether a blob is present, without touching recency.
    pub async fn contains(&self, region: &str, id: &str) -> Result<bool, CacheError> {
        Ok(self.backend.get(&self.blob_key(region, id)).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> BoundedRecencyCache<String> {
        BoundedRecencyCache::new(
            CacheBackend::new_local(),
            "test",
            capacity,
            Duration::from_secs(60),
        )
    }

    async fn pause() {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    #[tokio::test]
    async fn test_put_get_invalidate() {
        let cache = cache(10);
        cache.put("europe", "a", &"alpha".to_string()).await.unwrap();
        assert_eq!(cache.get("europe", "a").await.unwrap().as_deref(), Some("alpha"));

        // Regions are separate scopes.
        assert!(cache.get("asia", "a").await.unwrap().is_none());

        cache.invalidate("europe", "a").await.unwrap();
        assert!(cache.get("europe", "a").await.unwrap().is_none());
        assert!(cache.tracked("europe").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_touched() {
        let cache = cache(3);
        for id in ["a", "b", "c"] {
            cache.put("europe", id, &id.to_string()).await.unwrap();
            pause().await;
        }

        // Touch "a" so "b" becomes the oldest.
        assert!(cache.get("europe", "a").await.unwrap().is_some());
        pause().await;
        cache.put("europe", "d", &"d".to_string()).await.unwrap();

        let tracked = cache.tracked("europe").await.unwrap();
        assert_eq!(tracked.len(), 3);
        assert!(!tracked.contains(&"b".to_string()));
        assert!(!cache.contains("europe", "b").await.unwrap());
        for id in &tracked {
            assert!(cache.contains("europe", id).await.unwrap(), "blob for {id}");
        }
    }

    #[tokio::test]
    async fn test_dangling_index_entry_is_a_miss() {
        let backend = CacheBackend::new_local();
        let cache: BoundedRecencyCache<String> =
            BoundedRecencyCache::new(backend.clone(), "test", 2, Duration::from_secs(60));

        // Index member without a blob, as left behind by an interrupted eviction.
        backend.zadd("cg:test:idx:europe", "ghost", 1).await.unwrap();
        assert!(cache.get("europe", "ghost").await.unwrap().is_none());

        cache.put("europe", "x", &"x".to_string()).await.unwrap();
        pause().await;
        cache.put("europe", "y", &"y".to_string()).await.unwrap();

        // The ghost had the lowest score, so it was the one evicted.
        let tracked = cache.tracked("europe").await.unwrap();
        assert_eq!(tracked, vec!["x".to_string(), "y".to_string()]);
    }

    #[tokio::test]
    async fn test_undecodable_blob_is_invalidated() {
        let backend = CacheBackend::new_local();
        let cache: BoundedRecencyCache<Vec<u64>> =
            BoundedRecencyCache::new(backend.clone(), "test", 5, Duration::from_secs(60));

        backend
            .set_ex("cg:test:obj:europe:bad", vec![0xc1], Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.get("europe", "bad").await.unwrap().is_none());
        assert!(backend.get("cg:test:obj:europe:bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_many_preserves_slots() {
        let cache = cache(10);
        cache.put("europe", "a", &"alpha".to_string()).await.unwrap();
        cache.put("europe", "c", &"gamma".to_string()).await.unwrap();

        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let values = cache.get_many("europe", &ids).await.unwrap();
        assert_eq!(
            values,
            vec![Some("alpha".to_string()), None, Some("gamma".to_string())]
        );
    }

    #[tokio::test]
    async fn test_region_names_cannot_reach_index_keys() {
        let cache = cache(10);
        cache.put("europe", "a", &"alpha".to_string()).await.unwrap();
        // Regions named like key segments stay separate scopes.
        cache.put("recency", "europe", &"beta".to_string()).await.unwrap();
        cache.put("idx", "europe", &"gamma".to_string()).await.unwrap();

        assert_eq!(cache.tracked("europe").await.unwrap(), vec!["a".to_string()]);
        assert_eq!(cache.get("europe", "a").await.unwrap().as_deref(), Some("alpha"));
        assert_eq!(cache.get("recency", "europe").await.unwrap().as_deref(), Some("beta"));
        assert_eq!(cache.get("idx", "europe").await.unwrap().as_deref(), Some("gamma"));
    }
}
