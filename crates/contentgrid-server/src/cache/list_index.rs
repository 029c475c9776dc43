//! Per-region list index for paginated reads.
//!
//! The index is an ordered set of item ids scored by `published_at`
//! milliseconds, so a descending rank window is exactly one page in
//! listing order (Redis breaks score ties by member text, and UUID text
//! order matches UUID order). Blobs come from the item cache.
//!
//! The index is only trusted as a prefix of the storage ordering. A page
//! read from storage is only added to the index when it continues the
//! indexed prefix, and when such a page comes back short the region is
//! marked as fully indexed. An empty window always goes to storage; a
//! short one is served from the index only while that marker is present.
//!
//! ## Key Format
//!
//! - index: `cg:list:idx:{region}`
//! - fully indexed marker: `cg:list:full:{region}`

use std::collections::HashSet;
use std::time::Duration;

use contentgrid_storage::{ContentItem, DynStorage, StorageError, listing_order};
use uuid::Uuid;

use super::backend::{CacheBackend, CacheError};
use super::recency::BoundedRecencyCache;
use super::warm;

/// Item blobs with a per-region recency bound.
pub type ItemCache = BoundedRecencyCache<ContentItem>;

#[derive(Clone)]
pub struct ListIndexCache {
    backend: CacheBackend,
    items: ItemCache,
    capacity: usize,
    warm_timeout: Duration,
}

impl ListIndexCache {
    pub fn new(
        backend: CacheBackend,
        items: ItemCache,
        capacity: usize,
        warm_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            items,
            capacity: capacity.max(1),
            warm_timeout,
        }
    }

    #[inline]
    fn index_key(region: &str) -> String {
        format!("cg:list:idx:{region}")
    }

    #[inline]
    fn full_key(region: &str) -> String {
        format!("cg:list:full:{region}")
    }

    /// Adds an item to its region's index and trims the oldest entries
    /// beyond capacity.
    pub async fn record(&self, item: &ContentItem) -> Result<(), CacheError> {
        let key = Self::index_key(&item.region);
        self.backend
            .zadd(&key, &item.id.to_string(), item.list_score())
            .await?;

        let n = self.backend.zcard(&key).await?;
        if n > self.capacity {
            // The oldest entries leave, so the index no longer reaches the
            // end of the region.
            self.backend.del(&[Self::full_key(&item.region)]).await?;
            let last = isize::try_from(n - self.capacity - 1).unwrap_or(isize::MAX);
            self.backend.zremrangebyrank(&key, 0, last).await?;
        }
        Ok(())
    }

    /// Removes an item from its region's index.
    pub async fn remove(&self, region: &str, id: Uuid) -> Result<(), CacheError> {
        self.backend
            .zrem(&Self::index_key(region), &[id.to_string()])
            .await
    }

    /// Ids in listing order for the window `skip..skip+take`. A window
    /// starting beyond any addressable rank is empty.
    pub async fn window(&self, region: &str, skip: usize, take: usize) -> Result<Vec<String>, CacheError> {
        let Some((start, stop)) = rank_range(skip, take) else {
            return Ok(Vec::new());
        };
        self.backend
            .zrevrange(&Self::index_key(region), start, stop)
            .await
    }

    /// Whether the index holds every item of the region.
    pub async fn is_complete(&self, region: &str) -> Result<bool, CacheError> {
        Ok(self.backend.get(&Self::full_key(region)).await?.is_some())
    }

    /// Number of ids indexed for a region.
    pub async fn len(&self, region: &str) -> Result<usize, CacheError> {
        self.backend.zcard(&Self::index_key(region)).await
    }

    /// Caches an item's blob and records it in the index.
    pub async fn warm_item(&self, item: &ContentItem) -> Result<(), CacheError> {
        self.items.put(&item.region, &item.id.to_string(), item).await?;
        self.record(item).await
    }

    /// Returns one page of a region's items, newest first.
    ///
    /// Cache failures fall back to storage; only storage failures surface.
    pub async fn page(
        &self,
        region: &str,
        skip: usize,
        take: usize,
        storage: &DynStorage,
    ) -> Result<Vec<ContentItem>, StorageError> {
        if take == 0 {
            return Ok(Vec::new());
        }

        let ids = match self.window(region, skip, take).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(region, error = %e, "List index unavailable, reading storage");
                return self.from_storage(region, skip, take, storage, false).await;
            }
        };
        if ids.is_empty() {
            return self.from_storage(region, skip, take, storage, true).await;
        }
        if ids.len() < take {
            match self.is_complete(region).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(region, skip, take, indexed = ids.len(), "List index window short");
                    return self.from_storage(region, skip, take, storage, true).await;
                }
                Err(e) => {
                    tracing::warn!(region, error = %e, "List index unavailable, reading storage");
                    return self.from_storage(region, skip, take, storage, false).await;
                }
            }
        }

        let cached = match self.items.get_many(region, &ids).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(region, error = %e, "Item blobs unavailable, reading storage");
                return self.from_storage(region, skip, take, storage, false).await;
            }
        };

        let mut page = Vec::with_capacity(take);
        let mut missing = Vec::new();
        let mut dangling = Vec::new();
        for (id, value) in ids.iter().zip(cached) {
            match value {
                Some(item) => page.push(item),
                None => match Uuid::parse_str(id) {
                    Ok(uuid) => missing.push(uuid),
                    Err(_) => dangling.push(id.clone()),
                },
            }
        }

        if !missing.is_empty() {
            let fetched = storage.get_items(&missing).await?;
            let found: HashSet<Uuid> = fetched.iter().map(|item| item.id).collect();
            dangling.extend(
                missing
                    .iter()
                    .filter(|id| !found.contains(id))
                    .map(|id| id.to_string()),
            );
            tracing::debug!(region, refetched = fetched.len(), "Refilled missing item blobs");
            for item in &fetched {
                warm::best_effort("list item", self.warm_timeout, self.warm_item(item)).await;
            }
            page.extend(fetched);
        }

        if !dangling.is_empty() {
            tracing::debug!(region, dangling = dangling.len(), "Dropping dangling list index ids");
            warm::best_effort(
                "list index cleanup",
                self.warm_timeout,
                self.backend.zrem(&Self::index_key(region), &dangling),
            )
            .await;
            return self.from_storage(region, skip, take, storage, true).await;
        }

        page.sort_by(listing_order);
        page.truncate(take);
        Ok(page)
    }

    async fn from_storage(
        &self,
        region: &str,
        skip: usize,
        take: usize,
        storage: &DynStorage,
        warm_page: bool,
    ) -> Result<Vec<ContentItem>, StorageError> {
        let page = storage.list_items(region, skip, take).await?;
        if warm_page && !page.is_empty() {
            let this = self.clone();
            let items = page.clone();
            let region = region.to_string();
            warm::spawn_best_effort("list page", self.warm_timeout, async move {
                this.warm_page(&region, skip, take, &items).await
            });
        }
        Ok(page)
    }

    /// Caches a storage page. Index entries are only added when the page
    /// starts inside (or right after) the indexed prefix, so the index never
    /// has gaps. A short page that was indexed ends the region, and marks
    /// it complete unless the index is at capacity (it may have been
    /// trimmed).
    async fn warm_page(
        &self,
        region: &str,
        skip: usize,
        take: usize,
        items: &[ContentItem],
    ) -> Result<(), CacheError> {
        for item in items {
            self.items.put(&item.region, &item.id.to_string(), item).await?;
        }
        if self.len(region).await? < skip {
            return Ok(());
        }
        for item in items {
            self.record(item).await?;
        }
        if items.len() < take {
            let indexed = self.len(region).await?;
            if indexed < self.capacity {
                self.backend
                    .set_ex(&Self::full_key(region), vec![1], self.items.ttl())
                    .await?;
                tracing::debug!(region, indexed, "List index covers the whole region");
            }
        }
        Ok(())
    }
}

/// Redis rank bounds for `skip..skip+take`, or `None` when the window is
/// empty or starts past the largest rank.
fn rank_range(skip: usize, take: usize) -> Option<(isize, isize)> {
    if take == 0 {
        return None;
    }
    let start = isize::try_from(skip).ok()?;
    let stop = skip
        .checked_add(take - 1)
        .and_then(|stop| isize::try_from(stop).ok())
        .unwrap_or(isize::MAX);
    Some((start, stop))
}

#[cfg(test)]
mod tests {
    use super::*;
    use contentgrid_db_memory::InMemoryStorage;
    use contentgrid_storage::ContentStorage;
    use std::sync::Arc;

    struct Fixture {
        backend: CacheBackend,
        lists: ListIndexCache,
        memory: Arc<InMemoryStorage>,
        storage: DynStorage,
    }

    fn fixture(capacity: usize) -> Fixture {
        let backend = CacheBackend::new_local();
        let items = ItemCache::new(backend.clone(), "item", 1000, Duration::from_secs(60));
        let lists = ListIndexCache::new(backend.clone(), items, capacity, Duration::from_secs(1));
        let memory = Arc::new(InMemoryStorage::new());
        let storage: DynStorage = memory.clone();
        Fixture {
            backend,
            lists,
            memory,
            storage,
        }
    }

    async fn seed(fx: &Fixture, count: i64) -> Vec<ContentItem> {
        let mut items = Vec::new();
        for i in 0..count {
            let mut item = ContentItem::new("europe", format!("item {i}"), "body");
            item.published_at -= chrono::Duration::seconds(i);
            fx.memory.insert_item(&item).await.unwrap();
            items.push(item);
        }
        items
    }

    async fn wait_for_index(lists: &ListIndexCache, region: &str, expected: usize) {
        for _ in 0..100 {
            if lists.len(region).await.unwrap() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("index for {region} never reached {expected} entries");
    }

    async fn wait_for_complete(lists: &ListIndexCache, region: &str) {
        for _ in 0..100 {
            if lists.is_complete(region).await.unwrap() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("index for {region} never marked complete");
    }

    #[test]
    fn test_rank_range() {
        assert_eq!(rank_range(0, 0), None);
        assert_eq!(rank_range(5, 3), Some((5, 7)));
        assert_eq!(rank_range(isize::MAX as usize, 5), Some((isize::MAX, isize::MAX)));
        assert_eq!(rank_range(usize::MAX, 20), None);
    }

    #[tokio::test]
    async fn test_record_trims_oldest_beyond_capacity() {
        let fx = fixture(3);
        let items = seed(&fx, 5).await;
        for item in &items {
            fx.lists.record(item).await.unwrap();
        }

        let window = fx.lists.window("europe", 0, 10).await.unwrap();
        let expected: Vec<String> = items[..3].iter().map(|i| i.id.to_string()).collect();
        assert_eq!(window, expected);
    }

    #[tokio::test]
    async fn test_empty_index_falls_back_and_warms() {
        let fx = fixture(100);
        let items = seed(&fx, 4).await;

        let page = fx.lists.page("europe", 0, 4, &fx.storage).await.unwrap();
        assert_eq!(page, items);
        assert_eq!(fx.memory.read_count(), 1);

        wait_for_index(&fx.lists, "europe", 4).await;
        let cached = fx.lists.page("europe", 0, 4, &fx.storage).await.unwrap();
        assert_eq!(cached, items);
        // Served entirely from cache.
        assert_eq!(fx.memory.read_count(), 1);
    }

    #[tokio::test]
    async fn test_deep_page_does_not_create_index_gap() {
        let fx = fixture(100);
        seed(&fx, 10).await;

        fx.lists.page("europe", 6, 2, &fx.storage).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.lists.len("europe").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_blob_is_refetched() {
        let fx = fixture(100);
        let items = seed(&fx, 3).await;
        for item in &items {
            fx.lists.warm_item(item).await.unwrap();
        }
        // Drop one blob behind the index's back.
        let victim = &items[1];
        fx.backend
            .del(&[format!("cg:item:obj:europe:{}", victim.id)])
            .await
            .unwrap();

        let page = fx.lists.page("europe", 0, 3, &fx.storage).await.unwrap();
        assert_eq!(page, items);
        assert_eq!(fx.memory.read_count(), 1);
    }

    #[tokio::test]
    async fn test_dangling_id_is_removed_and_storage_serves_page() {
        let fx = fixture(100);
        let items = seed(&fx, 3).await;
        for item in &items {
            fx.lists.warm_item(item).await.unwrap();
        }

        let gone = fx.memory.delete_item(items[0].id).await.unwrap();
        fx.backend
            .del(&[format!("cg:item:obj:europe:{}", gone.id)])
            .await
            .unwrap();

        let page = fx.lists.page("europe", 0, 2, &fx.storage).await.unwrap();
        assert_eq!(page, items[1..3].to_vec());
        let window = fx.lists.window("europe", 0, 10).await.unwrap();
        assert!(!window.contains(&gone.id.to_string()));
    }

    #[tokio::test]
    async fn test_remove_drops_from_window() {
        let fx = fixture(100);
        let items = seed(&fx, 2).await;
        for item in &items {
            fx.lists.record(item).await.unwrap();
        }
        fx.lists.remove("europe", items[0].id).await.unwrap();
        assert_eq!(
            fx.lists.window("europe", 0, 5).await.unwrap(),
            vec![items[1].id.to_string()]
        );
    }

    #[tokio::test]
    async fn test_small_region_is_served_from_index_once_complete() {
        let fx = fixture(100);
        let items = seed(&fx, 3).await;

        assert_eq!(fx.lists.page("europe", 0, 20, &fx.storage).await.unwrap(), items);
        assert_eq!(fx.memory.read_count(), 1);
        wait_for_complete(&fx.lists, "europe").await;

        for _ in 0..5 {
            assert_eq!(fx.lists.page("europe", 0, 20, &fx.storage).await.unwrap(), items);
        }
        assert_eq!(fx.memory.read_count(), 1);
    }

    #[tokio::test]
    async fn test_short_window_without_marker_reads_storage() {
        let fx = fixture(100);
        let items = seed(&fx, 3).await;
        // Indexed by writes only: nothing says these are all the items.
        for item in &items[..2] {
            fx.lists.warm_item(item).await.unwrap();
        }

        assert_eq!(fx.lists.page("europe", 0, 20, &fx.storage).await.unwrap(), items);
        assert_eq!(fx.memory.read_count(), 1);
    }

    #[tokio::test]
    async fn test_trim_clears_complete_marker() {
        let fx = fixture(3);
        seed(&fx, 2).await;
        fx.lists.page("europe", 0, 10, &fx.storage).await.unwrap();
        wait_for_complete(&fx.lists, "europe").await;

        for i in 0..2 {
            let mut newer = ContentItem::new("europe", format!("newer {i}"), "body");
            newer.published_at += chrono::Duration::seconds(10 + i);
            fx.lists.record(&newer).await.unwrap();
        }
        assert_eq!(fx.lists.len("europe").await.unwrap(), 3);
        assert!(!fx.lists.is_complete("europe").await.unwrap());
    }

    #[tokio::test]
    async fn test_unaddressable_skip_is_an_empty_page() {
        let fx = fixture(100);
        let items = seed(&fx, 3).await;
        for item in &items {
            fx.lists.warm_item(item).await.unwrap();
        }

        assert!(fx.lists.window("europe", usize::MAX, 20).await.unwrap().is_empty());
        let page = fx.lists.page("europe", usize::MAX, 20, &fx.storage).await.unwrap();
        assert!(page.is_empty());
    }
}
