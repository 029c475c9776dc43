use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use contentgrid_storage::{
    Comment, ContentItem, ContentPatch, ContentStorage, StorageError, comment_order,
    listing_order,
};
use papaya::HashMap as PapayaHashMap;
use uuid::Uuid;

/// In-memory shard backend using papaya lock-free HashMaps.
///
/// One instance stands in for one shard. It mirrors the PostgreSQL backend's
/// observable behaviour: duplicate ids are rejected, listings use the same
/// ordering, and reads are counted so tests can tell a cache hit from a
/// storage round-trip.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    items: Arc<PapayaHashMap<Uuid, ContentItem>>,
    comments: Arc<PapayaHashMap<Uuid, Comment>>,
    reads: AtomicU64,
}

impl InMemoryStorage {
    /// Creates an empty shard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of read operations served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of items currently stored.
    pub fn item_count(&self) -> usize {
        self.items.pin().len()
    }

    /// Number of comments currently stored.
    pub fn comment_count(&self) -> usize {
        self.comments.pin().len()
    }

    fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl ContentStorage for InMemoryStorage {
    async fn ensure_schema(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn insert_item(&self, item: &ContentItem) -> Result<(), StorageError> {
        let guard = self.items.pin();
        guard
            .try_insert(item.id, item.clone())
            .map(|_| ())
            .map_err(|_| StorageError::already_exists("ContentItem", item.id))
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<ContentItem>, StorageError> {
        self.record_read();
        Ok(self.items.pin().get(&id).cloned())
    }

    async fn get_items(&self, ids: &[Uuid]) -> Result<Vec<ContentItem>, StorageError> {
        self.record_read();
        let guard = self.items.pin();
        Ok(ids.iter().filter_map(|id| guard.get(id).cloned()).collect())
    }

    async fn list_items(
        &self,
        region: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<ContentItem>, StorageError> {
        self.record_read();
        let guard = self.items.pin();
        let mut matching: Vec<ContentItem> = guard
            .iter()
            .filter(|(_, item)| item.region == region)
            .map(|(_, item)| item.clone())
            .collect();
        matching.sort_by(listing_order);
        Ok(matching.into_iter().skip(skip).take(take).collect())
    }

    async fn update_item(
        &self,
        id: Uuid,
        patch: &ContentPatch,
    ) -> Result<ContentItem, StorageError> {
        let guard = self.items.pin();
        guard
            .update(id, |item| {
                let mut next = item.clone();
                patch.apply(&mut next);
                next
            })
            .cloned()
            .ok_or_else(|| StorageError::not_found("ContentItem", id))
    }

    async fn delete_item(&self, id: Uuid) -> Result<ContentItem, StorageError> {
        let guard = self.items.pin();
        guard
            .remove(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("ContentItem", id))
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<(), StorageError> {
        let guard = self.comments.pin();
        guard
            .try_insert(comment.id, comment.clone())
            .map(|_| ())
            .map_err(|_| StorageError::already_exists("Comment", comment.id))
    }

    async fn list_comments(&self, parent_item_id: Uuid) -> Result<Vec<Comment>, StorageError> {
        self.record_read();
        let guard = self.comments.pin();
        let mut matching: Vec<Comment> = guard
            .iter()
            .filter(|(_, c)| c.parent_item_id == parent_item_id)
            .map(|(_, c)| c.clone())
            .collect();
        matching.sort_by(comment_order);
        Ok(matching)
    }

    async fn update_comment(&self, id: Uuid, text: &str) -> Result<Comment, StorageError> {
        let guard = self.comments.pin();
        guard
            .update(id, |c| {
                let mut next = c.clone();
                next.text = text.to_string();
                next
            })
            .cloned()
            .ok_or_else(|| StorageError::not_found("Comment", id))
    }

    async fn delete_comment(&self, id: Uuid) -> Result<Comment, StorageError> {
        let guard = self.comments.pin();
        guard
            .remove(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("Comment", id))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
