//! Whole-list comment cache.
//!
//! A parent's comments are cached as one blob per (region, parent). Any
//! write to the parent's comments drops the blob; the next read rebuilds it
//! from storage.

use std::time::Duration;

use contentgrid_storage::Comment;
use uuid::Uuid;

use super::backend::{CacheBackend, CacheError};
use super::recency::BoundedRecencyCache;

#[derive(Clone)]
pub struct CommentListCache {
    lists: BoundedRecencyCache<Vec<Comment>>,
}

impl CommentListCache {
    /// Keeps at most `capacity` parents' lists per region.
    pub fn new(backend: CacheBackend, capacity: usize, ttl: Duration) -> Self {
        Self {
            lists: BoundedRecencyCache::new(backend, "comments", capacity, ttl),
        }
    }

    pub async fn get(&self, region: &str, parent_item_id: Uuid) -> Result<Option<Vec<Comment>>, CacheError> {
        self.lists.get(region, &parent_item_id.to_string()).await
    }

    pub async fn put(&self, region: &str, parent_item_id: Uuid, comments: &Vec<Comment>) -> Result<(), CacheError> {
        self.lists
            .put(region, &parent_item_id.to_string(), comments)
            .await
    }

    pub async fn invalidate(&self, region: &str, parent_item_id: Uuid) -> Result<(), CacheError> {
        self.lists
            .invalidate(region, &parent_item_id.to_string())
            .await
    }

    /// Parents whose lists are currently cached for a region.
    pub async fn tracked(&self, region: &str) -> Result<Vec<String>, CacheError> {
        self.lists.tracked(region).await
    }
}
