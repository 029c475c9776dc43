//! Cache-aside layer in front of the region shards.
//!
//! ## Architecture
//!
//! - **Item cache**: MessagePack blobs per (region, id) with a bounded
//!   recency index per region
//! - **List index**: per-region ordered set of ids scored by publish time
//! - **Comment lists**: one blob per (region, parent), bounded per region
//!
//! ## Graceful Degradation
//!
//! If Redis is unavailable or disabled, the same structures live in a local
//! store (single instance only). Cache failures never fail a request; the
//! services fall back to storage.

pub mod backend;
pub mod comments;
pub mod list_index;
pub mod recency;
pub mod warm;

use std::time::Duration;

pub use backend::{CacheBackend, CacheError, CachedEntry};
pub use comments::CommentListCache;
pub use list_index::{ItemCache, ListIndexCache};
pub use recency::BoundedRecencyCache;

use crate::config::CacheConfig;

/// Every cache the services use, built once over one backend.
#[derive(Clone)]
pub struct Caches {
    pub items: ItemCache,
    pub lists: ListIndexCache,
    pub comments: CommentListCache,
    pub warm_timeout: Duration,
}

impl Caches {
    pub fn new(backend: CacheBackend, config: &CacheConfig) -> Self {
        let items = ItemCache::new(
            backend.clone(),
            "item",
            config.item_capacity,
            config.item_ttl(),
        );
        let lists = ListIndexCache::new(
            backend.clone(),
            items.clone(),
            config.list_index_capacity,
            config.warm_timeout(),
        );
        let comments = CommentListCache::new(
            backend,
            config.comment_list_capacity,
            config.comment_list_ttl(),
        );
        Self {
            items,
            lists,
            comments,
            warm_timeout: config.warm_timeout(),
        }
    }
}
