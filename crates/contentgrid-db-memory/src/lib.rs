//! In-memory shard storage backend for ContentGrid.
//!
//! This crate provides an in-memory implementation of the `ContentStorage`
//! trait from `contentgrid-storage`, using papaya lock-free HashMaps for
//! concurrent access. It backs the `memory` shard backend and the test suites.
//!
//! # Example
//!
//! ```ignore
//! use contentgrid_db_memory::InMemoryStorage;
//! use contentgrid_storage::{ContentItem, ContentStorage};
//!
//! let storage = InMemoryStorage::new();
//! let item = ContentItem::new("europe", "Hello", "First post");
//! storage.insert_item(&item).await?;
//! ```

pub mod storage;

pub use contentgrid_storage::{ContentStorage, StorageError};
pub use storage::InMemoryStorage;

/// Creates a new in-memory shard as a storage trait object.
pub fn create_storage() -> contentgrid_storage::DynStorage {
    std::sync::Arc::new(InMemoryStorage::new())
}
