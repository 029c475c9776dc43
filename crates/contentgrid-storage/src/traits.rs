//! Storage traits for the shard storage abstraction layer.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StorageError;
use crate::types::{Comment, ContentItem, ContentPatch};

/// The storage contract every shard backend implements.
///
/// One instance talks to exactly one shard. Routing a region to its shard
/// happens above this trait; implementations must be thread-safe
/// (`Send + Sync`) because a single instance is shared by every request and
/// by the ingest worker.
///
/// # Example
///
/// ```ignore
/// use contentgrid_storage::{ContentStorage, StorageError, ContentItem};
///
/// async fn fetch(storage: &dyn ContentStorage, id: uuid::Uuid) -> Result<ContentItem, StorageError> {
///     storage
///         .get_item(id)
///         .await?
///         .ok_or_else(|| StorageError::not_found("ContentItem", id))
/// }
/// ```
#[async_trait]
pub trait ContentStorage: Send + Sync {
    // ==================== Schema ====================

    /// Creates tables and indexes if they do not exist yet.
    ///
    /// Must be idempotent: every process calls it at startup.
    async fn ensure_schema(&self) -> Result<(), StorageError>;

    // ==================== Content items ====================

    /// Inserts a new item using the item's own id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if the id is already present.
    async fn insert_item(&self, item: &ContentItem) -> Result<(), StorageError>;

    /// Reads an item by id. Returns `None` if it does not exist.
    async fn get_item(&self, id: Uuid) -> Result<Option<ContentItem>, StorageError>;

    /// Reads every item in `ids` that exists. Order of the result is unspecified.
    async fn get_items(&self, ids: &[Uuid]) -> Result<Vec<ContentItem>, StorageError>;

    /// Returns one page of a region's items ordered by
    /// `published_at DESC, id DESC`.
    async fn list_items(
        &self,
        region: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<ContentItem>, StorageError>;

    /// Applies a patch and returns the updated item.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the item does not exist.
    async fn update_item(&self, id: Uuid, patch: &ContentPatch)
    -> Result<ContentItem, StorageError>;

    /// Deletes an item and returns what was deleted.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the item does not exist.
    async fn delete_item(&self, id: Uuid) -> Result<ContentItem, StorageError>;

    // ==================== Comments ====================

    /// Inserts a new comment.
    async fn insert_comment(&self, comment: &Comment) -> Result<(), StorageError>;

    /// Lists a parent's comments ordered by `created_at ASC, id ASC`.
    async fn list_comments(&self, parent_item_id: Uuid) -> Result<Vec<Comment>, StorageError>;

    /// Replaces a comment's text and returns the updated comment.
    async fn update_comment(&self, id: Uuid, text: &str) -> Result<Comment, StorageError>;

    /// Deletes a comment and returns what was deleted.
    async fn delete_comment(&self, id: Uuid) -> Result<Comment, StorageError>;

    // ==================== Metadata ====================

    /// Returns the name of this storage backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}
