//! # contentgrid-storage
//!
//! Storage abstraction layer for ContentGrid shards.
//!
//! This crate defines the entity types and the [`ContentStorage`] trait that
//! every shard backend implements. It does not contain any implementations;
//! those live in `contentgrid-db-memory` and `contentgrid-db-postgres`.
//!
//! Every region maps to exactly one shard, and each shard is served by one
//! `ContentStorage` instance. The router that picks the shard lives in the
//! server crate.

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::ContentStorage;
pub use types::{
    Comment, ContentItem, ContentPatch, MAX_COMMENT_AUTHOR_CHARS, MAX_COMMENT_TEXT_CHARS,
    comment_order, listing_order, truncate_to_millis, validate_comment_text,
};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared storage trait object.
pub type DynStorage = std::sync::Arc<dyn ContentStorage>;
