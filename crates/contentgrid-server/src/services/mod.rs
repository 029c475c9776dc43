//! Request-side services.
//!
//! Built once at startup over the shard set and the caches and shared by
//! reference with every handler. Storage is the source of truth; caches are
//! read cache-aside, warmed best-effort and invalidated after writes.

pub mod comments;
pub mod content;

pub use comments::{CommentService, NewComment};
pub use content::{ContentService, ListQuery, NewContent};

use contentgrid_storage::StorageError;

use crate::ingest::IngestError;
use crate::shard::ConfigurationError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("{0}")]
    Validation(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("text rejected by moderation")]
    Rejected { matches: Vec<String> },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("publish log unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<IngestError> for ServiceError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Configuration(e) => ServiceError::Configuration(e),
            IngestError::Storage(e) => ServiceError::Storage(e),
            other => ServiceError::Unavailable(other.to_string()),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
