//! SQL query implementations.
//!
//! Queries are plain functions over a pool so the storage type stays a thin
//! adapter onto the `ContentStorage` trait.

pub mod comments;
pub mod items;

use contentgrid_storage::StorageError;
use sqlx_core::error::Error as SqlxError;

use crate::error::{PostgresError, is_unique_violation};

/// Maps a sqlx error from an insert, turning duplicate keys into `AlreadyExists`.
pub(crate) fn map_insert_error(err: SqlxError, entity: &'static str, id: uuid::Uuid) -> StorageError {
    if is_unique_violation(&err) {
        StorageError::already_exists(entity, id)
    } else {
        PostgresError::from(err).into()
    }
}

/// Maps any other sqlx error.
pub(crate) fn map_error(err: SqlxError) -> StorageError {
    PostgresError::from(err).into()
}
