//! Schema management for the PostgreSQL shard backend.
//!
//! Every shard carries the same two tables. `content_items` is indexed for
//! the listing query (`region`, then newest first with the id as
//! tie-breaker); `comments` is indexed by parent.

use sqlx_core::query::query;
use sqlx_postgres::PgPool;
use tracing::{debug, info, instrument};

use crate::error::{PostgresError, Result};

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS content_items (
        id UUID PRIMARY KEY,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        region TEXT NOT NULL,
        published_at TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS content_items_region_listing_idx
        ON content_items (region, published_at DESC, id DESC)"#,
    r#"CREATE TABLE IF NOT EXISTS comments (
        id UUID PRIMARY KEY,
        parent_item_id UUID NOT NULL,
        author TEXT NOT NULL,
        text TEXT NOT NULL,
        region TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS comments_parent_idx
        ON comments (parent_item_id, created_at ASC, id ASC)"#,
];

/// Creates the shard's tables and indexes.
#[derive(Debug, Clone)]
pub struct SchemaManager {
    pool: PgPool,
}

impl SchemaManager {
    /// Creates a new `SchemaManager` with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates every table and index that does not exist yet.
    ///
    /// Idempotent; safe to run from several processes at once.
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA_STATEMENTS {
            debug!(statement = %first_line(statement), "Applying schema statement");
            query(*statement)
                .execute(&self.pool)
                .await
                .map_err(|e| PostgresError::Schema(e.to_string()))?;
        }
        info!("Shard schema is up to date");
        Ok(())
    }
}

fn first_line(statement: &str) -> &str {
    statement.lines().next().unwrap_or(statement).trim()
}
