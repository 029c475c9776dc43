//! PostgreSQL implementation of the `ContentStorage` trait.

use async_trait::async_trait;
use sqlx_postgres::PgPool;
use uuid::Uuid;

use contentgrid_storage::{Comment, ContentItem, ContentPatch, ContentStorage, StorageError};

use crate::config::PostgresConfig;
use crate::pool;
use crate::queries::{comments, items};
use crate::schema::SchemaManager;

/// PostgreSQL storage backend for one shard.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
    schema_manager: SchemaManager,
}

impl PostgresStorage {
    /// Creates a new `PostgresStorage` with the given configuration.
    ///
    /// This will:
    /// 1. Create a connection pool
    /// 2. Create the schema (if configured)
    ///
    /// # Errors
    ///
    /// Returns an error if the connection pool cannot be created
    /// or if schema creation fails.
    pub async fn new(config: PostgresConfig) -> Result<Self, StorageError> {
        let pool = pool::create_pool(&config).await?;
        let storage = Self::from_pool(pool);

        if config.ensure_schema {
            storage.schema_manager.ensure_schema().await?;
        }

        Ok(storage)
    }

    /// Creates a new `PostgresStorage` from an existing connection pool.
    ///
    /// The schema is not created automatically when using this constructor.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        let schema_manager = SchemaManager::new(pool.clone());
        Self {
            pool,
            schema_manager,
        }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ContentStorage for PostgresStorage {
    async fn ensure_schema(&self) -> Result<(), StorageError> {
        self.schema_manager.ensure_schema().await.map_err(Into::into)
    }

    async fn insert_item(&self, item: &ContentItem) -> Result<(), StorageError> {
        items::insert(&self.pool, item).await
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<ContentItem>, StorageError> {
        items::get(&self.pool, id).await
    }

    async fn get_items(&self, ids: &[Uuid]) -> Result<Vec<ContentItem>, StorageError> {
        items::get_many(&self.pool, ids).await
    }

    async fn list_items(
        &self,
        region: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<ContentItem>, StorageError> {
        items::list(&self.pool, region, skip, take).await
    }

    async fn update_item(
        &self,
        id: Uuid,
        patch: &ContentPatch,
    ) -> Result<ContentItem, StorageError> {
        items::update(&self.pool, id, patch).await
    }

    async fn delete_item(&self, id: Uuid) -> Result<ContentItem, StorageError> {
        items::delete(&self.pool, id).await
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<(), StorageError> {
        comments::insert(&self.pool, comment).await
    }

    async fn list_comments(&self, parent_item_id: Uuid) -> Result<Vec<Comment>, StorageError> {
        comments::list_for_parent(&self.pool, parent_item_id).await
    }

    async fn update_comment(&self, id: Uuid, text: &str) -> Result<Comment, StorageError> {
        comments::update_text(&self.pool, id, text).await
    }

    async fn delete_comment(&self, id: Uuid) -> Result<Comment, StorageError> {
        comments::delete(&self.pool, id).await
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
