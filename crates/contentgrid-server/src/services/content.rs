use contentgrid_storage::{ContentItem, ContentPatch, DynStorage};
use serde::Deserialize;
use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::cache::{Caches, warm};
use crate::ingest::{PublishReceipt, Publisher};
use crate::shard::{ResolvedShard, ShardSet};

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_BODY_CHARS: usize = 100_000;
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;
/// Largest offset both the cache ranks and SQL `OFFSET` can address.
pub const MAX_SKIP: usize = i64::MAX as usize;

#[derive(Debug, Clone, Deserialize)]
pub struct NewContent {
    pub title: String,
    pub body: String,
}

impl NewContent {
    pub fn validate(&self) -> ServiceResult<()> {
        validate_title(&self.title)?;
        validate_body(&self.body)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: usize,
    pub take: Option<usize>,
}

impl ListQuery {
    /// Page size after defaulting and clamping.
    pub fn take(&self) -> usize {
        self.take.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE)
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.skip > MAX_SKIP {
            return Err(ServiceError::validation(format!(
                "skip must be at most {MAX_SKIP}"
            )));
        }
        Ok(())
    }
}

fn validate_title(title: &str) -> ServiceResult<()> {
    if title.trim().is_empty() {
        return Err(ServiceError::validation("title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ServiceError::validation(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(())
}

fn validate_body(body: &str) -> ServiceResult<()> {
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(ServiceError::validation(format!(
            "body must be at most {MAX_BODY_CHARS} characters"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ContentService {
    shards: ShardSet,
    caches: Caches,
    publisher: Publisher,
}

impl ContentService {
    pub fn new(shards: ShardSet, caches: Caches, publisher: Publisher) -> Self {
        Self {
            shards,
            caches,
            publisher,
        }
    }

    fn route(&self, region: &str) -> ServiceResult<(ResolvedShard, DynStorage)> {
        Ok(self.shards.storage_for(region)?)
    }

    /// Synchronous create: stored before returning, then warmed.
    pub async fn create(&self, region: &str, new: NewContent) -> ServiceResult<ContentItem> {
        new.validate()?;
        let (resolved, storage) = self.route(region)?;

        let item = ContentItem::new(resolved.region, new.title, new.body);
        storage.insert_item(&item).await?;
        tracing::info!(id = %item.id, region = %item.region, shard = %resolved.shard, "Item created");

        warm::best_effort("created item", self.caches.warm_timeout, self.caches.lists.warm_item(&item)).await;
        Ok(item)
    }

    /// Asynchronous create through the publish log.
    pub async fn publish(&self, region: &str, new: NewContent) -> ServiceResult<PublishReceipt> {
        new.validate()?;
        Ok(self.publisher.publish(region, &new.title, &new.body).await?)
    }

    /// Cache-aside read. Items belong to the region they were created in;
    /// asking another region's route for them is a miss.
    pub async fn get(&self, region: &str, id: Uuid) -> ServiceResult<ContentItem> {
        let (resolved, storage) = self.route(region)?;
        let key = id.to_string();

        match self.caches.items.get(&resolved.region, &key).await {
            Ok(Some(item)) => return Ok(item),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Item cache unavailable, reading storage"),
        }

        let item = storage
            .get_item(id)
            .await?
            .filter(|item| item.region == resolved.region)
            .ok_or_else(|| ServiceError::not_found("ContentItem", id))?;

        warm::best_effort(
            "item",
            self.caches.warm_timeout,
            self.caches.items.put(&resolved.region, &key, &item),
        )
        .await;
        Ok(item)
    }

    pub async fn list(&self, region: &str, query: ListQuery) -> ServiceResult<Vec<ContentItem>> {
        query.validate()?;
        let (resolved, storage) = self.route(region)?;
        Ok(self
            .caches
            .lists
            .page(&resolved.region, query.skip, query.take(), &storage)
            .await?)
    }

    /// Storage first, then invalidate the cached blob.
    pub async fn update(&self, region: &str, id: Uuid, patch: ContentPatch) -> ServiceResult<ContentItem> {
        if patch.is_empty() {
            return Err(ServiceError::validation("patch must change title or body"));
        }
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        if let Some(body) = &patch.body {
            validate_body(body)?;
        }

        let (resolved, storage) = self.route(region)?;
        self.owned(&resolved, &storage, id).await?;
        let item = storage.update_item(id, &patch).await?;

        warm::best_effort(
            "item invalidation",
            self.caches.warm_timeout,
            self.caches.items.invalidate(&resolved.region, &id.to_string()),
        )
        .await;
        tracing::info!(id = %id, region = %resolved.region, "Item updated");
        Ok(item)
    }

    /// Storage first, then drop the blob, the list index entry and the
    /// item's cached comment list.
    pub async fn delete(&self, region: &str, id: Uuid) -> ServiceResult<ContentItem> {
        let (resolved, storage) = self.route(region)?;
        self.owned(&resolved, &storage, id).await?;
        let item = storage.delete_item(id).await?;

        let timeout = self.caches.warm_timeout;
        warm::best_effort("item invalidation", timeout, self.caches.items.invalidate(&resolved.region, &id.to_string())).await;
        warm::best_effort("list index removal", timeout, self.caches.lists.remove(&resolved.region, id)).await;
        warm::best_effort("comment list invalidation", timeout, self.caches.comments.invalidate(&resolved.region, id)).await;

        tracing::info!(id = %id, region = %resolved.region, "Item deleted");
        Ok(item)
    }

    async fn owned(&self, resolved: &ResolvedShard, storage: &DynStorage, id: Uuid) -> ServiceResult<()> {
        match storage.get_item(id).await? {
            Some(item) if item.region == resolved.region => Ok(()),
            _ => Err(ServiceError::not_found("ContentItem", id)),
        }
    }
}
