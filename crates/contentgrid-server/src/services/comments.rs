use contentgrid_storage::{Comment, DynStorage, validate_comment_text};
use serde::Deserialize;
use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::cache::{Caches, warm};
use crate::moderation::{ModerationDecision, ResilientModeration};
use crate::shard::{ResolvedShard, ShardSet};

#[derive(Debug, Clone, Deserialize)]
pub struct NewComment {
    pub author: String,
    pub text: String,
}

/// Comments are written through the shard of the route's region, which may
/// differ from the parent item's shard.
#[derive(Clone)]
pub struct CommentService {
    shards: ShardSet,
    caches: Caches,
    moderation: ResilientModeration,
}

impl CommentService {
    pub fn new(shards: ShardSet, caches: Caches, moderation: ResilientModeration) -> Self {
        Self {
            shards,
            caches,
            moderation,
        }
    }

    fn route(&self, region: &str) -> ServiceResult<(ResolvedShard, DynStorage)> {
        Ok(self.shards.storage_for(region)?)
    }

    async fn screen(&self, text: &str) -> ServiceResult<()> {
        match self.moderation.screen(text).await {
            ModerationDecision::Allow => Ok(()),
            ModerationDecision::Blocked { matches } => Err(ServiceError::Rejected { matches }),
        }
    }

    async fn invalidate_list(&self, region: &str, parent_item_id: Uuid) {
        warm::best_effort(
            "comment list invalidation",
            self.caches.warm_timeout,
            self.caches.comments.invalidate(region, parent_item_id),
        )
        .await;
    }

    /// Validate, moderate, insert, then drop the parent's cached list.
    pub async fn create(&self, region: &str, parent_item_id: Uuid, new: NewComment) -> ServiceResult<Comment> {
        let (resolved, storage) = self.route(region)?;
        let comment = Comment::new(parent_item_id, resolved.region.clone(), new.author, new.text);
        comment.validate().map_err(ServiceError::Validation)?;
        self.screen(&comment.text).await?;

        storage.insert_comment(&comment).await?;
        self.invalidate_list(&resolved.region, parent_item_id).await;
        tracing::info!(id = %comment.id, parent = %parent_item_id, region = %resolved.region, "Comment created");
        Ok(comment)
    }

    /// Cache-aside over the parent's whole list.
    pub async fn list(&self, region: &str, parent_item_id: Uuid) -> ServiceResult<Vec<Comment>> {
        let (resolved, storage) = self.route(region)?;

        match self.caches.comments.get(&resolved.region, parent_item_id).await {
            Ok(Some(comments)) => return Ok(comments),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Comment cache unavailable, reading storage"),
        }

        let comments = storage.list_comments(parent_item_id).await?;
        warm::best_effort(
            "comment list",
            self.caches.warm_timeout,
            self.caches.comments.put(&resolved.region, parent_item_id, &comments),
        )
        .await;
        Ok(comments)
    }

    pub async fn update(
        &self,
        region: &str,
        parent_item_id: Uuid,
        comment_id: Uuid,
        text: &str,
    ) -> ServiceResult<Comment> {
        validate_comment_text(text).map_err(ServiceError::Validation)?;
        let (resolved, storage) = self.route(region)?;
        self.owned(&storage, parent_item_id, comment_id).await?;
        self.screen(text).await?;

        let comment = storage.update_comment(comment_id, text).await?;
        self.invalidate_list(&resolved.region, parent_item_id).await;
        tracing::info!(id = %comment_id, parent = %parent_item_id, "Comment updated");
        Ok(comment)
    }

    pub async fn delete(&self, region: &str, parent_item_id: Uuid, comment_id: Uuid) -> ServiceResult<Comment> {
        let (resolved, storage) = self.route(region)?;
        self.owned(&storage, parent_item_id, comment_id).await?;

        let comment = storage.delete_comment(comment_id).await?;
        self.invalidate_list(&resolved.region, parent_item_id).await;
        tracing::info!(id = %comment_id, parent = %parent_item_id, "Comment deleted");
        Ok(comment)
    }

    /// The comment must exist on this shard under the given parent.
    async fn owned(&self, storage: &DynStorage, parent_item_id: Uuid, comment_id: Uuid) -> ServiceResult<()> {
        let comments = storage.list_comments(parent_item_id).await?;
        if comments.iter().any(|c| c.id == comment_id) {
            Ok(())
        } else {
            Err(ServiceError::not_found("Comment", comment_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheBackend;
    use crate::config::{CacheConfig, ModerationConfig};
    use crate::moderation::{ModerationClient, ModerationError, ModerationVerdict};
    use crate::shard::ShardRouter;
    use async_trait::async_trait;
    use contentgrid_db_memory::InMemoryStorage;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct Blocklist(&'static str);

    #[async_trait]
    impl ModerationClient for Blocklist {
        async fn check(&self, text: &str) -> Result<ModerationVerdict, ModerationError> {
            let is_profane = text.contains(self.0);
            Ok(ModerationVerdict {
                is_profane,
                matches: if is_profane { vec![self.0.to_string()] } else { Vec::new() },
            })
        }
    }

    fn service(moderation: ResilientModeration) -> (CommentService, Arc<InMemoryStorage>) {
        let router = ShardRouter::new([("global", "memory://global")]);
        let memory = Arc::new(InMemoryStorage::new());
        let storage: DynStorage = memory.clone();
        let shards = ShardSet::new(router, HashMap::from([("memory://global".to_string(), storage)])).unwrap();
        let caches = Caches::new(CacheBackend::new_local(), &CacheConfig::default());
        (CommentService::new(shards, caches, moderation), memory)
    }

    fn new_comment(text: &str) -> NewComment {
        NewComment {
            author: "ann".into(),
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn test_create_invalidates_cached_list() {
        let (service, _) = service(ResilientModeration::disabled());
        let parent = Uuid::new_v4();

        assert!(service.list("europe", parent).await.unwrap().is_empty());
        let comment = service.create("europe", parent, new_comment("first")).await.unwrap();
        assert_eq!(comment.region, "europe");
        assert_eq!(service.list("europe", parent).await.unwrap(), vec![comment]);
    }

    #[tokio::test]
    async fn test_list_is_served_from_cache() {
        let (service, memory) = service(ResilientModeration::disabled());
        let parent = Uuid::new_v4();
        service.create("europe", parent, new_comment("first")).await.unwrap();

        service.list("europe", parent).await.unwrap();
        let reads = memory.read_count();
        service.list("europe", parent).await.unwrap();
        assert_eq!(memory.read_count(), reads);
    }

    #[tokio::test]
    async fn test_flagged_comment_is_rejected() {
        let moderation = ResilientModeration::new(
            Arc::new(Blocklist("darn")),
            &ModerationConfig {
                enabled: true,
                ..ModerationConfig::default()
            },
        );
        let (service, memory) = service(moderation);

        let err = service
            .create("europe", Uuid::new_v4(), new_comment("well darn"))
            .await
            .unwrap_err();
        match err {
            ServiceError::Rejected { matches } => assert_eq!(matches, vec!["darn".to_string()]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(memory.comment_count(), 0);
    }

    #[tokio::test]
    async fn test_update_and_delete_check_parent() {
        let (service, _) = service(ResilientModeration::disabled());
        let parent = Uuid::new_v4();
        let comment = service.create("europe", parent, new_comment("first")).await.unwrap();

        let err = service
            .update("europe", Uuid::new_v4(), comment.id, "edited")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));

        let updated = service.update("europe", parent, comment.id, "edited").await.unwrap();
        assert_eq!(updated.text, "edited");
        assert_eq!(service.list("europe", parent).await.unwrap()[0].text, "edited");

        service.delete("europe", parent, comment.id).await.unwrap();
        assert!(service.list("europe", parent).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_text_is_invalid() {
        let (service, _) = service(ResilientModeration::disabled());
        let err = service
            .create("europe", Uuid::new_v4(), new_comment("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
