//! Entity types persisted in the region shards.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of a comment body, in characters.
pub const MAX_COMMENT_TEXT_CHARS: usize = 2000;

/// Maximum length of a comment author name, in characters.
pub const MAX_COMMENT_AUTHOR_CHARS: usize = 100;

/// A published piece of content.
///
/// `region` is the shard key and never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub region: String,
    pub published_at: DateTime<Utc>,
}

impl ContentItem {
    /// Creates a new item published now in the given (already normalized) region.
    pub fn new(region: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            body: body.into(),
            region: region.into(),
            published_at: truncate_to_millis(Utc::now()),
        }
    }

    /// Sort score used by the per-region list index (milliseconds since epoch).
    #[inline]
    pub fn list_score(&self) -> i64 {
        self.published_at.timestamp_millis()
    }
}

/// Partial update for a content item. The region cannot be changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl ContentPatch {
    /// Returns `true` if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none()
    }

    /// Applies the patch to an item in place.
    pub fn apply(&self, item: &mut ContentItem) {
        if let Some(title) = &self.title {
            item.title = title.clone();
        }
        if let Some(body) = &self.body {
            item.body = body.clone();
        }
    }
}

/// A comment attached to a content item.
///
/// `parent_item_id` is a logical reference only: the parent may live on a
/// different shard than the one the comment was written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub parent_item_id: Uuid,
    pub author: String,
    pub text: String,
    pub region: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// Creates a new comment written through `region`'s shard.
    pub fn new(
        parent_item_id: Uuid,
        region: impl Into<String>,
        author: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_item_id,
            author: author.into(),
            text: text.into(),
            region: region.into(),
            created_at: truncate_to_millis(Utc::now()),
        }
    }

    /// Checks author and text bounds.
    pub fn validate(&self) -> Result<(), String> {
        validate_comment_text(&self.text)?;
        let author_len = self.author.trim().chars().count();
        if author_len == 0 {
            return Err("author must not be empty".into());
        }
        if author_len > MAX_COMMENT_AUTHOR_CHARS {
            return Err(format!(
                "author must be at most {MAX_COMMENT_AUTHOR_CHARS} characters"
            ));
        }
        Ok(())
    }
}

/// Checks that comment text is non-empty and within bounds.
pub fn validate_comment_text(text: &str) -> Result<(), String> {
    let len = text.trim().chars().count();
    if len == 0 {
        return Err("text must not be empty".into());
    }
    if text.chars().count() > MAX_COMMENT_TEXT_CHARS {
        return Err(format!(
            "text must be at most {MAX_COMMENT_TEXT_CHARS} characters"
        ));
    }
    Ok(())
}

/// Truncates a timestamp to millisecond precision.
///
/// List index scores are whole milliseconds, so storage timestamps must be
/// too or the cache and storage orderings could disagree.
pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Listing order: newest first, ties broken by descending id.
pub fn listing_order(a: &ContentItem, b: &ContentItem) -> Ordering {
    b.published_at
        .cmp(&a.published_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// Comment order: oldest first, ties broken by ascending id.
pub fn comment_order(a: &Comment, b: &Comment) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_published_at_is_millisecond_precision() {
        let item = ContentItem::new("europe", "t", "b");
        assert_eq!(item.published_at.timestamp_subsec_nanos() % 1_000_000, 0);
        assert_eq!(item.list_score(), item.published_at.timestamp_millis());
    }

    #[test]
    fn test_listing_order_breaks_ties_by_id() {
        let mut a = ContentItem::new("europe", "a", "a");
        let mut b = ContentItem::new("europe", "b", "b");
        b.published_at = a.published_at;
        a.id = Uuid::from_u128(1);
        b.id = Uuid::from_u128(2);

        let mut items = vec![a.clone(), b.clone()];
        items.sort_by(listing_order);
        assert_eq!(items[0].id, b.id);

        // Uuid ordering matches the ordering of the canonical text form.
        assert!(a.id.to_string() < b.id.to_string());
    }

    #[test]
    fn test_comment_validation() {
        let parent = Uuid::new_v4();
        assert!(Comment::new(parent, "europe", "ann", "hello").validate().is_ok());
        assert!(Comment::new(parent, "europe", "ann", "   ").validate().is_err());
        assert!(Comment::new(parent, "europe", "", "hello").validate().is_err());

        let long = "x".repeat(MAX_COMMENT_TEXT_CHARS + 1);
        assert!(Comment::new(parent, "europe", "ann", long).validate().is_err());
    }

    #[test]
    fn test_patch_apply() {
        let mut item = ContentItem::new("europe", "old", "body");
        let patch = ContentPatch {
            title: Some("new".into()),
            body: None,
        };
        assert!(!patch.is_empty());
        patch.apply(&mut item);
        assert_eq!(item.title, "new");
        assert_eq!(item.body, "body");
        assert!(ContentPatch::default().is_empty());
    }
}
