//! Content item queries.

use chrono::{DateTime, Utc};
use contentgrid_storage::{ContentItem, ContentPatch, StorageError};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgPool;
use uuid::Uuid;

use super::{map_error, map_insert_error};

type ItemRow = (Uuid, String, String, String, DateTime<Utc>);

const ITEM_COLUMNS: &str = "id, title, body, region, published_at";

fn from_row((id, title, body, region, published_at): ItemRow) -> ContentItem {
    ContentItem {
        id,
        title,
        body,
        region,
        published_at,
    }
}

pub async fn insert(pool: &PgPool, item: &ContentItem) -> Result<(), StorageError> {
    query(
        "INSERT INTO content_items (id, title, body, region, published_at) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(item.id)
    .bind(&item.title)
    .bind(&item.body)
    .bind(&item.region)
    .bind(item.published_at)
    .execute(pool)
    .await
    .map(|_| ())
    .map_err(|e| map_insert_error(e, "ContentItem", item.id))
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<ContentItem>, StorageError> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM content_items WHERE id = $1");
    let row: Option<ItemRow> = query_as(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_error)?;
    Ok(row.map(from_row))
}

pub async fn get_many(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<ContentItem>, StorageError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!("SELECT {ITEM_COLUMNS} FROM content_items WHERE id = ANY($1)");
    let rows: Vec<ItemRow> = query_as(&sql)
        .bind(ids.to_vec())
        .fetch_all(pool)
        .await
        .map_err(map_error)?;
    Ok(rows.into_iter().map(from_row).collect())
}

pub async fn list(
    pool: &PgPool,
    region: &str,
    skip: usize,
    take: usize,
) -> Result<Vec<ContentItem>, StorageError> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM content_items WHERE region = $1 \
         ORDER BY published_at DESC, id DESC OFFSET $2 LIMIT $3"
    );
    let rows: Vec<ItemRow> = query_as(&sql)
        .bind(region)
        .bind(to_i64(skip))
        .bind(to_i64(take))
        .fetch_all(pool)
        .await
        .map_err(map_error)?;
    Ok(rows.into_iter().map(from_row).collect())
}

pub async fn update(
    pool: &PgPool,
    id: Uuid,
    patch: &ContentPatch,
) -> Result<ContentItem, StorageError> {
    let sql = format!(
        "UPDATE content_items SET title = COALESCE($2, title), body = COALESCE($3, body) \
         WHERE id = $1 RETURNING {ITEM_COLUMNS}"
    );
    let row: Option<ItemRow> = query_as(&sql)
        .bind(id)
        .bind(patch.title.as_deref())
        .bind(patch.body.as_deref())
        .fetch_optional(pool)
        .await
        .map_err(map_error)?;
    row.map(from_row)
        .ok_or_else(|| StorageError::not_found("ContentItem", id))
}

pub async fn delete(pool: &PgPool, id: Uuid) -> Result<ContentItem, StorageError> {
    let sql = format!("DELETE FROM content_items WHERE id = $1 RETURNING {ITEM_COLUMNS}");
    let row: Option<ItemRow> = query_as(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_error)?;
    row.map(from_row)
        .ok_or_else(|| StorageError::not_found("ContentItem", id))
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
