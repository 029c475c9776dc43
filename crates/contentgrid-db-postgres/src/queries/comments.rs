//! Comment queries.

use chrono::{DateTime, Utc};
use contentgrid_storage::{Comment, StorageError};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgPool;
use uuid::Uuid;

use super::{map_error, map_insert_error};

type CommentRow = (Uuid, Uuid, String, String, String, DateTime<Utc>);

const COMMENT_COLUMNS: &str = "id, parent_item_id, author, text, region, created_at";

fn from_row((id, parent_item_id, author, text, region, created_at): CommentRow) -> Comment {
    Comment {
        id,
        parent_item_id,
        author,
        text,
        region,
        created_at,
    }
}

pub async fn insert(pool: &PgPool, comment: &Comment) -> Result<(), StorageError> {
    query(
        "INSERT INTO comments (id, parent_item_id, author, text, region, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(comment.id)
    .bind(comment.parent_item_id)
    .bind(&comment.author)
    .bind(&comment.text)
    .bind(&comment.region)
    .bind(comment.created_at)
    .execute(pool)
    .await
    .map(|_| ())
    .map_err(|e| map_insert_error(e, "Comment", comment.id))
}

pub async fn list_for_parent(pool: &PgPool, parent_item_id: Uuid) -> Result<Vec<Comment>, StorageError> {
    let sql = format!(
        "SELECT {COMMENT_COLUMNS} FROM comments WHERE parent_item_id = $1 \
         ORDER BY created_at ASC, id ASC"
    );
    let rows: Vec<CommentRow> = query_as(&sql)
        .bind(parent_item_id)
        .fetch_all(pool)
        .await
        .map_err(map_error)?;
    Ok(rows.into_iter().map(from_row).collect())
}

pub async fn update_text(pool: &PgPool, id: Uuid, text: &str) -> Result<Comment, StorageError> {
    let sql = format!("UPDATE comments SET text = $2 WHERE id = $1 RETURNING {COMMENT_COLUMNS}");
    let row: Option<CommentRow> = query_as(&sql)
        .bind(id)
        .bind(text)
        .fetch_optional(pool)
        .await
        .map_err(map_error)?;
    row.map(from_row)
        .ok_or_else(|| StorageError::not_found("Comment", id))
}

pub async fn delete(pool: &PgPool, id: Uuid) -> Result<Comment, StorageError> {
    let sql = format!("DELETE FROM comments WHERE id = $1 RETURNING {COMMENT_COLUMNS}");
    let row: Option<CommentRow> = query_as(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_error)?;
    row.map(from_row)
        .ok_or_else(|| StorageError::not_found("Comment", id))
}
