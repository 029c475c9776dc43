use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use contentgrid_storage::{ContentPatch, ErrorCategory};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::server::AppState;
use crate::services::{ListQuery, NewComment, NewContent, ServiceError};

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
    cache: &'a str,
    log: &'a str,
}

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            cache: state.cache_mode,
            log: state.log_backend,
        }),
    )
}

/// Service errors rendered as JSON with the matching status code.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Storage(e) => match e.category() {
                ErrorCategory::NotFound => StatusCode::NOT_FOUND,
                ErrorCategory::Conflict => StatusCode::CONFLICT,
                ErrorCategory::Infrastructure | ErrorCategory::Internal => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self.0, status = status.as_u16(), "Request rejected");
        }

        let body = match &self.0 {
            ServiceError::Rejected { matches } => json!({
                "error": self.0.to_string(),
                "matches": matches,
            }),
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---- Content items ----

pub async fn create_item(
    State(state): State<AppState>,
    Path(region): Path<String>,
    Json(payload): Json<NewContent>,
) -> ApiResult<impl IntoResponse> {
    let item = state.content.create(&region, payload).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn publish_item(
    State(state): State<AppState>,
    Path(region): Path<String>,
    Json(payload): Json<NewContent>,
) -> ApiResult<impl IntoResponse> {
    let receipt = state.content.publish(&region, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

pub async fn list_items(
    State(state): State<AppState>,
    Path(region): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let items = state.content.list(&region, query).await?;
    Ok(Json(items))
}

pub async fn get_item(
    State(state): State<AppState>,
    Path((region, id)): Path<(String, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.content.get(&region, id).await?))
}

pub async fn update_item(
    State(state): State<AppState>,
    Path((region, id)): Path<(String, Uuid)>,
    Json(patch): Json<ContentPatch>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.content.update(&region, id, patch).await?))
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path((region, id)): Path<(String, Uuid)>,
) -> ApiResult<StatusCode> {
    state.content.delete(&region, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- Comments ----

#[derive(Debug, Deserialize)]
pub struct UpdateComment {
    pub text: String,
}

pub async fn list_comments(
    State(state): State<AppState>,
    Path((region, item_id)): Path<(String, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.comments.list(&region, item_id).await?))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Path((region, item_id)): Path<(String, Uuid)>,
    Json(payload): Json<NewComment>,
) -> ApiResult<impl IntoResponse> {
    let comment = state.comments.create(&region, item_id, payload).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn update_comment(
    State(state): State<AppState>,
    Path((region, item_id, comment_id)): Path<(String, Uuid, Uuid)>,
    Json(payload): Json<UpdateComment>,
) -> ApiResult<impl IntoResponse> {
    let comment = state
        .comments
        .update(&region, item_id, comment_id, &payload.text)
        .await?;
    Ok(Json(comment))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Path((region, item_id, comment_id)): Path<(String, Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    state.comments.delete(&region, item_id, comment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
