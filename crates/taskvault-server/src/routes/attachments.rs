use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use taskvault_core::attachment::{AttachmentDescriptor, PresignPutRequest};
use taskvault_service::{ServiceError, TaskService};
use taskvault_upload::{parse_boundary, MultipartSource};

use super::{parse_task_id, to_error, ApiError, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/tasks/{id}/attachments",
            get(list_attachments)
                .post(upload_attachment)
                .delete(remove_attachment),
        )
        .route("/tasks/{id}/attachments/presign", post(presign_put))
        .route("/tasks/{id}/attachments/presign-get", get(presign_get))
        .route("/tasks/{id}/attachments/commit", post(commit_attachment))
}

#[derive(Debug, Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

impl KeyQuery {
    fn require(self) -> Result<String, ApiError> {
        self.key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| to_error(ServiceError::InvalidInput("key is required".into())))
    }
}

/// Read a request body to the end without keeping it.
async fn drain_body(body: Body) {
    let mut stream = body.into_data_stream();
    while let Some(Ok(_)) = stream.next().await {}
}

async fn list_attachments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    parse_task_id(&id)?;
    state
        .service
        .list_attachments(&id)
        .await
        .map(|a| Json(json!(a)))
        .map_err(to_error)
}

async fn upload_attachment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if let Err(e) = parse_task_id(&id) {
        drain_body(body).await;
        return Err(e);
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let boundary = match parse_boundary(content_type) {
        Ok(b) => b,
        Err(e) => {
            drain_body(body).await;
            return Err(to_error(e.into()));
        }
    };

    let mut source = MultipartSource::new(body.into_data_stream(), boundary);
    state
        .service
        .upload_attachment(&id, &mut source)
        .await
        .map(|t| (StatusCode::CREATED, Json(json!(t))))
        .map_err(to_error)
}

async fn remove_attachment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<KeyQuery>,
) -> Result<Json<Value>, ApiError> {
    parse_task_id(&id)?;
    let key = q.require()?;
    state
        .service
        .remove_attachment(&id, &key)
        .await
        .map(|t| Json(json!(t)))
        .map_err(to_error)
}

async fn presign_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<KeyQuery>,
) -> Result<Json<Value>, ApiError> {
    parse_task_id(&id)?;
    let key = q.require()?;
    state
        .service
        .presign_attachment_get(&id, &key)
        .await
        .map(|u| Json(json!(u)))
        .map_err(to_error)
}

async fn presign_put(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PresignPutRequest>,
) -> Result<Json<Value>, ApiError> {
    parse_task_id(&id)?;
    state
        .service
        .presign_attachment_put(&id, &request)
        .await
        .map(|u| Json(json!(u)))
        .map_err(to_error)
}

async fn commit_attachment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(descriptor): Json<AttachmentDescriptor>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    parse_task_id(&id)?;
    state
        .service
        .commit_attachment(&id, &descriptor)
        .await
        .map(|t| (StatusCode::CREATED, Json(json!(t))))
        .map_err(to_error)
}
