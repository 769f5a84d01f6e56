pub mod attachments;
pub mod blobs;
pub mod health;
pub mod tasks;

use std::sync::Arc;

use axum::{http::StatusCode, middleware, Json, Router};
use serde_json::{json, Value};
use taskvault_service::{LocalService, ServiceError};
use taskvault_store::UrlSigner;
use tower_http::cors::CorsLayer;

use crate::auth::{auth_middleware, AuthConfig};

pub struct InnerAppState {
    pub service: LocalService,
    pub auth: Option<Arc<AuthConfig>>,
    /// Verifies `/blobs` links. Only set when objects live on local disk.
    pub blob_signer: Option<UrlSigner>,
}

pub type AppState = Arc<InnerAppState>;

pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .merge(health::routes())
        .merge(blobs::routes());

    let protected = Router::new()
        .merge(tasks::routes())
        .merge(attachments::routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    public
        .merge(protected)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub(crate) type ApiError = (StatusCode, Json<Value>);

/// Map a service error to its response. Server-side faults are logged and
/// reported with a generic message.
pub(crate) fn to_error(e: ServiceError) -> ApiError {
    let class = e.class();
    let status =
        StatusCode::from_u16(class.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let msg = if class.is_server_fault() {
        tracing::error!(error = %e, "request failed");
        "internal server error".to_string()
    } else {
        e.to_string()
    };
    (status, Json(json!({ "error": msg })))
}

/// Task ids are UUIDs; anything else is rejected before a lookup.
pub(crate) fn parse_task_id(id: &str) -> Result<(), ApiError> {
    uuid::Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| to_error(ServiceError::InvalidInput(format!("invalid task id '{id}'"))))
}
