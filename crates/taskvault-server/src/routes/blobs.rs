//! Signed, unauthenticated access to objects on the local store. These are
//! the targets of the links the local store presigns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use serde_json::json;
use taskvault_core::policy::mime_essence;
use taskvault_store::{content_type_for_key, BlobGrant, BlobMethod, ByteStream, StoreError};

use super::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/blobs/{*key}", get(get_blob).put(put_blob))
}

fn reject(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(json!({ "error": msg.into() }))).into_response()
}

fn store_error(e: StoreError) -> Response {
    match e {
        StoreError::NotFound(_) => reject(StatusCode::NOT_FOUND, "object not found"),
        StoreError::InvalidKey(msg) => reject(StatusCode::BAD_REQUEST, msg),
        StoreError::Aborted(_) => reject(StatusCode::BAD_REQUEST, "upload aborted"),
        StoreError::Internal(msg) => {
            tracing::error!(error = %msg, "blob request failed");
            reject(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}

fn verify(state: &AppState, method: BlobMethod, key: &str, grant: &BlobGrant) -> Result<(), Response> {
    let Some(ref signer) = state.blob_signer else {
        return Err(reject(StatusCode::NOT_FOUND, "not found"));
    };
    signer
        .verify(method, key, grant, chrono::Utc::now().timestamp())
        .map_err(|e| {
            tracing::debug!(%key, error = %e, "rejected blob link");
            reject(StatusCode::FORBIDDEN, e.to_string())
        })
}

async fn get_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(grant): Query<BlobGrant>,
) -> Response {
    if let Err(resp) = verify(&state, BlobMethod::Get, &key, &grant) {
        return resp;
    }
    match state.service.store().get(&key).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type_for_key(&key))], bytes).into_response(),
        Err(e) => store_error(e),
    }
}

async fn put_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(grant): Query<BlobGrant>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if let Err(resp) = verify(&state, BlobMethod::Put, &key, &grant) {
        return resp;
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");
    if let Some(ref signed) = grant.content_type {
        if mime_essence(signed) != mime_essence(content_type) {
            return reject(
                StatusCode::FORBIDDEN,
                format!("link is only valid for {signed}"),
            );
        }
    }

    let limit = state.service.policy().max_upload_bytes;
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit) {
        return reject(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("file exceeds the {limit} byte limit"),
        );
    }

    let exceeded = Arc::new(AtomicBool::new(false));
    let body = limited(body, limit, exceeded.clone());
    match state.service.store().put_stream(&key, content_type, body).await {
        Ok(written) => {
            tracing::info!(%key, bytes = written, "blob stored via signed link");
            StatusCode::OK.into_response()
        }
        Err(_) if exceeded.load(Ordering::SeqCst) => reject(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("file exceeds the {limit} byte limit"),
        ),
        Err(e) => store_error(e),
    }
}

/// The request body as a store stream that fails once `limit` is passed.
fn limited(body: Body, limit: u64, exceeded: Arc<AtomicBool>) -> ByteStream {
    body.into_data_stream()
        .scan(0u64, move |seen, chunk| {
            let item = match chunk {
                Ok(bytes) => {
                    *seen += bytes.len() as u64;
                    if *seen > limit {
                        exceeded.store(true, Ordering::SeqCst);
                        Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "body exceeds upload limit",
                        ))
                    } else {
                        Ok(bytes)
                    }
                }
                Err(e) => Err(std::io::Error::new(std::io::ErrorKind::ConnectionAborted, e)),
            };
            futures::future::ready(Some(item))
        })
        .boxed()
}
