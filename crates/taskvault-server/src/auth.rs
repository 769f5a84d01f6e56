//! Bearer-key authentication for the task API.
//!
//! A request is let through when its `Authorization: Bearer <key>` header
//! hashes to the `TASKVAULT_API_KEY` env key or to a key stored in the
//! database. With neither configured the API is open.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use rand::{distributions::Alphanumeric, Rng};
use serde_json::json;
use sha2::{Digest, Sha256};

use taskvault_db::Database;

use crate::routes::AppState;

pub const KEY_PREFIX: &str = "tv_";
const KEY_RANDOM_LEN: usize = 43;

pub struct AuthConfig {
    /// SHA-256 of `TASKVAULT_API_KEY`, when set.
    pub env_key_hash: Option<String>,
    pub db: Arc<dyn Database>,
}

/// Which configured key a bearer token matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    EnvKey,
    StoredKey { id: String, name: String },
}

impl AuthConfig {
    /// Match a raw bearer token against the env key, then the stored keys.
    pub async fn authenticate(&self, token: &str) -> Option<Credential> {
        let token_hash = sha256_hex(token);
        if self
            .env_key_hash
            .as_deref()
            .is_some_and(|env_hash| constant_time_eq(token_hash.as_bytes(), env_hash.as_bytes()))
        {
            return Some(Credential::EnvKey);
        }

        match self.db.find_api_key_by_hash(&token_hash).await {
            Ok(Some(key)) => {
                let db = self.db.clone();
                let id = key.id.clone();
                tokio::spawn(async move {
                    if let Err(e) = db.touch_api_key(&id).await {
                        tracing::debug!(key_id = %id, error = %e, "touch api key failed");
                    }
                });
                Some(Credential::StoredKey {
                    id: key.id,
                    name: key.name,
                })
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!(error = %e, "api key lookup failed");
                None
            }
        }
    }
}

/// Hex-encoded SHA-256 of a raw key.
pub fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// A fresh key: `tv_` followed by 43 random alphanumerics.
pub fn generate_api_key() -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("{KEY_PREFIX}{random}")
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "missing or invalid API key" })),
    )
        .into_response()
}

/// Route layer guarding the task and attachment routes.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(ref auth) = state.auth else {
        return next.run(request).await;
    };
    let Some(token) = bearer_token(request.headers()) else {
        return unauthorized();
    };
    match auth.authenticate(token).await {
        Some(credential) => {
            tracing::trace!(?credential, path = %request.uri().path(), "authenticated");
            next.run(request).await
        }
        None => unauthorized(),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Auth settings from `TASKVAULT_API_KEY` and the stored keys. `None` means
/// open access.
pub async fn build_auth_config(db: Arc<dyn Database>) -> Option<Arc<AuthConfig>> {
    let env_key = std::env::var("TASKVAULT_API_KEY").ok();
    build_auth_config_with_key(db, env_key.as_deref()).await
}

pub async fn build_auth_config_with_key(
    db: Arc<dyn Database>,
    env_key: Option<&str>,
) -> Option<Arc<AuthConfig>> {
    let env_key_hash = env_key.filter(|k| !k.is_empty()).map(sha256_hex);
    let has_db_keys = match db.has_api_keys().await {
        Ok(has) => has,
        Err(e) => {
            tracing::warn!(error = %e, "could not check for stored api keys");
            false
        }
    };

    if env_key_hash.is_none() && !has_db_keys {
        return None;
    }
    Some(Arc::new(AuthConfig { env_key_hash, db }))
}
