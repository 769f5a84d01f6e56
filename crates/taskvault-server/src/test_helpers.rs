use std::sync::Arc;

use axum::Router;
use rand::RngCore;
use taskvault_db::{Database, SqliteDatabase};
use taskvault_service::LocalService;
use taskvault_store::{LocalStore, ObjectStore, StoreConfig, UrlSigner};
use taskvault_upload::UploadConfig;
use tokio::net::TcpListener;

use crate::auth::AuthConfig;
use crate::routes::{AppState, InnerAppState};

/// Upload settings for tests: default policy, no image transform.
pub fn test_upload_config() -> UploadConfig {
    UploadConfig {
        transform: None,
        ..Default::default()
    }
}

/// Local store in a fresh temp dir whose links point at `public_url`.
fn temp_store(public_url: Option<String>) -> (Arc<dyn ObjectStore>, UrlSigner) {
    let mut key = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    let config = StoreConfig {
        local_data_dir: Some(
            tempfile::tempdir()
                .unwrap()
                .keep()
                .to_string_lossy()
                .to_string(),
        ),
        public_base_url: public_url,
        signing_key: Some(key.clone()),
        ..Default::default()
    };
    let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(&config).unwrap());
    (store, UrlSigner::new(&key).unwrap())
}

fn build_state(
    store: Arc<dyn ObjectStore>,
    signer: UrlSigner,
    upload: UploadConfig,
    api_key: Option<&str>,
) -> AppState {
    let db: Arc<dyn Database> = Arc::new(SqliteDatabase::open_in_memory().unwrap());
    let auth = api_key.map(|key| {
        Arc::new(AuthConfig {
            env_key_hash: Some(crate::auth::sha256_hex(key)),
            db: db.clone(),
        })
    });
    Arc::new(InnerAppState {
        service: LocalService::new(db, store, upload),
        auth,
        blob_signer: Some(signer),
    })
}

/// App state with in-memory SQLite and a temp local store.
pub async fn test_state(upload: UploadConfig, api_key: Option<&str>) -> AppState {
    let (store, signer) = temp_store(None);
    build_state(store, signer, upload, api_key)
}

/// Build a test router with in-memory SQLite, temp local store, no auth.
pub async fn test_router() -> Router {
    crate::routes::build_router(test_state(test_upload_config(), None).await)
}

/// Build a test router with auth enabled, returning (router, api_key).
pub async fn test_router_with_auth() -> (Router, String) {
    let api_key = crate::auth::generate_api_key();
    let state = test_state(test_upload_config(), Some(&api_key)).await;
    (crate::routes::build_router(state), api_key)
}

/// A running test server with base_url and background task handle.
pub struct TestServer {
    pub base_url: String,
    pub state: AppState,
    _handle: tokio::task::JoinHandle<()>,
}

/// Spawn an axum test server on a random port. Returns the TestServer
/// with the `base_url` (e.g. "http://127.0.0.1:12345").
pub async fn spawn_test_server() -> TestServer {
    spawn_test_server_with(test_upload_config(), |store| store).await
}

/// Like [`spawn_test_server`], with custom upload settings and a hook to wrap
/// the object store (e.g. to inject failures).
pub async fn spawn_test_server_with(
    upload: UploadConfig,
    wrap_store: impl FnOnce(Arc<dyn ObjectStore>) -> Arc<dyn ObjectStore>,
) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{addr}");

    let (store, signer) = temp_store(Some(base_url.clone()));
    let state = build_state(wrap_store(store), signer, upload, None);
    let app = crate::routes::build_router(state.clone());
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestServer {
        base_url,
        state,
        _handle: handle,
    }
}
