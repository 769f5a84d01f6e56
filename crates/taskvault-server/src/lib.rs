pub mod auth;
pub mod config;
pub mod crypto;
mod routes;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

use std::sync::Arc;

use anyhow::Result;
use taskvault_db::Database;
use taskvault_service::LocalService;
use taskvault_store::{create_store, StoreConfig, UrlSigner};
use tokio::net::TcpListener;

use config::ServeConfig;

pub use routes::{build_router, AppState, InnerAppState};

/// Wire the store, upload pipeline and auth into shared state.
pub async fn build_state(db: Arc<dyn Database>, config: &ServeConfig) -> Result<AppState> {
    let signing_key = crypto::resolve_signing_key().map_err(anyhow::Error::msg)?;

    let mut store_config = StoreConfig::from_env();
    store_config.public_base_url = Some(config.public_url());
    store_config.signing_key = Some(signing_key.clone());
    let store = create_store(&store_config)?;
    let blob_signer = if store_config.is_s3() {
        None
    } else {
        Some(UrlSigner::new(&signing_key)?)
    };
    tracing::info!(
        backend = if store_config.is_s3() { "s3" } else { "local" },
        "object store ready"
    );

    let service = LocalService::new(db.clone(), store, config.upload_config())
        .with_presign_ttl(config.presign_ttl());
    let auth = auth::build_auth_config(db).await;

    Ok(Arc::new(InnerAppState {
        service,
        auth,
        blob_signer,
    }))
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let app = routes::build_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
