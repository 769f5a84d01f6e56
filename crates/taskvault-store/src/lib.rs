mod local;
#[cfg(feature = "s3")]
mod s3;
pub mod signing;

pub use local::LocalStore;
#[cfg(feature = "s3")]
pub use s3::S3Store;
pub use signing::{BlobGrant, BlobMethod, SignatureError, UrlSigner};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The body stream of a streaming write failed; nothing was stored.
    #[error("upload aborted: {0}")]
    Aborted(String),

    #[error("store error: {0}")]
    Internal(String),
}

/// Body of a streaming write. An `Err` item aborts the write.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// A store for opaque blobs keyed by string paths.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write (create or overwrite) an object.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError>;

    /// Write an object from a byte stream, returning the number of bytes stored.
    ///
    /// The object becomes visible only once the stream ends cleanly. If the
    /// stream yields an error the partial write is discarded and
    /// `StoreError::Aborted` is returned.
    async fn put_stream(
        &self,
        key: &str,
        content_type: &str,
        body: ByteStream,
    ) -> Result<u64, StoreError>;

    /// Read an object. Returns `StoreError::NotFound` if absent.
    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;

    /// Delete an object. No-op if absent.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List object keys under a prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Check if an object exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// A URL granting read access to one object until `ttl` elapses.
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StoreError>;

    /// A URL granting a single write of `content_type` to `key` until `ttl` elapses.
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, StoreError>;
}

// -- Key helpers --

pub const TASKS_PREFIX: &str = "tasks/";

pub fn task_attachments_prefix(task_id: &str) -> String {
    format!("tasks/{task_id}/attachments/")
}

pub fn task_attachment_key(task_id: &str, token: &str, filename: &str) -> String {
    format!("tasks/{task_id}/attachments/{token}/{filename}")
}

/// A fresh, never-reused key for an upload to `task_id`.
pub fn derive_attachment_key(task_id: &str, filename: &str) -> String {
    let token = uuid::Uuid::new_v4().to_string();
    task_attachment_key(task_id, &token, &sanitize_filename(filename))
}

/// Replace everything outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Keys are relative, slash-separated paths without `.`/`..` segments.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let ok = !key.is_empty()
        && !key.starts_with('/')
        && !key.contains('\\')
        && key
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..");
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

pub fn content_type_for_key(key: &str) -> &'static str {
    let ext = key
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

// -- Configuration --

/// Configuration for the object store backend.
#[derive(Default)]
pub struct StoreConfig {
    /// S3-compatible endpoint URL (e.g., "http://127.0.0.1:3900").
    /// When `None`, use local filesystem.
    pub endpoint_url: Option<String>,
    /// S3 region (e.g., "garage", "us-east-1").
    pub region: Option<String>,
    /// S3 bucket name.
    pub bucket: Option<String>,
    /// AWS access key ID.
    pub access_key_id: Option<String>,
    /// AWS secret access key.
    pub secret_access_key: Option<String>,
    /// Local filesystem base directory (used when S3 is not configured).
    pub local_data_dir: Option<String>,
    /// Externally reachable server URL that local presigned links point at.
    pub public_base_url: Option<String>,
    /// HMAC key for local presigned links. A random key is used when unset,
    /// which invalidates outstanding links on restart.
    pub signing_key: Option<Vec<u8>>,
}

impl StoreConfig {
    /// Build from environment variables.
    /// If `TASKVAULT_S3_ENDPOINT` (or `AWS_ENDPOINT_URL`) is set along with
    /// credentials and a bucket name, use S3. Otherwise, fall back to local filesystem.
    pub fn from_env() -> Self {
        Self {
            endpoint_url: std::env::var("TASKVAULT_S3_ENDPOINT")
                .or_else(|_| std::env::var("AWS_ENDPOINT_URL"))
                .ok(),
            region: std::env::var("TASKVAULT_S3_REGION")
                .or_else(|_| std::env::var("AWS_REGION"))
                .ok(),
            bucket: std::env::var("TASKVAULT_S3_BUCKET")
                .or_else(|_| std::env::var("AWS_S3_BUCKET"))
                .ok(),
            access_key_id: std::env::var("TASKVAULT_S3_ACCESS_KEY_ID")
                .or_else(|_| std::env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_access_key: std::env::var("TASKVAULT_S3_SECRET_ACCESS_KEY")
                .or_else(|_| std::env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            local_data_dir: std::env::var("TASKVAULT_STORE_DIR").ok(),
            public_base_url: None,
            signing_key: None,
        }
    }

    pub fn is_s3(&self) -> bool {
        self.endpoint_url.is_some()
            && self.access_key_id.is_some()
            && self.secret_access_key.is_some()
            && self.bucket.is_some()
    }
}

// -- Factory --

/// Create an `ObjectStore` from configuration.
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
    if config.is_s3() {
        #[cfg(feature = "s3")]
        {
            Ok(Arc::new(S3Store::new(config)?))
        }
        #[cfg(not(feature = "s3"))]
        {
            Err(StoreError::Internal(
                "S3 configuration detected but the 's3' feature is not enabled".into(),
            ))
        }
    } else {
        Ok(Arc::new(LocalStore::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_helpers_produce_expected_paths() {
        assert_eq!(
            task_attachment_key("abc-123", "att-1", "image.png"),
            "tasks/abc-123/attachments/att-1/image.png"
        );
        assert_eq!(
            task_attachments_prefix("abc-123"),
            "tasks/abc-123/attachments/"
        );
    }

    #[test]
    fn derived_keys_are_unique_and_scoped() {
        let a = derive_attachment_key("t1", "cat photo.png");
        let b = derive_attachment_key("t1", "cat photo.png");
        assert_ne!(a, b);
        assert!(a.starts_with("tasks/t1/attachments/"));
        assert!(a.ends_with("/cat_photo.png"));
        assert!(validate_key(&a).is_ok());
    }

    #[test]
    fn sanitize_filename_replaces_unsafe_chars() {
        assert_eq!(sanitize_filename("report-v1.2_final.png"), "report-v1.2_final.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("héllo wörld.jpg"), "h_llo_w_rld.jpg");
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename(".."), "file");
    }

    #[test]
    fn validate_key_rejects_traversal() {
        assert!(validate_key("tasks/a/attachments/b/c.png").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("tasks/../../secret").is_err());
        assert!(validate_key("tasks//x").is_err());
        assert!(validate_key("tasks\\x").is_err());
    }

    #[test]
    fn content_type_detection() {
        assert_eq!(content_type_for_key("tasks/a/attachments/b/x.PNG"), "image/png");
        assert_eq!(content_type_for_key("x.jpeg"), "image/jpeg");
        assert_eq!(content_type_for_key("x.webp"), "image/webp");
        assert_eq!(content_type_for_key("notes/readme.md"), "application/octet-stream");
        assert_eq!(content_type_for_key("dir.v2/noext"), "application/octet-stream");
    }

    #[test]
    fn store_config_is_s3_requires_all_fields() {
        let config = StoreConfig {
            endpoint_url: Some("http://localhost:3900".into()),
            region: Some("garage".into()),
            bucket: Some("taskvault".into()),
            access_key_id: Some("key".into()),
            secret_access_key: Some("secret".into()),
            ..Default::default()
        };
        assert!(config.is_s3());

        // Missing bucket
        let config = StoreConfig {
            endpoint_url: Some("http://localhost:3900".into()),
            access_key_id: Some("key".into()),
            secret_access_key: Some("secret".into()),
            ..Default::default()
        };
        assert!(!config.is_s3());

        // Missing credentials
        let config = StoreConfig {
            endpoint_url: Some("http://localhost:3900".into()),
            bucket: Some("taskvault".into()),
            ..Default::default()
        };
        assert!(!config.is_s3());

        assert!(!StoreConfig::default().is_s3());
    }

    #[test]
    fn create_store_local_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            local_data_dir: Some(tmp.path().to_string_lossy().to_string()),
            ..Default::default()
        };
        assert!(!config.is_s3());
        let store = create_store(&config);
        assert!(store.is_ok(), "local store creation should succeed");
    }

    // These subtests mutate global env vars and must run sequentially
    // in a single test to avoid races with parallel test execution.
    #[test]
    fn store_config_from_env_variants() {
        use std::sync::Mutex;
        static ENV_LOCK: Mutex<()> = Mutex::new(());
        let _guard = ENV_LOCK.lock().unwrap();

        let clear_all = || {
            for var in [
                "TASKVAULT_S3_ENDPOINT", "AWS_ENDPOINT_URL",
                "TASKVAULT_S3_REGION", "AWS_REGION",
                "TASKVAULT_S3_BUCKET", "AWS_S3_BUCKET",
                "TASKVAULT_S3_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID",
                "TASKVAULT_S3_SECRET_ACCESS_KEY", "AWS_SECRET_ACCESS_KEY",
                "TASKVAULT_STORE_DIR",
            ] {
                std::env::remove_var(var);
            }
        };

        // No vars set
        clear_all();
        let config = StoreConfig::from_env();
        assert!(config.endpoint_url.is_none());
        assert!(config.bucket.is_none());
        assert!(config.local_data_dir.is_none());
        assert!(!config.is_s3());

        // AWS_* fallbacks
        clear_all();
        std::env::set_var("AWS_ENDPOINT_URL", "http://aws-endpoint:443");
        std::env::set_var("AWS_REGION", "us-west-2");
        std::env::set_var("AWS_ACCESS_KEY_ID", "aws-key");
        std::env::set_var("AWS_SECRET_ACCESS_KEY", "aws-secret");
        std::env::set_var("AWS_S3_BUCKET", "my-bucket");
        let config = StoreConfig::from_env();
        assert_eq!(config.endpoint_url.as_deref(), Some("http://aws-endpoint:443"));
        assert_eq!(config.region.as_deref(), Some("us-west-2"));
        assert_eq!(config.bucket.as_deref(), Some("my-bucket"));
        assert!(config.is_s3());

        // TASKVAULT_S3_* take precedence over AWS_*
        clear_all();
        std::env::set_var("TASKVAULT_S3_ENDPOINT", "http://taskvault:3900");
        std::env::set_var("AWS_ENDPOINT_URL", "http://aws:443");
        std::env::set_var("TASKVAULT_S3_BUCKET", "tv-bucket");
        std::env::set_var("TASKVAULT_S3_ACCESS_KEY_ID", "tv-key");
        std::env::set_var("TASKVAULT_S3_SECRET_ACCESS_KEY", "tv-secret");
        let config = StoreConfig::from_env();
        assert_eq!(config.endpoint_url.as_deref(), Some("http://taskvault:3900"));
        assert_eq!(config.bucket.as_deref(), Some("tv-bucket"));
        assert_eq!(config.access_key_id.as_deref(), Some("tv-key"));

        clear_all();
    }
}
