use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::signing::{BlobMethod, UrlSigner};
use crate::{validate_key, ByteStream, ObjectStore, StoreConfig, StoreError};

/// In-progress streaming writes live here until renamed into place.
const STAGING_DIR: &str = ".staging";

const DEFAULT_PUBLIC_URL: &str = "http://127.0.0.1:3710";

pub struct LocalStore {
    base_dir: PathBuf,
    public_base_url: String,
    signer: UrlSigner,
}

impl LocalStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let base_dir = config
            .local_data_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let signer = match &config.signing_key {
            Some(key) => UrlSigner::new(key)?,
            None => UrlSigner::random()?,
        };
        let public_base_url = config
            .public_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_PUBLIC_URL.to_string());
        Ok(Self {
            base_dir,
            public_base_url,
            signer,
        })
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// The signer whose links this store issues; the blob routes verify with it.
    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.base_dir.join(key))
    }
}

/// Reproduce the same default data directory logic as `taskvault_db::data_dir()`
/// without taking a dependency on the db crate.
fn default_data_dir() -> PathBuf {
    let base = if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg)
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".local/share")
    } else {
        PathBuf::from(".")
    };
    base.join("taskvault").join("objects")
}

async fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::Internal(format!("mkdir: {e}")))?;
    }
    Ok(())
}

async fn write_staged(staged: &Path, body: &mut ByteStream) -> Result<u64, StoreError> {
    let mut file = tokio::fs::File::create(staged)
        .await
        .map_err(|e| StoreError::Internal(format!("create {}: {e}", staged.display())))?;
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| StoreError::Aborted(e.to_string()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| StoreError::Internal(format!("write {}: {e}", staged.display())))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| StoreError::Internal(format!("flush {}: {e}", staged.display())))?;
    Ok(written)
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        ensure_parent(&path).await?;
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| StoreError::Internal(format!("write {}: {e}", path.display())))
    }

    async fn put_stream(
        &self,
        key: &str,
        _content_type: &str,
        mut body: ByteStream,
    ) -> Result<u64, StoreError> {
        let path = self.resolve(key)?;
        let staged = self
            .base_dir
            .join(STAGING_DIR)
            .join(uuid::Uuid::new_v4().to_string());
        ensure_parent(&staged).await?;

        let written = match write_staged(&staged, &mut body).await {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staged).await;
                tracing::debug!(key, error = %e, "discarded staged write");
                return Err(e);
            }
        };

        ensure_parent(&path).await?;
        if let Err(e) = tokio::fs::rename(&staged, &path).await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(StoreError::Internal(format!(
                "rename into {}: {e}",
                path.display()
            )));
        }
        Ok(written)
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(StoreError::Internal(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Internal(format!(
                "delete {}: {e}",
                path.display()
            ))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let trimmed = prefix.trim_end_matches('/');
        let dir = if trimmed.is_empty() {
            self.base_dir.clone()
        } else {
            self.resolve(trimmed)?
        };
        if !dir.exists() {
            return Ok(vec![]);
        }
        let staging = self.base_dir.join(STAGING_DIR);
        let mut keys = Vec::new();
        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StoreError::Internal(format!(
                        "list {}: {e}",
                        current.display()
                    )))
                }
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::Internal(format!("read_dir entry: {e}")))?
            {
                let path = entry.path();
                let ft = entry
                    .file_type()
                    .await
                    .map_err(|e| StoreError::Internal(format!("file_type: {e}")))?;
                if ft.is_dir() {
                    if path != staging {
                        stack.push(path);
                    }
                } else if let Ok(rel) = path.strip_prefix(&self.base_dir) {
                    keys.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.resolve(key)?;
        match tokio::fs::try_exists(&path).await {
            Ok(exists) => Ok(exists),
            Err(e) => Err(StoreError::Internal(format!(
                "exists {}: {e}",
                path.display()
            ))),
        }
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StoreError> {
        validate_key(key)?;
        self.signer
            .signed_url(&self.public_base_url, BlobMethod::Get, key, ttl, None)
    }

    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        validate_key(key)?;
        self.signer.signed_url(
            &self.public_base_url,
            BlobMethod::Put,
            key,
            ttl,
            Some(content_type),
        )
    }
}
