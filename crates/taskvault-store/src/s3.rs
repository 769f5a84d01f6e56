use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use s3::serde_types::Part;
use s3::Bucket;

use crate::{validate_key, ByteStream, ObjectStore, StoreConfig, StoreError};

/// Multipart part size. S3 requires at least 5 MiB for every part but the last.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Longest expiry S3 accepts for a presigned URL (7 days).
const MAX_PRESIGN_SECS: u64 = 7 * 24 * 60 * 60;

pub struct S3Store {
    bucket: Box<Bucket>,
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store").finish_non_exhaustive()
    }
}

impl S3Store {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let region = Region::Custom {
            region: config.region.clone().unwrap_or_else(|| "us-east-1".into()),
            endpoint: config.endpoint_url.clone().unwrap_or_default(),
        };

        let credentials = Credentials::new(
            config.access_key_id.as_deref(),
            config.secret_access_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|e| StoreError::Internal(format!("credentials: {e}")))?;

        let bucket_name = config
            .bucket
            .as_deref()
            .ok_or_else(|| StoreError::Internal("bucket name required".into()))?;

        let mut bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StoreError::Internal(format!("bucket: {e}")))?;
        bucket.set_path_style();

        Ok(Self { bucket })
    }

    /// Upload `first` and every following part, then complete the upload.
    async fn stream_parts(
        &self,
        key: &str,
        content_type: &str,
        upload_id: &str,
        first: Vec<u8>,
        mut body: ByteStream,
    ) -> Result<u64, StoreError> {
        let mut parts: Vec<Part> = Vec::new();
        let mut total = 0u64;
        let mut part_number = 1u32;
        let mut part = first;
        let mut ended = false;
        loop {
            if !part.is_empty() {
                total += part.len() as u64;
                let uploaded = self
                    .bucket
                    .put_multipart_chunk(part, key, part_number, upload_id, content_type)
                    .await
                    .map_err(map_s3_error)?;
                parts.push(uploaded);
                part_number += 1;
            }
            if ended {
                break;
            }
            (part, ended) = fill_part(&mut body).await?;
        }
        self.bucket
            .complete_multipart_upload(key, upload_id, parts)
            .await
            .map_err(map_s3_error)?;
        Ok(total)
    }
}

/// Read up to one part from `body`. The flag is true once the stream has ended.
async fn fill_part(body: &mut ByteStream) -> Result<(Vec<u8>, bool), StoreError> {
    let mut part = Vec::with_capacity(PART_SIZE);
    while part.len() < PART_SIZE {
        match body.next().await {
            Some(Ok(chunk)) => part.extend_from_slice(&chunk),
            Some(Err(e)) => return Err(StoreError::Aborted(e.to_string())),
            None => return Ok((part, true)),
        }
    }
    Ok((part, false))
}

fn map_s3_error(e: S3Error) -> StoreError {
    StoreError::Internal(format!("s3: {e}"))
}

fn expiry_secs(ttl: Duration) -> u32 {
    ttl.as_secs().clamp(1, MAX_PRESIGN_SECS) as u32
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.bucket
            .put_object_with_content_type(key, &data, content_type)
            .await
            .map_err(map_s3_error)?;
        Ok(())
    }

    async fn put_stream(
        &self,
        key: &str,
        content_type: &str,
        mut body: ByteStream,
    ) -> Result<u64, StoreError> {
        validate_key(key)?;
        let (first, ended) = fill_part(&mut body).await?;
        if ended {
            let len = first.len() as u64;
            self.bucket
                .put_object_with_content_type(key, &first, content_type)
                .await
                .map_err(map_s3_error)?;
            return Ok(len);
        }

        let upload = self
            .bucket
            .initiate_multipart_upload(key, content_type)
            .await
            .map_err(map_s3_error)?;
        let upload_id = upload.upload_id;

        match self
            .stream_parts(key, content_type, &upload_id, first, body)
            .await
        {
            Ok(total) => Ok(total),
            Err(e) => {
                if let Err(abort_err) = self.bucket.abort_upload(key, &upload_id).await {
                    tracing::warn!(key, error = %abort_err, "failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let response = self.bucket.get_object(key).await.map_err(map_s3_error)?;
        if response.status_code() == 404 {
            return Err(StoreError::NotFound(key.to_string()));
        }
        if response.status_code() >= 400 {
            return Err(StoreError::Internal(format!(
                "s3 get {}: status {}",
                key,
                response.status_code()
            )));
        }
        Ok(Bytes::from(response.to_vec()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let response = self.bucket.delete_object(key).await.map_err(map_s3_error)?;
        // 404 means already absent
        if response.status_code() >= 400 && response.status_code() != 404 {
            return Err(StoreError::Internal(format!(
                "s3 delete {}: status {}",
                key,
                response.status_code()
            )));
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let results = self
            .bucket
            .list(prefix.to_string(), None)
            .await
            .map_err(map_s3_error)?;

        let mut keys = Vec::new();
        for result in results {
            for object in result.contents {
                keys.push(object.key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let (_, status) = self.bucket.head_object(key).await.map_err(map_s3_error)?;
        match status {
            404 => Ok(false),
            s if s >= 400 => Err(StoreError::Internal(format!("s3 head {key}: status {s}"))),
            _ => Ok(true),
        }
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StoreError> {
        validate_key(key)?;
        self.bucket
            .presign_get(key, expiry_secs(ttl), None)
            .await
            .map_err(map_s3_error)
    }

    async fn presign_put(
        &self,
        key: &str,
        _content_type: &str,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        validate_key(key)?;
        self.bucket
            .presign_put(key, expiry_secs(ttl), None, None)
            .await
            .map_err(map_s3_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_endpoint_config() -> StoreConfig {
        StoreConfig {
            endpoint_url: Some("http://localhost:3900".into()),
            region: Some("garage".into()),
            bucket: Some("test-bucket".into()),
            access_key_id: Some("key".into()),
            secret_access_key: Some("secret".into()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_bucket_produces_error() {
        let config = StoreConfig {
            bucket: None,
            ..local_endpoint_config()
        };
        let err = S3Store::new(&config).unwrap_err();
        assert!(err.to_string().contains("bucket name required"));
    }

    #[test]
    fn valid_config_creates_store() {
        assert!(S3Store::new(&local_endpoint_config()).is_ok());
    }

    #[test]
    fn expiry_is_clamped() {
        assert_eq!(expiry_secs(Duration::from_secs(300)), 300);
        assert_eq!(expiry_secs(Duration::ZERO), 1);
        assert_eq!(expiry_secs(Duration::from_secs(30 * 24 * 3600)), 604_800);
    }

    #[tokio::test]
    async fn presign_get_is_offline() {
        let store = S3Store::new(&local_endpoint_config()).unwrap();
        let url = store
            .presign_get("tasks/t/attachments/u/a.png", Duration::from_secs(300))
            .await
            .unwrap();
        assert!(url.contains("tasks/t/attachments/u/a.png"));
        assert!(url.contains("X-Amz-Expires=300"));
    }

    #[tokio::test]
    async fn fill_part_stops_at_stream_end() {
        let mut body: ByteStream =
            futures::stream::iter(vec![Ok(Bytes::from("ab")), Ok(Bytes::from("c"))]).boxed();
        let (part, ended) = fill_part(&mut body).await.unwrap();
        assert_eq!(part, b"abc");
        assert!(ended);

        let mut failing: ByteStream = futures::stream::iter(vec![Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionAborted,
            "gone",
        ))])
        .boxed();
        assert!(matches!(
            fill_part(&mut failing).await,
            Err(StoreError::Aborted(_))
        ));
    }

    // -- S3 integration tests (require running Garage/MinIO) --

    fn s3_config() -> Option<StoreConfig> {
        let config = StoreConfig::from_env();
        if config.is_s3() {
            Some(config)
        } else {
            None
        }
    }

    #[tokio::test]
    #[ignore]
    async fn s3_crud_roundtrip() {
        let config = s3_config().expect("S3 not configured; skipped via #[ignore]");
        let store = S3Store::new(&config).unwrap();
        let key = "integration-test/crud-roundtrip.txt";

        store.put(key, Bytes::from("hello s3"), "text/plain").await.unwrap();
        let data = store.get(key).await.unwrap();
        assert_eq!(data.as_ref(), b"hello s3");
        assert!(store.exists(key).await.unwrap());

        store.delete(key).await.unwrap();
        let err = store.get(key).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        store.delete(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn s3_multipart_stream() {
        let config = s3_config().expect("S3 not configured; skipped via #[ignore]");
        let store = S3Store::new(&config).unwrap();
        let key = "integration-test/multipart.bin";
        let chunk = Bytes::from(vec![0x42u8; 1024 * 1024]);
        let body: ByteStream =
            futures::stream::iter((0..12).map(move |_| Ok(chunk.clone()))).boxed();

        let written = store.put_stream(key, "application/octet-stream", body).await.unwrap();
        assert_eq!(written, 12 * 1024 * 1024);
        assert_eq!(store.get(key).await.unwrap().len(), 12 * 1024 * 1024);

        store.delete(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn s3_aborted_stream_leaves_no_object() {
        let config = s3_config().expect("S3 not configured; skipped via #[ignore]");
        let store = S3Store::new(&config).unwrap();
        let key = "integration-test/aborted.bin";
        let chunk = Bytes::from(vec![0x42u8; 1024 * 1024]);
        let items: Vec<std::io::Result<Bytes>> = (0..10)
            .map(|_| Ok(chunk.clone()))
            .chain(std::iter::once(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "client gone",
            ))))
            .collect();

        let err = store
            .put_stream(key, "application/octet-stream", futures::stream::iter(items).boxed())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Aborted(_)));
        assert!(!store.exists(key).await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn s3_list_prefix() {
        let config = s3_config().expect("S3 not configured; skipped via #[ignore]");
        let store = S3Store::new(&config).unwrap();
        let prefix = "integration-test/list-prefix";

        for name in ["a.txt", "b.txt", "sub/c.txt"] {
            store
                .put(&format!("{prefix}/{name}"), Bytes::from(name), "text/plain")
                .await
                .unwrap();
        }

        let keys = store.list(prefix).await.unwrap();
        assert_eq!(keys.len(), 3);

        for key in &keys {
            store.delete(key).await.unwrap();
        }
    }
}
