//! Streaming attachment ingestion.
//!
//! A multipart body is parsed incrementally, validated as it arrives and
//! forwarded to the object store while still being received. Nothing is
//! persisted unless the whole body passes validation.

pub mod error;
pub mod session;
mod sink;
pub mod source;
pub mod transform;

use std::sync::Arc;
use std::time::Duration;

use taskvault_core::attachment::AttachmentDescriptor;
use taskvault_core::UploadPolicy;
use taskvault_store::ObjectStore;

pub use error::UploadFailure;
pub use session::{SessionState, UploadSession};
pub use source::{parse_boundary, MultipartSource, PartEvent, PartHeader, PartSource};
pub use transform::ImageTransform;

pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub policy: UploadPolicy,
    /// When set, accepted images are buffered, downscaled and stored as WebP.
    pub transform: Option<ImageTransform>,
    /// Upper bound on waiting for the store to discard an aborted write.
    /// Committed writes are always awaited to completion.
    pub settle_timeout: Duration,
    /// Chunks buffered between the parser and the store writer.
    pub channel_capacity: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            policy: UploadPolicy::default(),
            transform: Some(ImageTransform::default()),
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    config: Arc<UploadConfig>,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, config: UploadConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Run one upload to completion. The caller owns the ledger: on `Ok` the
    /// object is durable but not yet attached to the task.
    pub async fn upload(
        &self,
        task_id: &str,
        source: &mut dyn PartSource,
    ) -> Result<AttachmentDescriptor, UploadFailure> {
        let session = UploadSession::new(task_id, self.store.clone(), self.config.clone());
        drive(session, source).await.into_result()
    }
}

/// Feed every event from `source` into `session`, then resolve it.
pub async fn drive(mut session: UploadSession, source: &mut dyn PartSource) -> SessionState {
    loop {
        match source.next_event().await {
            Ok(PartEvent::PartStarted(header)) => session.on_part_started(header).await,
            Ok(PartEvent::Chunk(bytes)) => session.on_chunk(bytes).await,
            Ok(PartEvent::Finished) => break,
            Err(failure) => {
                session.fail(failure).await;
                source.discard_remaining().await;
                break;
            }
        }
    }
    session.finish().await
}

/// Consume and discard the rest of a body that will not be processed.
pub async fn drain(source: &mut dyn PartSource) {
    loop {
        match source.next_event().await {
            Ok(PartEvent::Finished) => return,
            Ok(_) => {}
            Err(_) => return source.discard_remaining().await,
        }
    }
}
