//! The per-request upload state machine.
//!
//! ```text
//!   AwaitingFile --file part, allowed type--> Streaming --finish--> Completed
//!        |                                        |
//!        +--------disallowed / over limit / second file / error--> Failed
//! ```
//!
//! A failure never stops the parse: remaining parts are drained so the
//! connection stays usable. The first failure is the one reported.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use taskvault_core::attachment::AttachmentDescriptor;
use taskvault_store::{derive_attachment_key, sanitize_filename, ObjectStore, StoreError};

use crate::sink::InFlightUpload;
use crate::source::PartHeader;
use crate::{UploadConfig, UploadFailure};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug)]
pub enum SessionState {
    AwaitingFile,
    Streaming,
    Failed(UploadFailure),
    Completed(AttachmentDescriptor),
}

impl SessionState {
    pub fn into_result(self) -> Result<AttachmentDescriptor, UploadFailure> {
        match self {
            SessionState::Completed(descriptor) => Ok(descriptor),
            SessionState::Failed(failure) => Err(failure),
            SessionState::AwaitingFile => Err(UploadFailure::NoFile),
            SessionState::Streaming => Err(UploadFailure::Aborted),
        }
    }
}

/// What happens to the bytes of the part currently being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// The single accepted file.
    Accepting,
    /// A rejected file part, consumed and discarded.
    Draining,
    /// A plain form field.
    Ignored,
}

enum Sink {
    Stream(InFlightUpload),
    Buffer(BytesMut),
}

struct AcceptedFile {
    key: String,
    name: String,
    content_type: String,
}

pub struct UploadSession {
    task_id: String,
    store: Arc<dyn ObjectStore>,
    config: Arc<UploadConfig>,
    state: SessionState,
    bytes_seen: u64,
    part: Option<Disposition>,
    accepted: Option<AcceptedFile>,
    sink: Option<Sink>,
    /// An upload told to abort whose writer has not yet confirmed.
    aborting: Option<InFlightUpload>,
}

impl UploadSession {
    pub fn new(task_id: &str, store: Arc<dyn ObjectStore>, config: Arc<UploadConfig>) -> Self {
        Self {
            task_id: task_id.to_string(),
            store,
            config,
            state: SessionState::AwaitingFile,
            bytes_seen: 0,
            part: None,
            accepted: None,
            sink: None,
            aborting: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Bytes received for the accepted file, before any transform.
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    pub async fn on_part_started(&mut self, header: PartHeader) {
        let Some(file_name) = header.file_name else {
            self.part = Some(Disposition::Ignored);
            return;
        };

        match self.state {
            SessionState::AwaitingFile => {}
            SessionState::Streaming => {
                self.part = Some(Disposition::Draining);
                self.fail(UploadFailure::MultipleFiles).await;
                return;
            }
            SessionState::Failed(_) | SessionState::Completed(_) => {
                self.part = Some(Disposition::Draining);
                return;
            }
        }

        let content_type = header
            .content_type
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());
        if !self.config.policy.allows(&content_type) {
            self.part = Some(Disposition::Draining);
            self.fail(UploadFailure::UnsupportedType(content_type)).await;
            return;
        }

        let name = sanitize_filename(&file_name);
        let (key, sink) = match &self.config.transform {
            Some(transform) => (
                derive_attachment_key(&self.task_id, &transform.output_name(&name)),
                Sink::Buffer(BytesMut::new()),
            ),
            None => {
                let key = derive_attachment_key(&self.task_id, &name);
                let upload = InFlightUpload::start(
                    self.store.clone(),
                    key.clone(),
                    content_type.clone(),
                    self.config.channel_capacity,
                );
                (key, Sink::Stream(upload))
            }
        };
        tracing::debug!(task_id = %self.task_id, %key, %content_type, "accepted file part");

        self.accepted = Some(AcceptedFile {
            key,
            name,
            content_type,
        });
        self.sink = Some(sink);
        self.part = Some(Disposition::Accepting);
        self.state = SessionState::Streaming;
    }

    pub async fn on_chunk(&mut self, chunk: Bytes) {
        if self.part != Some(Disposition::Accepting) || !matches!(self.state, SessionState::Streaming) {
            return;
        }

        self.bytes_seen += chunk.len() as u64;
        if !self.config.policy.within_limit(self.bytes_seen) {
            self.part = Some(Disposition::Draining);
            let limit = self.config.policy.max_upload_bytes;
            self.fail(UploadFailure::TooLarge { limit }).await;
            return;
        }

        let stopped = match self.sink.as_mut() {
            Some(Sink::Stream(upload)) => upload.send(chunk).await.is_err(),
            Some(Sink::Buffer(buf)) => {
                buf.extend_from_slice(&chunk);
                false
            }
            None => false,
        };
        if stopped {
            // The writer only stops early on a store-side error; collect it.
            let err = match self.sink.take() {
                Some(Sink::Stream(mut upload)) => match upload.settle(self.config.settle_timeout).await {
                    Err(e) => e,
                    Ok(_) => StoreError::Internal("store writer stopped early".into()),
                },
                _ => StoreError::Internal("store writer stopped early".into()),
            };
            self.part = Some(Disposition::Draining);
            self.fail(UploadFailure::Storage(err)).await;
        }
    }

    /// Record a failure. The first one wins; any in-flight write is told to
    /// abort immediately and settled in [`UploadSession::finish`].
    pub async fn fail(&mut self, failure: UploadFailure) {
        if let SessionState::Failed(ref first) = self.state {
            tracing::debug!(task_id = %self.task_id, first = %first, ignored = %failure, "upload already failed");
            return;
        }
        tracing::info!(task_id = %self.task_id, error = %failure, bytes = self.bytes_seen, "upload rejected");
        self.state = SessionState::Failed(failure);
        match self.sink.take() {
            Some(Sink::Stream(mut upload)) => {
                upload.signal_abort();
                self.aborting = Some(upload);
            }
            Some(Sink::Buffer(_)) | None => {}
        }
    }

    /// Resolve the session once the inbound stream has ended. Always waits for
    /// the store writer, on failure paths too.
    pub async fn finish(mut self) -> SessionState {
        self.part = None;
        if matches!(self.state, SessionState::Streaming) {
            self.complete().await;
        }
        if let Some(mut upload) = self.aborting.take() {
            match upload.settle(self.config.settle_timeout).await {
                Err(StoreError::Aborted(_)) => {}
                Err(e) => tracing::warn!(key = upload.key(), error = %e, "aborted upload did not settle cleanly"),
                Ok(_) => tracing::warn!(key = upload.key(), "aborted upload was committed"),
            }
        }
        self.state
    }

    async fn complete(&mut self) {
        let Some(accepted) = self.accepted.take() else {
            self.state = SessionState::AwaitingFile;
            return;
        };
        if self.bytes_seen == 0 {
            self.fail(UploadFailure::EmptyFile).await;
            return;
        }

        let outcome = match self.sink.take() {
            Some(Sink::Stream(upload)) => upload
                .finish()
                .await
                .map(|written| (written, accepted.content_type.clone()))
                .map_err(UploadFailure::from),
            Some(Sink::Buffer(buf)) => self.transform_and_store(&accepted.key, buf.freeze()).await,
            None => Err(UploadFailure::Storage(StoreError::Internal(
                "no sink for accepted file".into(),
            ))),
        };

        match outcome {
            Ok((size, content_type)) => {
                tracing::info!(task_id = %self.task_id, key = %accepted.key, size, "upload stored");
                self.state = SessionState::Completed(AttachmentDescriptor {
                    key: accepted.key,
                    name: accepted.name,
                    size,
                    content_type,
                });
            }
            Err(failure) => self.fail(failure).await,
        }
    }

    async fn transform_and_store(
        &self,
        key: &str,
        input: Bytes,
    ) -> Result<(u64, String), UploadFailure> {
        let Some(transform) = self.config.transform.clone() else {
            return Err(UploadFailure::Transform("no transform configured".into()));
        };
        let output = tokio::task::spawn_blocking(move || transform.apply(&input))
            .await
            .map_err(|e| UploadFailure::Transform(e.to_string()))??;
        let size = output.len() as u64;
        let content_type = crate::ImageTransform::OUTPUT_CONTENT_TYPE;
        self.store.put(key, output, content_type).await?;
        Ok((size, content_type.to_string()))
    }
}
