use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use taskvault_store::{ByteStream, ObjectStore, StoreError};

/// The store writer stopped accepting chunks before the upload was finished.
#[derive(Debug)]
pub(crate) struct WriterStopped;

/// A store write running concurrently with the inbound parse.
///
/// Chunks travel over a bounded channel to a spawned `put_stream`. The body
/// stream the store sees ends cleanly only after [`InFlightUpload::finish`]
/// sends the commit signal; any other way of closing the channel (abort, a
/// dropped handle) surfaces as an I/O error, so the store discards the write.
pub(crate) struct InFlightUpload {
    key: String,
    tx: Option<mpsc::Sender<Bytes>>,
    commit: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<u64, StoreError>>>,
}

impl InFlightUpload {
    pub(crate) fn start(
        store: Arc<dyn ObjectStore>,
        key: String,
        content_type: String,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Bytes>(capacity.max(1));
        let (commit_tx, commit_rx) = oneshot::channel::<()>();
        let body = committed_stream(rx, commit_rx);
        let writer_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = store.put_stream(&writer_key, &content_type, body).await;
            if let Err(ref e) = result {
                tracing::debug!(key = %writer_key, error = %e, "store write ended without commit");
            }
            result
        });
        Self {
            key,
            tx: Some(tx),
            commit: Some(commit_tx),
            handle: Some(handle),
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    /// Queue one chunk, waiting while the channel is full.
    pub(crate) async fn send(&mut self, chunk: Bytes) -> Result<(), WriterStopped> {
        match &self.tx {
            Some(tx) => tx.send(chunk).await.map_err(|_| WriterStopped),
            None => Err(WriterStopped),
        }
    }

    /// Close the body without committing. The writer discards what it has.
    pub(crate) fn signal_abort(&mut self) {
        self.commit.take();
        self.tx.take();
    }

    /// Commit the body and wait for the store to confirm durability.
    ///
    /// Not time-bounded: once the commit signal is sent the writer may make
    /// the object durable at any point, so the outcome has to be observed.
    pub(crate) async fn finish(mut self) -> Result<u64, StoreError> {
        if let Some(commit) = self.commit.take() {
            let _ = commit.send(());
        }
        self.tx.take();
        let Some(handle) = self.handle.take() else {
            return Err(StoreError::Internal(format!("upload {} already settled", self.key)));
        };
        handle
            .await
            .map_err(|e| StoreError::Internal(format!("upload task: {e}")))?
    }

    /// Wait for an uncommitted writer to stop, bounded by `timeout`. Only
    /// valid before [`InFlightUpload::finish`]: without the commit signal
    /// the writer can never make the object durable.
    pub(crate) async fn settle(&mut self, timeout: Duration) -> Result<u64, StoreError> {
        let Some(handle) = self.handle.take() else {
            return Err(StoreError::Internal(format!("upload {} already settled", self.key)));
        };
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StoreError::Internal(format!("upload task: {join_err}"))),
            Err(_) => Err(StoreError::Internal(format!(
                "upload {} did not settle within {timeout:?}",
                self.key
            ))),
        }
    }
}

impl Drop for InFlightUpload {
    fn drop(&mut self) {
        if self.handle.is_some() {
            // Dropping the senders below makes the writer abort on its own.
            tracing::warn!(key = %self.key, "upload dropped before settling, aborting");
        }
    }
}

fn committed_stream(rx: mpsc::Receiver<Bytes>, commit: oneshot::Receiver<()>) -> ByteStream {
    futures::stream::unfold(Some((rx, commit)), |state| async move {
        let (mut rx, mut commit) = state?;
        match rx.recv().await {
            Some(chunk) => Some((Ok(chunk), Some((rx, commit)))),
            None => match commit.try_recv() {
                Ok(()) => None,
                Err(_) => Some((
                    Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "upload closed before commit",
                    )),
                    None,
                )),
            },
        }
    })
    .boxed()
}
