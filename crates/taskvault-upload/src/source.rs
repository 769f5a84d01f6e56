//! Inbound multipart parsing, flattened into a pull-based event stream.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::UploadFailure;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type RawBody = Arc<Mutex<BoxStream<'static, Result<Bytes, BoxError>>>>;

/// One request body, pollable from more than one owner. The lock is held
/// only for the duration of a single poll.
struct SharedBody(RawBody);

impl Stream for SharedBody {
    type Item = Result<Bytes, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut body = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        body.poll_next_unpin(cx)
    }
}

/// Headers of one multipart part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeader {
    pub field_name: Option<String>,
    /// Present only for file parts.
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

impl PartHeader {
    pub fn is_file(&self) -> bool {
        self.file_name.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartEvent {
    PartStarted(PartHeader),
    /// Body bytes of the most recently started part.
    Chunk(Bytes),
    Finished,
}

/// Something that yields multipart events in body order.
#[async_trait]
pub trait PartSource: Send {
    async fn next_event(&mut self) -> Result<PartEvent, UploadFailure>;

    /// Read and drop whatever is left of the body after `next_event` failed.
    async fn discard_remaining(&mut self) {}
}

/// [`PartSource`] over a `multer` parser.
///
/// The parser reads the body through a shared handle so that the raw bytes
/// can still be drained once it has given up on them.
pub struct MultipartSource {
    multipart: multer::Multipart<'static>,
    current: Option<multer::Field<'static>>,
    raw: RawBody,
}

impl MultipartSource {
    pub fn new<S, O, E>(body: S, boundary: impl Into<String>) -> Self
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let raw: RawBody = Arc::new(Mutex::new(
            body.map(|item: Result<O, E>| -> Result<Bytes, BoxError> {
                item.map(Into::into).map_err(Into::into)
            })
            .fuse()
            .boxed(),
        ));
        Self {
            multipart: multer::Multipart::new(SharedBody(raw.clone()), boundary),
            current: None,
            raw,
        }
    }

    /// Parse the boundary out of a `multipart/form-data` content type.
    pub fn from_content_type<S, O, E>(content_type: &str, body: S) -> Result<Self, UploadFailure>
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let boundary = parse_boundary(content_type)?;
        Ok(Self::new(body, boundary))
    }
}

pub fn parse_boundary(content_type: &str) -> Result<String, UploadFailure> {
    multer::parse_boundary(content_type).map_err(|e| UploadFailure::Malformed(e.to_string()))
}

fn map_multer_error(e: multer::Error) -> UploadFailure {
    match e {
        multer::Error::StreamReadFailed(_) => UploadFailure::Aborted,
        other => UploadFailure::Malformed(other.to_string()),
    }
}

#[async_trait]
impl PartSource for MultipartSource {
    async fn next_event(&mut self) -> Result<PartEvent, UploadFailure> {
        if let Some(field) = self.current.as_mut() {
            match field.chunk().await {
                Ok(Some(bytes)) => return Ok(PartEvent::Chunk(bytes)),
                Ok(None) => self.current = None,
                Err(e) => return Err(map_multer_error(e)),
            }
        }

        // The previous field is dropped above; multer requires that before advancing.
        match self.multipart.next_field().await {
            Ok(Some(field)) => {
                let header = PartHeader {
                    field_name: field.name().map(str::to_string),
                    file_name: field.file_name().map(str::to_string),
                    content_type: field.content_type().map(|m| m.to_string()),
                };
                self.current = Some(field);
                Ok(PartEvent::PartStarted(header))
            }
            Ok(None) => Ok(PartEvent::Finished),
            Err(e) => Err(map_multer_error(e)),
        }
    }

    async fn discard_remaining(&mut self) {
        self.current = None;
        let mut body = SharedBody(self.raw.clone());
        let mut discarded = 0u64;
        while let Some(Ok(bytes)) = body.next().await {
            discarded += bytes.len() as u64;
        }
        tracing::debug!(bytes = discarded, "discarded unparsed body");
    }
}

/// Replays a fixed event list; used to drive sessions in tests.
#[cfg(test)]
pub(crate) struct ScriptedSource {
    events: std::collections::VecDeque<Result<PartEvent, UploadFailure>>,
}

#[cfg(test)]
impl ScriptedSource {
    pub(crate) fn new(events: Vec<Result<PartEvent, UploadFailure>>) -> Self {
        Self {
            events: events.into(),
        }
    }

    pub(crate) fn file(name: &str, content_type: &str, chunks: &[&[u8]]) -> Vec<Result<PartEvent, UploadFailure>> {
        let mut events = vec![Ok(PartEvent::PartStarted(PartHeader {
            field_name: Some("file".into()),
            file_name: Some(name.into()),
            content_type: Some(content_type.into()),
        }))];
        events.extend(
            chunks
                .iter()
                .map(|c| Ok(PartEvent::Chunk(Bytes::copy_from_slice(c)))),
        );
        events
    }

    pub(crate) fn remaining(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
#[async_trait]
impl PartSource for ScriptedSource {
    async fn next_event(&mut self) -> Result<PartEvent, UploadFailure> {
        self.events.pop_front().unwrap_or(Ok(PartEvent::Finished))
    }

    async fn discard_remaining(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "X-TASKVAULT-BOUNDARY";

    fn body(parts: &[(&str, Option<&str>, Option<&str>, &str)]) -> String {
        let mut out = String::new();
        for (name, filename, content_type, data) in parts {
            out.push_str(&format!("--{BOUNDARY}\r\n"));
            match filename {
                Some(f) => out.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n"
                )),
                None => out.push_str(&format!("Content-Disposition: form-data; name=\"{name}\"\r\n")),
            }
            if let Some(ct) = content_type {
                out.push_str(&format!("Content-Type: {ct}\r\n"));
            }
            out.push_str("\r\n");
            out.push_str(data);
            out.push_str("\r\n");
        }
        out.push_str(&format!("--{BOUNDARY}--\r\n"));
        out
    }

    async fn collect(source: &mut MultipartSource) -> Vec<PartEvent> {
        let mut events = Vec::new();
        loop {
            let event = source.next_event().await.unwrap();
            let done = event == PartEvent::Finished;
            events.push(event);
            if done {
                return events;
            }
        }
    }

    fn chunked(text: String, size: usize) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let bytes = Bytes::from(text);
        let pieces: Vec<Result<Bytes, std::io::Error>> = (0..bytes.len())
            .step_by(size)
            .map(|i| Ok(bytes.slice(i..(i + size).min(bytes.len()))))
            .collect();
        futures::stream::iter(pieces)
    }

    #[tokio::test]
    async fn yields_headers_then_chunks() {
        let text = body(&[
            ("note", None, None, "hello"),
            ("file", Some("cat.png"), Some("image/png"), "PNGDATA"),
        ]);
        let mut source = MultipartSource::from_content_type(
            &format!("multipart/form-data; boundary={BOUNDARY}"),
            chunked(text, 7),
        )
        .unwrap();

        let events = collect(&mut source).await;
        let headers: Vec<&PartHeader> = events
            .iter()
            .filter_map(|e| match e {
                PartEvent::PartStarted(h) => Some(h),
                _ => None,
            })
            .collect();
        assert_eq!(headers.len(), 2);
        assert!(!headers[0].is_file());
        assert_eq!(headers[1].file_name.as_deref(), Some("cat.png"));
        assert_eq!(headers[1].content_type.as_deref(), Some("image/png"));

        let file_bytes: Vec<u8> = events
            .iter()
            .skip_while(|e| !matches!(e, PartEvent::PartStarted(h) if h.is_file()))
            .filter_map(|e| match e {
                PartEvent::Chunk(b) => Some(b.to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(file_bytes, b"PNGDATA");
    }

    #[test]
    fn missing_boundary_is_malformed() {
        assert!(matches!(
            parse_boundary("application/json"),
            Err(UploadFailure::Malformed(_))
        ));
        assert_eq!(
            parse_boundary("multipart/form-data; boundary=abc").unwrap(),
            "abc"
        );
    }

    #[tokio::test]
    async fn body_stream_error_is_an_abort() {
        let items: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from(format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.png\"\r\nContent-Type: image/png\r\n\r\npartial"
            ))),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut source = MultipartSource::new(futures::stream::iter(items), BOUNDARY);

        let mut result = Ok(PartEvent::Finished);
        for _ in 0..10 {
            result = source.next_event().await;
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(UploadFailure::Aborted)));
    }
}
