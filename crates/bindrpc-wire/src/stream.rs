//! Out-of-band content streams.
//!
//! A [`ContentStream`] travels inside an archive as a small descriptor; its
//! body is handed to the transport, which moves it as separate chunks.

use std::{
    fmt,
    io::Cursor,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
};

use bindrpc_core::StreamId;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::CodecError;

/// Body reader of a content stream.
pub type StreamBody = Pin<Box<dyn AsyncRead + Send>>;

/// Binds stream ids decoded from an archive to readable bodies.
pub trait StreamResolver: Send + Sync {
    /// Returns the body for `stream_id`, or `None` when the transport has no
    /// such stream.
    fn open(&self, stream_id: StreamId) -> Option<StreamBody>;
}

struct StreamInner {
    stream_id: Option<StreamId>,
    content_type: String,
    content_length: Option<u64>,
    body: Mutex<Option<StreamBody>>,
}

/// A binary body with a content type and optional length.
///
/// Clones share the same body; it can be consumed once.
#[derive(Clone)]
pub struct ContentStream {
    inner: Arc<StreamInner>,
}

impl ContentStream {
    pub fn new(content_type: impl Into<String>, body: impl AsyncRead + Send + 'static) -> Self {
        Self::build(None, content_type.into(), None, Some(Box::pin(body)))
    }

    /// In-memory stream with a known length.
    pub fn from_bytes(content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u64;
        Self::build(
            None,
            content_type.into(),
            Some(len),
            Some(Box::pin(Cursor::new(bytes))),
        )
    }

    pub fn with_length(self, content_length: u64) -> Self {
        let body = self.lock_body().take();
        Self::build(
            self.inner.stream_id,
            self.inner.content_type.clone(),
            Some(content_length),
            body,
        )
    }

    /// Stream decoded from an archive. `body` is `None` when the archive had
    /// no resolver for it.
    pub(crate) fn received(
        stream_id: StreamId,
        content_type: String,
        content_length: Option<u64>,
        body: Option<StreamBody>,
    ) -> Self {
        Self::build(Some(stream_id), content_type, content_length, body)
    }

    fn build(
        stream_id: Option<StreamId>,
        content_type: String,
        content_length: Option<u64>,
        body: Option<StreamBody>,
    ) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                stream_id,
                content_type,
                content_length,
                body: Mutex::new(body),
            }),
        }
    }

    pub fn content_type(&self) -> &str {
        &self.inner.content_type
    }

    pub fn content_length(&self) -> Option<u64> {
        self.inner.content_length
    }

    /// Wire id this stream was received under, if it was decoded.
    pub fn stream_id(&self) -> Option<StreamId> {
        self.inner.stream_id
    }

    /// True while the body has not been taken.
    pub fn has_body(&self) -> bool {
        self.lock_body().is_some()
    }

    /// Takes the body reader out of the stream.
    pub fn take_body(&self) -> Result<StreamBody, CodecError> {
        self.lock_body()
            .take()
            .ok_or(CodecError::StreamUnavailable {
                stream_id: self.inner.stream_id,
            })
    }

    /// Reads the whole body into memory.
    pub async fn read_to_end(&self) -> Result<Vec<u8>, CodecError> {
        let mut body = self.take_body()?;
        let mut buf = Vec::new();
        body.read_to_end(&mut buf)
            .await
            .map_err(|err| CodecError::StreamIo(err.to_string()))?;
        if let Some(expected) = self.inner.content_length
            && expected != buf.len() as u64
        {
            return Err(CodecError::StreamIo(format!(
                "stream ended after {} of {expected} bytes",
                buf.len()
            )));
        }
        Ok(buf)
    }

    fn lock_body(&self) -> MutexGuard<'_, Option<StreamBody>> {
        self.inner
            .body
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ContentStream {
    /// Empty binary body.
    fn default() -> Self {
        Self::from_bytes("application/octet-stream", Vec::new())
    }
}

impl fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentStream")
            .field("stream_id", &self.inner.stream_id)
            .field("content_type", &self.inner.content_type)
            .field("content_length", &self.inner.content_length)
            .field("has_body", &self.has_body())
            .finish()
    }
}

/// A stream body handed off by an archive for the transport to pump.
pub struct OutgoingStream {
    pub stream_id: StreamId,
    pub body: StreamBody,
}

impl fmt::Debug for OutgoingStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingStream")
            .field("stream_id", &self.stream_id)
            .finish_non_exhaustive()
    }
}
