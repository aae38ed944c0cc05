//! Moving content stream bodies as chunk frames.
//!
//! Streams are flow controlled per stream id: the sender starts with a
//! window of credit and spends it on chunk bytes; the receiver grants bytes
//! back as its reader consumes them.

use std::{
    io,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};

use bindrpc_core::StreamId;
use bindrpc_wire::{OutgoingStream, StreamBody, StreamResolver};
use dashmap::DashMap;
use tokio::{
    io::{AsyncRead, AsyncReadExt, ReadBuf},
    sync::{Semaphore, mpsc},
    task::JoinHandle,
};

use crate::framing::{Frame, FrameKind};

type Chunk = io::Result<Vec<u8>>;

#[derive(Debug)]
struct OpenStream {
    tx: mpsc::UnboundedSender<Chunk>,
    /// Bytes delivered to the reader but not yet taken by it.
    buffered: Arc<AtomicUsize>,
}

/// Receiving side of the streams of one connection.
///
/// Decoding an archive opens a reader per stream id; chunk frames read later
/// are routed to it. Credit for consumed bytes is queued on `credits`.
#[derive(Debug)]
pub struct InboundStreams {
    open: DashMap<StreamId, OpenStream>,
    window: usize,
    credits: mpsc::UnboundedSender<Frame>,
}

impl InboundStreams {
    pub fn new(window: usize, credits: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            open: DashMap::new(),
            window,
            credits,
        }
    }

    /// Routes a chunk to its reader. Chunks for unknown or dropped streams
    /// are discarded and their credit returned at once. A chunk that would
    /// overrun the window fails the stream.
    pub fn push_chunk(&self, stream_id: StreamId, bytes: Vec<u8>) -> bool {
        let len = bytes.len();
        let Some(entry) = self.open.get(&stream_id) else {
            tracing::debug!(stream_id = stream_id.0, "discarding chunk for closed stream");
            grant(&self.credits, stream_id, len);
            return false;
        };
        let buffered = entry.buffered.fetch_add(len, Ordering::AcqRel) + len;
        if buffered > self.window {
            drop(entry);
            if let Some((_, stream)) = self.open.remove(&stream_id) {
                tracing::warn!(
                    stream_id = stream_id.0,
                    buffered,
                    window = self.window,
                    "peer overran stream window"
                );
                let _ = stream.tx.send(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "stream exceeded flow-control window",
                )));
            }
            return false;
        }
        if entry.tx.send(Ok(bytes)).is_err() {
            drop(entry);
            self.open.remove(&stream_id);
            tracing::debug!(stream_id = stream_id.0, "discarding chunk for dropped reader");
            grant(&self.credits, stream_id, len);
            return false;
        }
        true
    }

    /// Ends a stream. A non-empty `error` surfaces as an I/O error to the
    /// reader.
    pub fn finish(&self, stream_id: StreamId, error: &[u8]) -> bool {
        let Some((_, stream)) = self.open.remove(&stream_id) else {
            return false;
        };
        if !error.is_empty() {
            let message = String::from_utf8_lossy(error).into_owned();
            let _ = stream.tx.send(Err(io::Error::other(message)));
        }
        true
    }

    /// Fails every open stream, e.g. when the connection drops.
    pub fn close_all(&self) {
        let stream_ids: Vec<StreamId> = self.open.iter().map(|entry| *entry.key()).collect();
        for stream_id in stream_ids {
            if let Some((_, stream)) = self.open.remove(&stream_id) {
                let _ = stream.tx.send(Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "connection closed mid-stream",
                )));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

impl StreamResolver for InboundStreams {
    fn open(&self, stream_id: StreamId) -> Option<StreamBody> {
        let (tx, rx) = mpsc::unbounded_channel();
        let buffered = Arc::new(AtomicUsize::new(0));
        let stream = OpenStream {
            tx,
            buffered: Arc::clone(&buffered),
        };
        if self.open.insert(stream_id, stream).is_some() {
            tracing::warn!(stream_id = stream_id.0, "stream id reused while open");
        }
        Some(Box::pin(ChunkReader {
            stream_id,
            rx,
            buffered,
            credits: self.credits.clone(),
            buf: Vec::new(),
            pos: 0,
        }))
    }
}

fn grant(credits: &mpsc::UnboundedSender<Frame>, stream_id: StreamId, bytes: usize) {
    if bytes == 0 {
        return;
    }
    let bytes = u32::try_from(bytes).unwrap_or(u32::MAX);
    let _ = credits.send(Frame::credit(stream_id.0, bytes));
}

struct ChunkReader {
    stream_id: StreamId,
    rx: mpsc::UnboundedReceiver<Chunk>,
    buffered: Arc<AtomicUsize>,
    credits: mpsc::UnboundedSender<Frame>,
    buf: Vec<u8>,
    pos: usize,
}

impl AsyncRead for ChunkReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.pos < this.buf.len() {
                let n = out.remaining().min(this.buf.len() - this.pos);
                out.put_slice(&this.buf[this.pos..this.pos + n]);
                this.pos += n;
                return Poll::Ready(Ok(()));
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffered.fetch_sub(chunk.len(), Ordering::AcqRel);
                    grant(&this.credits, this.stream_id, chunk.len());
                    this.buf = chunk;
                    this.pos = 0;
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Err(err)),
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for ChunkReader {
    fn drop(&mut self) {
        self.rx.close();
        let mut unread = 0;
        while let Ok(chunk) = self.rx.try_recv() {
            if let Ok(chunk) = chunk {
                unread += chunk.len();
            }
        }
        grant(&self.credits, self.stream_id, unread);
    }
}

/// Sending side of the streams of one connection: the credit left per
/// stream being pumped.
#[derive(Debug)]
pub struct OutboundStreams {
    credit: DashMap<StreamId, Arc<Semaphore>>,
    window: usize,
}

impl OutboundStreams {
    pub fn new(window: usize) -> Self {
        Self {
            credit: DashMap::new(),
            window: window.clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize)),
        }
    }

    /// Sends `stream`'s body as chunk frames followed by an end frame,
    /// never running more than the window ahead of the granted credit.
    pub fn spawn_pump(
        self: &Arc<Self>,
        stream: OutgoingStream,
        frames: mpsc::Sender<Frame>,
        chunk_size: usize,
    ) -> JoinHandle<()> {
        let credit = Arc::new(Semaphore::new(self.window));
        if self.credit.insert(stream.stream_id, Arc::clone(&credit)).is_some() {
            tracing::warn!(stream_id = stream.stream_id.0, "stream id reused while pumping");
        }
        let streams = Arc::clone(self);
        let chunk_size = chunk_size.clamp(1, self.window);
        tokio::spawn(async move {
            let stream_id = stream.stream_id;
            pump(stream, &frames, chunk_size, &credit).await;
            streams.credit.remove_if(&stream_id, |_, held| Arc::ptr_eq(held, &credit));
            drop(frames);
        })
    }

    /// Applies a credit frame from the receiver. Grants beyond the window
    /// are capped.
    pub fn grant(&self, stream_id: StreamId, bytes: u32) -> bool {
        let Some(credit) = self.credit.get(&stream_id) else {
            return false;
        };
        let room = self.window.saturating_sub(credit.available_permits());
        credit.add_permits((bytes as usize).min(room));
        true
    }

    /// Stops every pump, e.g. when the connection drops.
    pub fn close_all(&self) {
        for entry in self.credit.iter() {
            entry.value().close();
        }
        self.credit.clear();
    }

    pub fn len(&self) -> usize {
        self.credit.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credit.is_empty()
    }
}

async fn pump(
    stream: OutgoingStream,
    frames: &mpsc::Sender<Frame>,
    chunk_size: usize,
    credit: &Semaphore,
) {
    let OutgoingStream {
        stream_id,
        mut body,
    } = stream;
    let mut buf = vec![0_u8; chunk_size];
    let end = loop {
        match body.read(&mut buf).await {
            Ok(0) => break Frame::empty(FrameKind::StreamEnd, stream_id.0),
            Ok(n) => {
                // Chunks are clamped to the window, which fits in a u32.
                let Ok(permits) = credit.acquire_many(n as u32).await else {
                    tracing::debug!(stream_id = stream_id.0, "stream closed while waiting for credit");
                    return;
                };
                permits.forget();
                let chunk = Frame::new(FrameKind::StreamChunk, stream_id.0, buf[..n].to_vec());
                if frames.send(chunk).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                tracing::debug!(stream_id = stream_id.0, error = %err, "stream body failed");
                break Frame::new(
                    FrameKind::StreamEnd,
                    stream_id.0,
                    err.to_string().into_bytes(),
                );
            }
        }
    };
    let _ = frames.send(end).await;
}
