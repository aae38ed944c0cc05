use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bindrpc_core::{
    ErrorCode, ExceptionDescriptor, ReqId, RpcConfig, StreamId, protocol::negotiate_version,
};
use bindrpc_dispatch::{
    MethodRequest, MethodResult, PendingCalls, Protocol,
    envelope::{read_result, write_request},
};
use bindrpc_wire::CodecError;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadHalf},
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};

use crate::{
    IpcError,
    framing::{Frame, FrameKind, read_frame_limited, write_frames},
    stream::{InboundStreams, OutboundStreams},
};

const OUTBOUND_QUEUE: usize = 64;

/// Multiplexing client over one framed connection.
///
/// Calls may run concurrently; each result is routed to its caller by
/// request id.
pub struct RpcClient {
    protocol: Protocol,
    frames: mpsc::Sender<Frame>,
    pending: Arc<PendingCalls>,
    /// Version last seen in a result archive; `0` until the first result.
    peer_version: Arc<AtomicU64>,
    stream_ids: Arc<AtomicU64>,
    outbound: Arc<OutboundStreams>,
    /// Per-call timeout.
    timeout: Duration,
    chunk_size: usize,
    max_frame: u32,
    tasks: Vec<JoinHandle<()>>,
}

impl RpcClient {
    /// Starts the connection tasks on the current runtime.
    pub fn connect<S>(stream: S, protocol: Protocol) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::connect_with_config(stream, protocol, &RpcConfig::default())
    }

    pub fn connect_with_config<S>(stream: S, protocol: Protocol, config: &RpcConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let max_frame = config.max_frame_size;
        let (frames, frames_rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);
        let (credits_tx, credits_rx) = mpsc::unbounded_channel::<Frame>();
        let pending = Arc::new(PendingCalls::new());
        let peer_version = Arc::new(AtomicU64::new(0));
        let outbound = Arc::new(OutboundStreams::new(config.stream_window));
        let inbound = InboundStreams::new(config.stream_window, credits_tx);

        let write_task = tokio::spawn(async move {
            write_frames(&mut writer, frames_rx, credits_rx, max_frame).await;
        });
        let read_task = tokio::spawn(read_results(
            reader,
            protocol.clone(),
            Connection {
                pending: Arc::clone(&pending),
                peer_version: Arc::clone(&peer_version),
                inbound: Arc::new(inbound),
                outbound: Arc::clone(&outbound),
            },
            max_frame,
        ));

        Self {
            protocol,
            frames,
            pending,
            peer_version,
            stream_ids: Arc::new(AtomicU64::new(1)),
            outbound,
            timeout: Duration::from_millis(config.call_timeout_ms),
            chunk_size: config.stream_chunk_size,
            max_frame,
            tasks: vec![write_task, read_task],
        }
    }

    /// Overrides the call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Version this client writes: its own until the server's is known,
    /// then the lower of both.
    pub fn write_version(&self) -> u64 {
        match self.peer_version.load(Ordering::Acquire) {
            0 => self.protocol.version(),
            peer => negotiate_version(self.protocol.version(), peer),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Sends one request and waits for its result. Remote exceptions are
    /// part of the returned [`MethodResult`].
    ///
    /// A request too large for one frame fails with
    /// [`IpcError::FrameTooLarge`] before anything is sent.
    pub async fn call(&self, request: &dyn MethodRequest) -> Result<MethodResult, IpcError> {
        if self.tasks.iter().any(JoinHandle::is_finished) {
            return Err(IpcError::Closed);
        }
        let mut out = self
            .protocol
            .output(self.write_version())
            .with_stream_ids(Arc::clone(&self.stream_ids));
        write_request(&mut out, request)?;
        let encoded = out.finish();
        let size = u32::try_from(encoded.bytes.len()).unwrap_or(u32::MAX);
        if size > self.max_frame {
            return Err(IpcError::FrameTooLarge {
                size,
                max: self.max_frame,
            });
        }

        let (req_id, call) = self.pending.register();
        let frame = Frame::new(FrameKind::Request, req_id.0, encoded.bytes);
        if self.frames.send(frame).await.is_err() {
            self.pending.forget(req_id);
            return Err(IpcError::Closed);
        }
        for stream in encoded.streams {
            self.outbound.spawn_pump(stream, self.frames.clone(), self.chunk_size);
        }

        match timeout(self.timeout, call).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(exception)) if exception.code == ErrorCode::ClientDied => Err(IpcError::Closed),
            Ok(Err(exception)) => Err(IpcError::Call(exception)),
            Err(_) => {
                self.pending.forget(req_id);
                let _ = self
                    .frames
                    .send(Frame::empty(FrameKind::Cancel, req_id.0))
                    .await;
                Err(IpcError::Timeout)
            }
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.outbound.close_all();
        self.pending.fail_all(&ExceptionDescriptor::new(
            ErrorCode::ClientDied,
            "client dropped",
        ));
    }
}

/// State the read task shares with the client handle.
struct Connection {
    pending: Arc<PendingCalls>,
    peer_version: Arc<AtomicU64>,
    inbound: Arc<InboundStreams>,
    outbound: Arc<OutboundStreams>,
}

async fn read_results<R>(
    mut reader: ReadHalf<R>,
    protocol: Protocol,
    connection: Connection,
    max_frame: u32,
) where
    R: AsyncRead + AsyncWrite + Send + 'static,
{
    let Connection {
        pending,
        peer_version,
        inbound,
        outbound,
    } = connection;
    loop {
        let frame = match read_frame_limited(&mut reader, max_frame).await {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(error = %err, "client reader exited");
                break;
            }
        };
        match frame.kind {
            FrameKind::Result => {
                let req_id = ReqId(frame.id);
                match decode_result(&protocol, &frame.payload, &inbound, &peer_version) {
                    Ok(result) => {
                        pending.resolve(req_id, result);
                    }
                    Err(err) => {
                        tracing::debug!(req_id = req_id.0, error = %err, "failed to decode result");
                        pending.fail(req_id, ExceptionDescriptor::from(&err));
                    }
                }
            }
            FrameKind::StreamChunk => {
                inbound.push_chunk(StreamId(frame.id), frame.payload);
            }
            FrameKind::StreamEnd => {
                inbound.finish(StreamId(frame.id), &frame.payload);
            }
            FrameKind::StreamCredit => match frame.credit_bytes() {
                Some(bytes) => {
                    outbound.grant(StreamId(frame.id), bytes);
                }
                None => tracing::warn!(stream_id = frame.id, "ignoring malformed credit frame"),
            },
            FrameKind::Request | FrameKind::Cancel => {
                tracing::warn!(id = frame.id, kind = ?frame.kind, "ignoring server-initiated frame");
            }
        }
    }
    inbound.close_all();
    outbound.close_all();
    let released = pending.fail_all(&ExceptionDescriptor::new(
        ErrorCode::ClientDied,
        "connection closed",
    ));
    if released > 0 {
        tracing::debug!(released, "released pending calls after disconnect");
    }
}

fn decode_result(
    protocol: &Protocol,
    bytes: &[u8],
    inbound: &Arc<InboundStreams>,
    peer_version: &AtomicU64,
) -> Result<MethodResult, CodecError> {
    let mut input = protocol.input(bytes)?.with_streams(inbound.clone());
    peer_version.store(input.version(), Ordering::Release);
    let result = read_result(&mut input)?;
    input.finish()?;
    Ok(result)
}
