use std::{io::ErrorKind, sync::Arc};

use bindrpc_core::{ReqId, RpcConfig, StreamId};
use bindrpc_dispatch::{ConnectionContext, Dispatcher, Protocol, Reply, ServerConnection};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};

use crate::{
    IpcError,
    framing::{Frame, FrameKind, read_frame_limited, write_frames},
    stream::{InboundStreams, OutboundStreams},
};

const OUTBOUND_QUEUE: usize = 64;

/// Serves one connection until the peer hangs up.
///
/// Requests are decoded in arrival order and dispatched concurrently;
/// results are written as they complete. A request that cannot be decoded is
/// answered with an exception result, and so is a result too large for one
/// frame. Only a frame that cannot be read ends the connection. In-flight
/// requests are abandoned when it ends.
pub async fn serve_connection<S>(
    stream: S,
    protocol: Protocol,
    dispatcher: Dispatcher,
    context: ConnectionContext,
    config: &RpcConfig,
) -> Result<(), IpcError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let max_frame = config.max_frame_size;
    let chunk_size = config.stream_chunk_size;
    let connection_id = context.connection_id;

    let (frames_tx, frames_rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);
    let (credits_tx, credits_rx) = mpsc::unbounded_channel::<Frame>();
    let write_task = tokio::spawn(async move {
        write_frames(&mut writer, frames_rx, credits_rx, max_frame).await;
    });

    let (conn, replies) = ServerConnection::new(protocol, dispatcher, context);
    let conn = conn.with_max_reply_size(max_frame as usize);
    let outbound = Arc::new(OutboundStreams::new(config.stream_window));
    let reply_task = tokio::spawn(forward_replies(
        replies,
        frames_tx.clone(),
        Arc::clone(&outbound),
        chunk_size,
    ));
    let inbound = Arc::new(InboundStreams::new(config.stream_window, credits_tx));

    let outcome = loop {
        let frame = match read_frame_limited(&mut reader, max_frame).await {
            Ok(frame) => frame,
            Err(IpcError::Io(err))
                if matches!(
                    err.kind(),
                    ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
                ) =>
            {
                break Ok(());
            }
            Err(err) => break Err(err),
        };

        match frame.kind {
            FrameKind::Request => {
                conn.handle_request(ReqId(frame.id), &frame.payload, Some(inbound.clone()));
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
            FrameKind::Cancel => {
                if conn.cancel(ReqId(frame.id)) {
                    tracing::debug!(req_id = frame.id, "request cancelled by peer");
                }
            }
            FrameKind::Result => {
                tracing::warn!(req_id = frame.id, "ignoring result frame sent to server");
            }
        }
    };

    let abandoned = conn.abandon();
    inbound.close_all();
    outbound.close_all();
    drop(conn);
    drop(frames_tx);
    reply_task.abort();
    write_task.abort();
    tracing::debug!(
        connection_id = connection_id.0,
        abandoned,
        "connection closed"
    );
    outcome
}

async fn forward_replies(
    mut replies: mpsc::UnboundedReceiver<Reply>,
    frames: mpsc::Sender<Frame>,
    outbound: Arc<OutboundStreams>,
    chunk_size: usize,
) {
    while let Some(reply) = replies.recv().await {
        let Reply { req_id, encoded } = reply;
        let frame = Frame::new(FrameKind::Result, req_id.0, encoded.bytes);
        if frames.send(frame).await.is_err() {
            return;
        }
        for stream in encoded.streams {
            outbound.spawn_pump(stream, frames.clone(), chunk_size);
        }
    }
}
