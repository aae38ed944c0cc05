//! Frame layout: `[len: u32 BE][kind: u8][id: u64 BE][payload: len bytes]`.
//!
//! `id` is the request id for request, result and cancel frames, and the
//! stream id for stream frames.

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

use crate::IpcError;

/// Maximum payload size accepted by framing helpers.
pub const MAX_FRAME_SIZE: u32 = 8 * 1024 * 1024;

const HEADER_LEN: usize = 4 + 1 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Request = 1,
    Result = 2,
    StreamChunk = 3,
    /// Empty payload ends the stream; otherwise the payload is an error text.
    StreamEnd = 4,
    Cancel = 5,
    /// Payload is a `u32 BE` byte count the sender of the stream may send
    /// beyond what it already sent.
    StreamCredit = 6,
}

impl TryFrom<u8> for FrameKind {
    type Error = IpcError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(FrameKind::Request),
            2 => Ok(FrameKind::Result),
            3 => Ok(FrameKind::StreamChunk),
            4 => Ok(FrameKind::StreamEnd),
            5 => Ok(FrameKind::Cancel),
            6 => Ok(FrameKind::StreamCredit),
            other => Err(IpcError::UnknownFrameKind(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub id: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: FrameKind, id: u64, payload: Vec<u8>) -> Self {
        Self { kind, id, payload }
    }

    pub fn empty(kind: FrameKind, id: u64) -> Self {
        Self::new(kind, id, Vec::new())
    }

    pub fn credit(stream_id: u64, bytes: u32) -> Self {
        Self::new(FrameKind::StreamCredit, stream_id, bytes.to_be_bytes().to_vec())
    }

    /// Byte count of a credit frame; `None` when the payload is malformed.
    pub fn credit_bytes(&self) -> Option<u32> {
        let raw: [u8; 4] = self.payload.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(raw))
    }
}

/// Writes one frame, rejecting payloads above [`MAX_FRAME_SIZE`].
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<(), IpcError> {
    write_frame_limited(writer, frame, MAX_FRAME_SIZE).await
}

pub async fn write_frame_limited<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
    max: u32,
) -> Result<(), IpcError> {
    let size: u32 = frame
        .payload
        .len()
        .try_into()
        .map_err(|_| IpcError::FrameTooLarge {
            size: u32::MAX,
            max,
        })?;

    if size > max {
        return Err(IpcError::FrameTooLarge { size, max });
    }

    let mut header = [0_u8; HEADER_LEN];
    header[..4].copy_from_slice(&size.to_be_bytes());
    header[4] = frame.kind as u8;
    header[5..].copy_from_slice(&frame.id.to_be_bytes());

    writer.write_all(&header).await?;
    writer.write_all(&frame.payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame, rejecting payloads above [`MAX_FRAME_SIZE`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, IpcError> {
    read_frame_limited(reader, MAX_FRAME_SIZE).await
}

pub async fn read_frame_limited<R: AsyncRead + Unpin>(
    reader: &mut R,
    max: u32,
) -> Result<Frame, IpcError> {
    let mut header = [0_u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let mut size = [0_u8; 4];
    size.copy_from_slice(&header[..4]);
    let size = u32::from_be_bytes(size);
    if size > max {
        return Err(IpcError::FrameTooLarge { size, max });
    }
    let kind = FrameKind::try_from(header[4])?;
    let mut id = [0_u8; 8];
    id.copy_from_slice(&header[5..]);

    let mut payload = vec![0_u8; size as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Frame {
        kind,
        id: u64::from_be_bytes(id),
        payload,
    })
}

/// Drains queued frames onto `writer` until both queues close or the stream
/// fails.
///
/// Credit frames go first so a stalled stream never waits behind its own
/// chunks. A frame above `max` is dropped with a warning and the connection
/// stays usable.
pub async fn write_frames<W: AsyncWrite + Unpin>(
    writer: &mut W,
    mut frames: mpsc::Receiver<Frame>,
    mut credits: mpsc::UnboundedReceiver<Frame>,
    max: u32,
) {
    loop {
        let frame = tokio::select! {
            biased;
            Some(frame) = credits.recv() => frame,
            Some(frame) = frames.recv() => frame,
            else => break,
        };
        match write_frame_limited(writer, &frame, max).await {
            Ok(()) => {}
            Err(IpcError::FrameTooLarge { size, max }) => {
                tracing::warn!(kind = ?frame.kind, id = frame.id, size, max, "dropping oversized frame");
            }
            Err(err) => {
                tracing::debug!(error = %err, "writer exited with error");
                break;
            }
        }
    }
}
