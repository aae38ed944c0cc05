use bindrpc_core::ExceptionDescriptor;
use bindrpc_wire::CodecError;
use thiserror::Error;

/// Transport failures of the framed adapter.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Underlying stream I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Frame size exceeded maximum allowed payload.
    #[error("frame too large: {size} > {max}")]
    FrameTooLarge { size: u32, max: u32 },
    /// Frame header carried a kind this side does not know.
    #[error("unknown frame kind {0}")]
    UnknownFrameKind(u8),
    /// Outgoing archive could not be encoded.
    #[error("failed to encode message: {0}")]
    Codec(#[from] CodecError),
    /// Operation exceeded configured timeout.
    #[error("request timed out")]
    Timeout,
    /// The connection is gone.
    #[error("connection closed")]
    Closed,
    /// The call failed on this side before a result arrived.
    #[error("call failed: {0}")]
    Call(ExceptionDescriptor),
}
