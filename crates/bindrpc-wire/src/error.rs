use bindrpc_core::{ExceptionDescriptor, InterfaceId, StreamId, TypeId};
use thiserror::Error;

/// Failures while reading or writing an archive.
///
/// Every read failure carries the byte position it was detected at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Input ended before a value was complete.
    #[error("truncated input at byte {position}: expected {expected}, {remaining} bytes left")]
    Truncated {
        position: usize,
        expected: &'static str,
        remaining: usize,
    },
    /// Bytes were present but do not form a valid value of the expected shape.
    #[error("invalid {expected} at byte {position}: {actual}")]
    InvalidValue {
        position: usize,
        expected: &'static str,
        actual: String,
    },
    #[error("invalid utf-8 text at byte {position}")]
    InvalidUtf8 { position: usize },
    /// No factory is registered for a type id read from the wire.
    #[error("unknown type id {type_id} at byte {position}")]
    UnknownTypeId { position: usize, type_id: TypeId },
    /// The decoded object is not of the concrete type the field declares.
    #[error("type mismatch at byte {position}: expected {expected}, found type id {actual}")]
    TypeMismatch {
        position: usize,
        expected: String,
        actual: TypeId,
    },
    #[error("interface mismatch at byte {position}: expected {expected}, found {actual}")]
    InterfaceMismatch {
        position: usize,
        expected: InterfaceId,
        actual: InterfaceId,
    },
    #[error("object nesting exceeds {max} at byte {position}")]
    DepthExceeded { position: usize, max: usize },
    /// A length does not fit the 32-bit wire prefix.
    #[error("length {len} does not fit the wire length prefix")]
    LengthOverflow { len: usize },
    #[error("{remaining} unexpected trailing bytes at byte {position}")]
    TrailingBytes { position: usize, remaining: usize },
    /// A content stream has no readable body.
    #[error("content stream {stream_id:?} has no readable body")]
    StreamUnavailable { stream_id: Option<StreamId> },
    #[error("content stream io failed: {0}")]
    StreamIo(String),
}

impl From<&CodecError> for ExceptionDescriptor {
    fn from(err: &CodecError) -> Self {
        ExceptionDescriptor::corrupt("failed to decode message").with_detail(err.to_string())
    }
}

impl From<CodecError> for ExceptionDescriptor {
    fn from(err: CodecError) -> Self {
        ExceptionDescriptor::from(&err)
    }
}

/// Registry misconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("type id {type_id} is already registered for {existing}")]
    DuplicateTypeId {
        type_id: TypeId,
        existing: &'static str,
    },
    #[error("unknown type id {0}")]
    UnknownTypeId(TypeId),
    /// Ids below the user range belong to built-in shapes.
    #[error("type id {0} is reserved for built-in types")]
    ReservedTypeId(TypeId),
    /// The factory produced an object reporting another id.
    #[error("factory for type id {registered} produced an object with type id {produced}")]
    IdMismatch { registered: TypeId, produced: TypeId },
}
