use bindrpc_core::{ExceptionDescriptor, TypeId};
use bindrpc_wire::CodecError;
use thiserror::Error;

/// Failures turning request bytes into an executable request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The type is registered, but not as a method request.
    #[error("type id {type_id} is not a method request")]
    NotAMethod { type_id: TypeId },
}

impl From<&DispatchError> for ExceptionDescriptor {
    fn from(err: &DispatchError) -> Self {
        match err {
            DispatchError::Codec(codec) => ExceptionDescriptor::from(codec),
            DispatchError::NotAMethod { type_id } => ExceptionDescriptor::unsupported_method(*type_id),
        }
    }
}

impl From<DispatchError> for ExceptionDescriptor {
    fn from(err: DispatchError) -> Self {
        ExceptionDescriptor::from(&err)
    }
}
