use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{InterfaceId, TypeId};

/// Stable failure classification carried inside exception descriptors.
///
/// Known codes map to fixed integers on the wire; any other integer sent by a
/// service is preserved as [`ErrorCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ErrorCode {
    /// Unexpected internal state, including protocol violations by a service.
    Internal,
    /// Wire data for one message could not be decoded.
    Corrupt,
    /// The service failed with an undeclared error.
    RemoteError,
    /// No service is bound for the requested interface.
    ServiceNotImplemented,
    /// The peer is no longer connected.
    ClientDied,
    /// A stream operation failed.
    IoError,
    /// The serving side does not know the requested method.
    UnsupportedMethod,
    /// The operation was cancelled or its connection abandoned.
    Cancelled,
    /// Authentication is required before calling the method.
    Unauthorized,
    /// Authentication was rejected.
    Forbidden,
    /// The operation exceeded its time limit.
    Timeout,
    /// The session has been invalidated.
    SessionClosed,
    /// Service-defined code outside the built-in set.
    Other(i32),
}

impl ErrorCode {
    /// Returns the integer written on the wire.
    pub fn as_i32(self) -> i32 {
        match self {
            ErrorCode::Internal => 3,
            ErrorCode::Corrupt => 8,
            ErrorCode::RemoteError => 10,
            ErrorCode::ServiceNotImplemented => 11,
            ErrorCode::ClientDied => 12,
            ErrorCode::IoError => 14,
            ErrorCode::UnsupportedMethod => 17,
            ErrorCode::Cancelled => 19,
            ErrorCode::Unauthorized => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::Timeout => 408,
            ErrorCode::SessionClosed => 410,
            ErrorCode::Other(code) => code,
        }
    }

    /// Returns true when the client should authenticate again and retry.
    pub fn is_relogin(self) -> bool {
        matches!(self, ErrorCode::Unauthorized | ErrorCode::SessionClosed)
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        match code {
            3 => ErrorCode::Internal,
            8 => ErrorCode::Corrupt,
            10 => ErrorCode::RemoteError,
            11 => ErrorCode::ServiceNotImplemented,
            12 => ErrorCode::ClientDied,
            14 => ErrorCode::IoError,
            17 => ErrorCode::UnsupportedMethod,
            19 => ErrorCode::Cancelled,
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            408 => ErrorCode::Timeout,
            410 => ErrorCode::SessionClosed,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.as_i32()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Other(code) => write!(f, "code {code}"),
            known => write!(f, "{known:?}"),
        }
    }
}

/// Structured description of a remote failure.
///
/// Travels on the wire as the built-in exception type and is never raised
/// across the connection; it is delivered as the exception side of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("[{code}] {message}")]
pub struct ExceptionDescriptor {
    /// Failure classification.
    pub code: ErrorCode,
    /// Human-readable summary.
    pub message: String,
    /// Optional diagnostic detail.
    pub detail: Option<String>,
    /// Optional nested cause.
    #[source]
    pub cause: Option<Box<ExceptionDescriptor>>,
}

impl ExceptionDescriptor {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            cause: None,
        }
    }

    /// Attaches a diagnostic detail string.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attaches a nested cause.
    pub fn with_cause(mut self, cause: ExceptionDescriptor) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// A session-declaring request arrived without a resolvable session.
    pub fn session_required(interface_id: InterfaceId) -> Self {
        Self::new(ErrorCode::Unauthorized, "session required")
            .with_detail(format!("interface={interface_id}"))
    }

    /// No service is bound for the interface.
    pub fn unknown_interface(interface_id: InterfaceId) -> Self {
        Self::new(ErrorCode::ServiceNotImplemented, "service not implemented")
            .with_detail(format!("interface={interface_id}"))
    }

    /// The serving side registered the type but not as a method request.
    pub fn unsupported_method(type_id: TypeId) -> Self {
        Self::new(ErrorCode::UnsupportedMethod, "method not implemented")
            .with_detail(format!("type_id={type_id}"))
    }

    /// Message bytes could not be decoded.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Corrupt, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "operation cancelled")
    }

    /// Generic service failure.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RemoteError, message)
    }

    /// Depth of the cause chain, counting this descriptor.
    pub fn chain_len(&self) -> usize {
        let mut len = 1;
        let mut next = self.cause.as_deref();
        while let Some(cause) = next {
            len += 1;
            next = cause.cause.as_deref();
        }
        len
    }
}
