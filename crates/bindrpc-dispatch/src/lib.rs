//! Method envelopes and asynchronous dispatch to bound services.
//!
//! A transport hands request bytes to a [`ServerConnection`], which decodes
//! them through a [`Protocol`], injects a session, runs the request against
//! the service bound in the [`RemoteDirectory`] and returns an encoded
//! [`MethodResult`]. The calling side correlates results with
//! [`PendingCalls`].

mod error;

pub mod completion;
pub mod connection;
pub mod directory;
pub mod dispatcher;
pub mod envelope;
pub mod pending;
pub mod protocol;
pub mod session;

pub use completion::{Abandoned, Completion, CompletionFuture};
pub use connection::{Reply, ServerConnection};
pub use directory::{Remote, RemoteDirectory, RemoteInterface};
pub use dispatcher::Dispatcher;
pub use envelope::{MethodRequest, MethodResult, Value};
pub use error::DispatchError;
pub use pending::{CallOutcome, PendingCall, PendingCalls};
pub use protocol::{Protocol, ProtocolBuilder};
pub use session::{
    ConnectionContext, NoSessions, Session, SessionField, SessionResolver, SessionStore,
};
