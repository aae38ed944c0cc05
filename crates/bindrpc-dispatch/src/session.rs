//! Session injection.
//!
//! The transport assigns each connection a [`ConnectionContext`]; a
//! [`SessionResolver`] maps it to an authenticated [`Session`] before the
//! request executes. The dispatcher never looks inside a session.

use std::{any::Any, fmt, sync::Arc};

use async_trait::async_trait;
use bindrpc_core::ConnectionId;
use bindrpc_wire::{CodecError, Input, Output, Serializable, WireValue};
use dashmap::DashMap;

/// Opaque handle to server-side session state.
#[derive(Clone)]
pub struct Session(Arc<dyn Any + Send + Sync>);

impl Session {
    pub fn new<T: Any + Send + Sync>(state: T) -> Self {
        Self(Arc::new(state))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

/// Session field of a method request.
///
/// On the wire it is an object slot carrying the caller's session reference,
/// or null. The serving side reads that placeholder and drops it; the
/// dispatcher then injects the session resolved for the connection.
#[derive(Debug, Default)]
pub struct SessionField {
    reference: Option<Box<dyn Serializable>>,
    session: Option<Session>,
}

impl SessionField {
    pub fn new() -> Self {
        Self::default()
    }

    /// Field sent by a caller that holds a session reference object.
    pub fn with_reference(reference: impl Serializable) -> Self {
        Self {
            reference: Some(Box::new(reference)),
            session: None,
        }
    }

    /// Reference written by the caller. Always `None` after decoding.
    pub fn reference(&self) -> Option<&dyn Serializable> {
        self.reference.as_deref()
    }

    /// Session injected by the dispatcher.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn take_session(&mut self) -> Option<Session> {
        self.session.take()
    }

    pub(crate) fn inject(&mut self, session: Session) {
        self.reference = None;
        self.session = Some(session);
    }
}

impl WireValue for SessionField {
    const MIN_LEN: usize = 4;

    fn write_to(&self, out: &mut Output) -> Result<(), CodecError> {
        out.write_object(self.reference.as_deref())
    }

    fn read_from(input: &mut Input<'_>) -> Result<Self, CodecError> {
        let position = input.position();
        if let Some(placeholder) = input.read_object()? {
            tracing::debug!(
                position,
                type_id = placeholder.wire_type_id().0,
                "dropping session placeholder sent by the caller"
            );
        }
        Ok(Self::default())
    }
}

/// What the transport knows about the peer of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    /// Transport-assigned connection id.
    pub connection_id: ConnectionId,
    /// Human readable peer label for logs.
    pub peer: String,
    /// Opaque credential presented by the peer, if any.
    pub credential: Option<String>,
}

impl ConnectionContext {
    pub fn new(connection_id: ConnectionId, peer: impl Into<String>) -> Self {
        Self {
            connection_id,
            peer: peer.into(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }
}

#[async_trait]
pub trait SessionResolver: Send + Sync + 'static {
    async fn resolve_session(&self, context: &ConnectionContext) -> Option<Session>;
}

/// Resolver for transports without authentication.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSessions;

#[async_trait]
impl SessionResolver for NoSessions {
    async fn resolve_session(&self, _context: &ConnectionContext) -> Option<Session> {
        None
    }
}

/// In-memory session store keyed by credential token.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, session: Session) -> Option<Session> {
        self.sessions.insert(token.into(), session)
    }

    /// Ends a session; later requests with its token resolve to none.
    pub fn remove(&self, token: &str) -> Option<Session> {
        self.sessions.remove(token).map(|(_, session)| session)
    }

    pub fn get(&self, token: &str) -> Option<Session> {
        self.sessions.get(token).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionResolver for SessionStore {
    async fn resolve_session(&self, context: &ConnectionContext) -> Option<Session> {
        let token = context.credential.as_deref()?;
        self.get(token)
    }
}
