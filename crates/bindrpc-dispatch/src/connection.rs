//! Serving side of one connection: concurrent dispatch with correlated
//! replies.

use std::sync::{Arc, atomic::AtomicU64};

use bindrpc_core::{
    ExceptionDescriptor, ReqId,
    protocol::{TYPEID_EXCEPTION, negotiate_version},
};
use bindrpc_wire::{Encoded, StreamResolver};
use dashmap::DashMap;
use tokio::{sync::mpsc, task::AbortHandle};

use crate::{
    ConnectionContext, DispatchError, Dispatcher, MethodRequest, MethodResult, Protocol,
    envelope::write_result,
};

/// An encoded result ready for the transport.
#[derive(Debug)]
pub struct Reply {
    pub req_id: ReqId,
    pub encoded: Encoded,
}

/// Tracks in-flight requests of one connection.
///
/// Each request runs on its own task. Replies are sent on the channel
/// returned by [`ServerConnection::new`] as they complete, in any order.
pub struct ServerConnection {
    protocol: Protocol,
    dispatcher: Dispatcher,
    context: Arc<ConnectionContext>,
    replies: mpsc::UnboundedSender<Reply>,
    in_flight: Arc<DashMap<ReqId, AbortHandle>>,
    stream_ids: Arc<AtomicU64>,
    max_reply: usize,
}

impl ServerConnection {
    pub fn new(
        protocol: Protocol,
        dispatcher: Dispatcher,
        context: ConnectionContext,
    ) -> (Self, mpsc::UnboundedReceiver<Reply>) {
        let (replies, rx) = mpsc::unbounded_channel();
        let conn = Self {
            protocol,
            dispatcher,
            context: Arc::new(context),
            replies,
            in_flight: Arc::new(DashMap::new()),
            stream_ids: Arc::new(AtomicU64::new(1)),
            max_reply: usize::MAX,
        };
        (conn, rx)
    }

    /// Caps the encoded size of a reply. A larger result is answered with an
    /// internal exception instead.
    pub fn with_max_reply_size(mut self, max: usize) -> Self {
        self.max_reply = max;
        self
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    /// Decodes a request and dispatches it on a new task.
    ///
    /// Decoding happens before this returns, so stream bodies referenced by
    /// the request are bound before the transport reads further frames.
    /// A request that fails to decode is answered with an exception result.
    pub fn handle_request(
        &self,
        req_id: ReqId,
        bytes: &[u8],
        streams: Option<Arc<dyn StreamResolver>>,
    ) {
        let (decoded, version) = self.decode(bytes, streams);
        let request = match decoded {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(req_id = req_id.0, error = %err, "failed to decode request");
                let result = MethodResult::exception(TYPEID_EXCEPTION, ExceptionDescriptor::from(&err));
                let encoded =
                    encode_reply(&self.protocol, version, &self.stream_ids, self.max_reply, &result);
                self.send(req_id, encoded);
                return;
            }
        };

        let result_type = request.result_type_id();
        let dispatcher = self.dispatcher.clone();
        let context = Arc::clone(&self.context);
        let task = tokio::spawn(async move { dispatcher.dispatch(request, &context).await });
        let task_id = task.id();
        if self.in_flight.insert(req_id, task.abort_handle()).is_some() {
            tracing::warn!(req_id = req_id.0, "request id reused while still in flight");
        }

        let in_flight = Arc::clone(&self.in_flight);
        let replies = self.replies.clone();
        let protocol = self.protocol.clone();
        let stream_ids = Arc::clone(&self.stream_ids);
        let max_reply = self.max_reply;
        tokio::spawn(async move {
            let joined = task.await;
            // Cancel and abandon remove the entry first, even when the task
            // has already finished.
            if in_flight
                .remove_if(&req_id, |_, handle| handle.id() == task_id)
                .is_none()
            {
                tracing::debug!(req_id = req_id.0, "request abandoned");
                return;
            }
            let result = match joined {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => {
                    tracing::debug!(req_id = req_id.0, "request abandoned");
                    return;
                }
                Err(err) => {
                    tracing::warn!(req_id = req_id.0, error = %err, "request task failed");
                    MethodResult::exception(
                        result_type,
                        ExceptionDescriptor::internal("method panicked"),
                    )
                }
            };
            let encoded = encode_reply(&protocol, version, &stream_ids, max_reply, &result);
            if replies.send(Reply { req_id, encoded }).is_err() {
                tracing::debug!(req_id = req_id.0, "connection closed before reply");
            }
        });
    }

    fn decode(
        &self,
        bytes: &[u8],
        streams: Option<Arc<dyn StreamResolver>>,
    ) -> (Result<Box<dyn MethodRequest>, DispatchError>, u64) {
        let mut input = match self.protocol.input(bytes) {
            Ok(input) => input,
            Err(err) => return (Err(err.into()), self.protocol.version()),
        };
        if let Some(streams) = streams {
            input = input.with_streams(streams);
        }
        let version = negotiate_version(self.protocol.version(), input.version());
        let decoded = self
            .protocol
            .read_request(&mut input)
            .and_then(|request| {
                input.finish()?;
                Ok(request)
            });
        (decoded, version)
    }

    fn send(&self, req_id: ReqId, encoded: Encoded) {
        if self.replies.send(Reply { req_id, encoded }).is_err() {
            tracing::debug!(req_id = req_id.0, "connection closed before reply");
        }
    }

    /// Aborts one request; its result is never sent, even if the method
    /// already completed.
    pub fn cancel(&self, req_id: ReqId) -> bool {
        match self.in_flight.remove(&req_id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Aborts every in-flight request. Completions that fire afterwards are
    /// discarded silently. Returns the number of aborted requests.
    pub fn abandon(&self) -> usize {
        let req_ids: Vec<ReqId> = self.in_flight.iter().map(|entry| *entry.key()).collect();
        let aborted = req_ids
            .into_iter()
            .filter(|req_id| self.cancel(*req_id))
            .count();
        if aborted > 0 {
            tracing::debug!(
                connection_id = self.context.connection_id.0,
                aborted,
                "abandoned in-flight requests"
            );
        }
        aborted
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.abandon();
    }
}

/// Encodes `result` at the negotiated version. A result that cannot be
/// encoded, or whose encoding exceeds `max_size`, is replaced by an internal
/// exception.
fn encode_reply(
    protocol: &Protocol,
    version: u64,
    stream_ids: &Arc<AtomicU64>,
    max_size: usize,
    result: &MethodResult,
) -> Encoded {
    let mut out = protocol
        .output(version)
        .with_stream_ids(Arc::clone(stream_ids));
    let failure = match write_result(&mut out, result) {
        Ok(()) => {
            let encoded = out.finish();
            let size = encoded.bytes.len();
            if size <= max_size {
                return encoded;
            }
            tracing::warn!(size, max_size, type_id = result.type_id().0, "result exceeds frame limit");
            ExceptionDescriptor::internal("result exceeds frame limit")
                .with_detail(format!("{size} > {max_size} bytes"))
        }
        Err(err) => {
            tracing::warn!(error = %err, type_id = result.type_id().0, "failed to encode result");
            ExceptionDescriptor::internal("failed to encode result").with_detail(err.to_string())
        }
    };
    let fallback = MethodResult::exception(result.type_id(), failure);
    let mut out = protocol.output(version);
    if let Err(err) = write_result(&mut out, &fallback) {
        tracing::warn!(error = %err, "failed to encode fallback result");
        return Encoded::default();
    }
    out.finish()
}
