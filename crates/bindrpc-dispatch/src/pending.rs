//! Calling side: correlation of outstanding requests with their results.

use std::{
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
    task::{Context, Poll},
};

use bindrpc_core::{ErrorCode, ExceptionDescriptor, ReqId};
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::MethodResult;

/// Delivered to a waiting call: the remote result, or a local failure such
/// as a lost connection.
pub type CallOutcome = Result<MethodResult, ExceptionDescriptor>;

/// Outstanding calls of one client connection keyed by [`ReqId`].
#[derive(Debug)]
pub struct PendingCalls {
    next_req_id: AtomicU64,
    calls: DashMap<ReqId, oneshot::Sender<CallOutcome>>,
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self {
            next_req_id: AtomicU64::new(1),
            calls: DashMap::new(),
        }
    }
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a request id and the future its result arrives on.
    pub fn register(&self) -> (ReqId, PendingCall) {
        let req_id = ReqId(self.next_req_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.calls.insert(req_id, tx);
        (req_id, PendingCall { req_id, rx })
    }

    /// Routes a result to its call. Unknown or already finished ids are
    /// logged and dropped.
    pub fn resolve(&self, req_id: ReqId, result: MethodResult) -> bool {
        self.deliver(req_id, Ok(result))
    }

    /// Fails one call locally.
    pub fn fail(&self, req_id: ReqId, exception: ExceptionDescriptor) -> bool {
        self.deliver(req_id, Err(exception))
    }

    fn deliver(&self, req_id: ReqId, outcome: CallOutcome) -> bool {
        match self.calls.remove(&req_id) {
            Some((_, tx)) => tx.send(outcome).is_ok(),
            None => {
                tracing::warn!(req_id = req_id.0, "result for unknown request id");
                false
            }
        }
    }

    /// Stops waiting for a call without delivering anything.
    pub fn forget(&self, req_id: ReqId) -> bool {
        self.calls.remove(&req_id).is_some()
    }

    /// Fails every outstanding call, e.g. when the connection is lost.
    pub fn fail_all(&self, exception: &ExceptionDescriptor) -> usize {
        let req_ids: Vec<ReqId> = self.calls.iter().map(|entry| *entry.key()).collect();
        req_ids
            .into_iter()
            .filter_map(|req_id| self.calls.remove(&req_id))
            .map(|(_, tx)| {
                let _ = tx.send(Err(exception.clone()));
            })
            .count()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Resolves with the call's outcome. A call whose table entry disappears
/// without delivery fails with `ClientDied`.
#[derive(Debug)]
pub struct PendingCall {
    req_id: ReqId,
    rx: oneshot::Receiver<CallOutcome>,
}

impl PendingCall {
    pub fn req_id(&self) -> ReqId {
        self.req_id
    }
}

impl Future for PendingCall {
    type Output = CallOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let req_id = self.req_id;
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.unwrap_or_else(|_| {
                Err(ExceptionDescriptor::new(ErrorCode::ClientDied, "call dropped")
                    .with_detail(format!("req_id={}", req_id.0)))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use bindrpc_core::protocol::TYPEID_INT32;

    use super::*;
    use crate::Value;

    #[tokio::test]
    async fn results_reach_their_own_call() {
        let pending = PendingCalls::new();
        let (first_id, first) = pending.register();
        let (second_id, second) = pending.register();
        assert_ne!(first_id, second_id);

        assert!(pending.resolve(second_id, MethodResult::ok(TYPEID_INT32, Value::Int32(2))));
        assert!(pending.resolve(first_id, MethodResult::ok(TYPEID_INT32, Value::Int32(1))));
        assert!(!pending.resolve(first_id, MethodResult::ok(TYPEID_INT32, Value::Int32(9))));

        let first = first.await.expect("first call should resolve");
        let second = second.await.expect("second call should resolve");
        assert!(matches!(first.value(), Some(Value::Int32(1))));
        assert!(matches!(second.value(), Some(Value::Int32(2))));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn fail_all_releases_every_call() {
        let pending = PendingCalls::new();
        let calls: Vec<PendingCall> = (0..3).map(|_| pending.register().1).collect();
        let (forgotten_id, forgotten) = pending.register();
        assert!(pending.forget(forgotten_id));

        assert_eq!(pending.fail_all(&ExceptionDescriptor::cancelled()), 3);
        for call in calls {
            let err = call.await.expect_err("call should fail");
            assert_eq!(err.code, ErrorCode::Cancelled);
        }
        let err = forgotten.await.expect_err("forgotten call should fail");
        assert_eq!(err.code, ErrorCode::ClientDied);
    }
}
