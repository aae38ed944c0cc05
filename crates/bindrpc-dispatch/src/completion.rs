//! Single-fire completion handles connecting a method body to the dispatcher.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use bindrpc_core::ExceptionDescriptor;
use thiserror::Error;
use tokio::sync::oneshot;

/// Outcome a method body reports: a value or a remote exception.
pub type Outcome<T> = Result<T, ExceptionDescriptor>;

/// The producer was dropped without reporting an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("completion dropped without an outcome")]
pub struct Abandoned;

/// Producer side. Consumed by the first completion, so a second one cannot
/// be expressed.
#[derive(Debug)]
pub struct Completion<T> {
    tx: oneshot::Sender<Outcome<T>>,
}

/// Consumer side, awaited by the dispatcher.
#[derive(Debug)]
pub struct CompletionFuture<T> {
    rx: oneshot::Receiver<Outcome<T>>,
}

pub fn channel<T>() -> (Completion<T>, CompletionFuture<T>) {
    let (tx, rx) = oneshot::channel();
    (Completion { tx }, CompletionFuture { rx })
}

impl<T> Completion<T> {
    /// Delivers the outcome. Returns `false` when the consumer is gone; the
    /// outcome is then discarded.
    pub fn complete(self, outcome: Outcome<T>) -> bool {
        self.tx.send(outcome).is_ok()
    }

    pub fn succeed(self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(self, exception: ExceptionDescriptor) -> bool {
        self.complete(Err(exception))
    }

    /// True once the consumer has been dropped.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the consumer is dropped, letting long-running work stop
    /// early.
    pub async fn abandoned(&mut self) {
        self.tx.closed().await;
    }
}

impl<T> Future for CompletionFuture<T> {
    type Output = Result<Outcome<T>, Abandoned>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| res.map_err(|_| Abandoned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_synchronously() {
        let (completion, future) = channel::<i32>();
        assert!(completion.succeed(7));
        assert_eq!(future.await, Ok(Ok(7)));
    }

    #[tokio::test]
    async fn completes_from_another_task() {
        let (completion, future) = channel::<String>();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            completion.fail(ExceptionDescriptor::internal("boom"));
        });
        let outcome = future.await.expect("producer should fire");
        assert_eq!(
            outcome.expect_err("outcome should be an exception").message,
            "boom"
        );
    }

    #[tokio::test]
    async fn dropped_producer_is_detected() {
        let (completion, future) = channel::<()>();
        drop(completion);
        assert_eq!(future.await, Err(Abandoned));
    }

    #[tokio::test]
    async fn late_completion_after_consumer_left_is_silent() {
        let (mut completion, future) = channel::<u8>();
        drop(future);
        completion.abandoned().await;
        assert!(completion.is_abandoned());
        assert!(!completion.succeed(1));
    }
}
