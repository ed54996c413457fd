//! Per-call completions
//!
//! Every admitted request returns a `Completion` that resolves exactly once
//! with the operation's outcome.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::discovery::SearchOutcome;
use crate::error::JoinError;
use crate::session::ConnectionInfo;

/// Outcome reported when an operation was abandoned (coordinator shut down
/// or dropped before it finished)
pub trait Abandoned {
    fn abandoned() -> Self;
}

impl Abandoned for bool {
    fn abandoned() -> Self {
        false
    }
}

impl Abandoned for SearchOutcome {
    fn abandoned() -> Self {
        SearchOutcome::failed()
    }
}

impl Abandoned for Result<ConnectionInfo, JoinError> {
    fn abandoned() -> Self {
        Err(JoinError::InvalidInterface)
    }
}

/// Future resolving to one operation's outcome
#[must_use = "a completion does nothing unless awaited"]
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Completion<T> {
    pub(crate) fn new(rx: oneshot::Receiver<T>) -> Self {
        Self { rx }
    }

    /// A completion that is already resolved
    pub(crate) fn ready(value: T) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(value);
        Self { rx }
    }
}

impl<T: Abandoned> Future for Completion<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| T::abandoned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_completion() {
        assert!(Completion::ready(true).await);
    }

    #[tokio::test]
    async fn test_dropped_sender_resolves_abandoned() {
        let (tx, rx) = oneshot::channel::<bool>();
        drop(tx);
        assert!(!Completion::new(rx).await);

        let (tx, rx) = oneshot::channel::<SearchOutcome>();
        drop(tx);
        let outcome = Completion::new(rx).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_sent_value_is_delivered() {
        let (tx, rx) = oneshot::channel::<Result<ConnectionInfo, JoinError>>();
        tx.send(Err(JoinError::Timeout)).unwrap();
        assert_eq!(Completion::new(rx).await.unwrap_err(), JoinError::Timeout);
    }
}
