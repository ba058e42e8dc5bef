//! External cancellation signal for in-flight requests.
//!
//! A [`CancelHandle`] fires once; every [`Cancellation`] cloned from the same pair
//! observes it. Dispatches race their backoff sleeps and network calls against
//! [`Cancellation::cancelled`].

use tokio::sync::watch;

/// Create a linked handle/signal pair.
///
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (handle, cancellation) = dynamodb_direct::cancel::pair();
/// handle.cancel();
/// cancellation.cancelled().await;
/// assert!(cancellation.is_cancelled());
/// # }
/// ```
pub fn pair() -> (CancelHandle, Cancellation) {
    let (sender, receiver) = watch::channel(false);
    (CancelHandle { sender }, Cancellation { receiver })
}

/// The sending side of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel every request observing the linked [`Cancellation`].
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// The observing side of a cancellation pair.
#[derive(Clone, Debug)]
pub struct Cancellation {
    receiver: watch::Receiver<bool>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::never()
    }
}

impl Cancellation {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, cancellation) = pair();
        cancellation
    }

    /// Whether the linked handle has fired.
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once the linked handle fires. Pends forever if the handle was
    /// dropped without firing.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let (handle, cancellation) = pair();
        let waiter = tokio::spawn({
            let cancellation = cancellation.clone();
            async move { cancellation.cancelled().await }
        });
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(cancellation.is_cancelled());
    }

    #[tokio::test]
    async fn test_never_does_not_fire() {
        let cancellation = Cancellation::never();
        assert!(!cancellation.is_cancelled());
        let fired = tokio::time::timeout(Duration::from_millis(20), cancellation.cancelled()).await;
        assert!(fired.is_err());
    }
}
