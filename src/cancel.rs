//! Cooperative cancellation for in-flight decisions.
//!
//! Dropping the `decide` future already cancels it. A [`CancelToken`] is for callers that want
//! to cancel from elsewhere (an upstream timeout, a shutdown signal) and still observe
//! [`LimiterError::Cancelled`](crate::LimiterError::Cancelled) instead of a deny.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable cancellation handle. Once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { state: Arc::new(tx) }
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone: nobody can cancel any more.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_resolves_immediately_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("should resolve");
    }

    #[tokio::test]
    async fn clones_observe_cancellation() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn fresh_token_is_not_cancelled() {
        let token = CancelToken::default();
        assert!(!token.is_cancelled());
        let pending = tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(pending.is_err());
    }
}
