//! Rate-limit decision engine.
//!
//! One decision costs one store round trip in the common case:
//!
//! 1. Propose an expiry of `now + window - grace` and issue a single
//!    [`conditional_increment_or_create`](WindowStore::conditional_increment_or_create).
//! 2. A returned record means the request was counted: allow.
//! 3. A uniqueness conflict means the window is full (or a concurrent creator won). Re-read the
//!    record: if present, deny until its expiry plus grace; if it is already gone, allow, since
//!    nothing is contending any more.
//! 4. A write conflict is handed to the [`RetryCoordinator`]; if conflicts outlast every attempt
//!    the engine fails closed with a deny for one full window.
//!
//! The engine holds no mutable state. All coordination between callers, in this process or
//! others, happens through the store's atomic operation.

use crate::cancel::CancelToken;
use crate::clock::{add_duration, Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::decision::Decision;
use crate::error::{AttemptError, ConfigError, LimiterError, StoreError};
use crate::retry::{RetryCoordinator, RetryOutcome};
use crate::sleeper::Sleeper;
use crate::store::WindowStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Smallest retry hint handed out on a deny, so a hint is always in the future.
const MIN_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Decides allow/deny for identity keys against a shared [`WindowStore`].
pub struct DecisionEngine<S> {
    store: Arc<S>,
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
    retry: RetryCoordinator,
}

impl<S> std::fmt::Debug for DecisionEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("retry", &self.retry)
            .field("store", &"<store>")
            .finish()
    }
}

impl<S> Clone for DecisionEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<S> DecisionEngine<S>
where
    S: WindowStore + 'static,
{
    /// Create an engine over `store`, validating `config`.
    pub fn new(store: S, config: LimiterConfig) -> Result<Self, ConfigError> {
        Self::with_shared_store(Arc::new(store), config)
    }

    /// Create an engine over a store shared with other engines or with the caller.
    pub fn with_shared_store(store: Arc<S>, config: LimiterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let retry = RetryCoordinator::from_config(&config)?;
        Ok(Self { store, config, clock: Arc::new(SystemClock), retry })
    }

    /// Replace the wall clock used for expiry and retry-after computation.
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Replace how backoff delays are slept.
    pub fn with_sleeper<Z>(mut self, sleeper: Z) -> Self
    where
        Z: Sleeper + 'static,
    {
        self.retry.set_sleeper(Arc::new(sleeper));
        self
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Decide whether `key` may make one more request in its current window.
    ///
    /// Dropping the returned future abandons the decision at its next await point.
    pub async fn decide(&self, key: &str) -> Result<Decision, LimiterError> {
        self.decide_with_cancel(key, &CancelToken::new()).await
    }

    /// Like [`decide`](Self::decide), but gives up with [`LimiterError::Cancelled`] as soon as
    /// `cancel` fires, including in the middle of a backoff sleep.
    pub async fn decide_with_cancel(
        &self,
        key: &str,
        cancel: &CancelToken,
    ) -> Result<Decision, LimiterError> {
        let span =
            tracing::debug_span!(target: "windowlimit::engine", "decide", identity_key = %key);
        async move {
            match self.retry.run(cancel, move |_| self.attempt(key)).await? {
                RetryOutcome::Completed(decision) => Ok(decision),
                RetryOutcome::Exhausted { attempts } => {
                    let retry_after = self.config.fail_closed_retry_after(self.clock.now());
                    tracing::warn!(
                        target: "windowlimit::engine",
                        attempts,
                        %retry_after,
                        "failing closed after persistent write conflicts"
                    );
                    Ok(Decision::deny(retry_after))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// One attempt: a single conditional store operation, plus a read on uniqueness conflict.
    ///
    /// Write conflicts come back as [`AttemptError::WriteConflict`] for the caller to retry.
    pub async fn attempt(&self, key: &str) -> Result<Decision, AttemptError> {
        let now = self.clock.now();
        let expiry = self.config.proposed_expiry(now);

        match self.store.conditional_increment_or_create(key, self.config.threshold, expiry).await
        {
            Ok(Some(record)) => {
                tracing::debug!(
                    target: "windowlimit::engine",
                    counter = record.counter,
                    threshold = self.config.threshold,
                    "request admitted"
                );
                Ok(Decision::allow())
            }
            Ok(None) => Err(LimiterError::InvariantViolation(
                "conditional increment returned neither a record nor a conflict",
            )
            .into()),
            Err(StoreError::UniquenessConflict) => self.resolve_uniqueness_conflict(key, now).await,
            Err(StoreError::WriteConflict) => Err(AttemptError::WriteConflict),
            Err(StoreError::Unavailable(e)) => {
                tracing::warn!(
                    target: "windowlimit::engine",
                    error = %e,
                    "window store unavailable"
                );
                Err(LimiterError::StoreUnavailable(e).into())
            }
        }
    }

    async fn resolve_uniqueness_conflict(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, AttemptError> {
        match self.store.fetch_by_key(key).await {
            Ok(Some(record)) => {
                let retry_after = self
                    .config
                    .retry_after_for(record.window_expires_at)
                    .max(add_duration(now, MIN_RETRY_AFTER));
                tracing::debug!(
                    target: "windowlimit::engine",
                    counter = record.counter,
                    %retry_after,
                    "window exhausted, request denied"
                );
                Ok(Decision::deny(retry_after))
            }
            Ok(None) => {
                // The conflicting window was swept between the write and this read.
                tracing::debug!(
                    target: "windowlimit::engine",
                    "conflicting window already gone, treating as fresh"
                );
                Ok(Decision::allow())
            }
            Err(StoreError::Unavailable(e)) => {
                tracing::warn!(
                    target: "windowlimit::engine",
                    error = %e,
                    "window store unavailable"
                );
                Err(LimiterError::StoreUnavailable(e).into())
            }
            Err(StoreError::UniquenessConflict | StoreError::WriteConflict) => {
                Err(AttemptError::WriteConflict)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sleeper::InstantSleeper;
    use crate::store::InMemoryWindowStore;

    fn engine(threshold: u32, clock: &ManualClock) -> DecisionEngine<InMemoryWindowStore> {
        let config = LimiterConfig::builder().threshold(threshold).build().unwrap();
        let store = InMemoryWindowStore::new().with_clock(clock.clone());
        DecisionEngine::new(store, config)
            .unwrap()
            .with_clock(clock.clone())
            .with_sleeper(InstantSleeper)
    }

    #[tokio::test]
    async fn allows_up_to_threshold_then_denies() {
        let clock = ManualClock::default();
        let engine = engine(3, &clock);

        for _ in 0..3 {
            assert!(engine.decide("u1").await.unwrap().is_allowed());
        }
        let denied = engine.decide("u1").await.unwrap();
        assert!(!denied.is_allowed());
        assert!(denied.retry_after().unwrap() > clock.now());
    }

    #[tokio::test]
    async fn single_attempt_reports_admission() {
        let clock = ManualClock::default();
        let engine = engine(1, &clock);
        assert!(engine.attempt("k").await.unwrap().is_allowed());
        assert!(!engine.attempt("k").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn new_rejects_invalid_config() {
        let config = LimiterConfig { threshold: 0, ..LimiterConfig::default() };
        let err = DecisionEngine::new(InMemoryWindowStore::new(), config).unwrap_err();
        assert_eq!(err, ConfigError::ZeroThreshold);
    }

    #[tokio::test]
    async fn deny_hint_is_never_in_the_past() {
        let clock = ManualClock::default();
        // Sweep lags far behind the configured grace, so the record outlives expiry + grace.
        let store = InMemoryWindowStore::new()
            .with_clock(clock.clone())
            .with_sweep_lag(Duration::from_secs(3600));
        let config = LimiterConfig::builder().threshold(1).build().unwrap();
        let engine = DecisionEngine::new(store, config).unwrap().with_clock(clock.clone());

        assert!(engine.decide("u1").await.unwrap().is_allowed());
        clock.advance(Duration::from_secs(600));
        let denied = engine.decide("u1").await.unwrap();
        assert_eq!(denied.retry_after(), Some(clock.now() + chrono::Duration::seconds(1)));
    }
}
