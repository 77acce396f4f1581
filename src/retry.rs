//! Bounded retry around a single decision attempt.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries).
//! - Only [`AttemptError::WriteConflict`] is retried; fatal errors return immediately.
//! - Backoff calculates delay per retry attempt; jitter (off by default) randomizes it.
//! - Sleeper controls how delays are applied (production uses `TokioSleeper`; tests can inject
//!   `InstantSleeper`/`TrackingSleeper`).
//! - Every attempt and every sleep races the caller's [`CancelToken`]; cancellation wins and is
//!   reported as [`LimiterError::Cancelled`].
//!
//! Invariants:
//! - Attempts never exceed `max_attempts`.
//! - Exhaustion is a value ([`RetryOutcome::Exhausted`]), not an error; the caller picks the
//!   fail-closed result.
//! - Backoff is invoked exactly `attempts - 1` times.

use crate::backoff::Backoff;
use crate::cancel::CancelToken;
use crate::config::{LimiterConfig, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_ATTEMPTS};
use crate::error::{AttemptError, ConfigError, LimiterError};
use crate::jitter::Jitter;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;

/// How a retried operation ended when it did not fail fatally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// An attempt succeeded.
    Completed(T),
    /// Every attempt hit a write conflict.
    Exhausted { attempts: usize },
}

/// Retry loop combining backoff, jitter, sleeper, and cancellation.
#[derive(Clone)]
pub struct RetryCoordinator {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryCoordinator")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl RetryCoordinator {
    /// Construct a new builder with defaults.
    pub fn builder() -> RetryCoordinatorBuilder {
        RetryCoordinatorBuilder::new()
    }

    /// Coordinator matching the retry settings of `config`.
    pub fn from_config(config: &LimiterConfig) -> Result<Self, ConfigError> {
        Self::builder()
            .max_attempts(config.max_attempts)
            .backoff(config.backoff()?)
            .with_jitter(config.jitter)
            .build()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub(crate) fn set_sleeper(&mut self, sleeper: Arc<dyn Sleeper>) {
        self.sleeper = sleeper;
    }

    /// Run `operation` until it succeeds, fails fatally, runs out of attempts, or `cancel` fires.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn run<T, Fut, Op>(
        &self,
        cancel: &CancelToken,
        mut operation: Op,
    ) -> Result<RetryOutcome<T>, LimiterError>
    where
        Fut: Future<Output = Result<T, AttemptError>>,
        Op: FnMut(usize) -> Fut,
    {
        for attempt in 1..=self.max_attempts {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LimiterError::Cancelled),
                result = operation(attempt) => result,
            };

            match result {
                Ok(value) => return Ok(RetryOutcome::Completed(value)),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::WriteConflict) => {
                    if attempt >= self.max_attempts {
                        tracing::warn!(
                            target: "windowlimit::retry",
                            attempts = attempt,
                            "write conflicts persisted through every attempt"
                        );
                        return Ok(RetryOutcome::Exhausted { attempts: attempt });
                    }

                    let delay = self.jitter.apply(self.backoff.delay(attempt));
                    tracing::trace!(
                        target: "windowlimit::retry",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "write conflict, backing off"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(LimiterError::Cancelled),
                        _ = self.sleeper.sleep(delay) => {}
                    }
                }
            }
        }

        Ok(RetryOutcome::Exhausted { attempts: self.max_attempts })
    }
}

/// Builder for [`RetryCoordinator`].
pub struct RetryCoordinatorBuilder {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryCoordinatorBuilder {
    /// Create a builder with the limiter's default retry policy.
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::exponential(DEFAULT_INITIAL_BACKOFF),
            jitter: Jitter::None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Set total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Build the coordinator, validating inputs.
    pub fn build(self) -> Result<RetryCoordinator, ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(0));
        }
        Ok(RetryCoordinator {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            sleeper: self.sleeper,
        })
    }
}

impl Default for RetryCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
