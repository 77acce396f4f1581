//! Error types for the decision engine and its store adapters.
//!
//! Two layers:
//! - [`StoreError`] is the tagged result a [`WindowStore`](crate::store::WindowStore) returns.
//!   Conflicts are ordinary values here, inspected explicitly by the engine.
//! - [`LimiterError`] is what crosses the engine boundary. Only store outages, broken store
//!   invariants and cancellation ever reach a caller; every conflict is resolved internally.

use std::time::Duration;

/// Boxed error used for backend failures whose concrete type the engine does not care about.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classified failure of a single store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A create collided with an existing key, or the `counter < threshold` match failed and the
    /// upsert fell through to a create that collided.
    #[error("uniqueness conflict on identity key")]
    UniquenessConflict,
    /// Optimistic-concurrency failure while updating an existing record.
    #[error("write conflict on existing window record")]
    WriteConflict,
    /// The backend could not be reached or rejected the request.
    #[error("store unavailable: {0}")]
    Unavailable(#[source] BoxError),
}

impl StoreError {
    /// Wrap any backend error as [`StoreError::Unavailable`].
    pub fn unavailable<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        StoreError::Unavailable(err.into())
    }

    /// Check if this is a uniqueness conflict.
    pub fn is_uniqueness_conflict(&self) -> bool {
        matches!(self, Self::UniquenessConflict)
    }

    /// Check if this is a write conflict.
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, Self::WriteConflict)
    }
}

/// Errors surfaced by [`DecisionEngine::decide`](crate::DecisionEngine::decide).
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    /// The store failed for a reason other than a conflict. Never mapped to allow or deny.
    #[error("window store unavailable: {0}")]
    StoreUnavailable(#[source] BoxError),
    /// The store broke its contract (e.g. no record and no conflict).
    #[error("store invariant violated: {0}")]
    InvariantViolation(&'static str),
    /// The caller cancelled the decision while it was in flight.
    #[error("rate limit decision cancelled")]
    Cancelled,
}

impl LimiterError {
    /// Check if this error is due to cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error is due to a store outage
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Check if this error is a store contract violation
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

/// Failure of one attempt, as seen by the [`RetryCoordinator`](crate::RetryCoordinator).
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    /// Retryable: the correct counter value is unknown until the record is re-read.
    #[error("write conflict")]
    WriteConflict,
    /// Not retryable; returned to the caller as is.
    #[error(transparent)]
    Fatal(#[from] LimiterError),
}

impl AttemptError {
    /// Only write conflicts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteConflict)
    }
}

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    /// A zero cap would disable backoff entirely.
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    /// The cap is smaller than the first delay.
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

/// Errors produced while validating a [`LimiterConfig`](crate::LimiterConfig).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `threshold` must be > 0.
    #[error("threshold must be > 0")]
    ZeroThreshold,
    /// `window_minutes` must be > 0.
    #[error("window length must be at least one minute")]
    ZeroWindow,
    /// `max_attempts` must be > 0.
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    /// Backoff settings were inconsistent.
    #[error(transparent)]
    Backoff(#[from] BackoffError),
}
