//! Convenient re-exports for common windowlimit types.
pub use crate::{
    backoff::{Backoff, MAX_BACKOFF},
    cancel::CancelToken,
    clock::{Clock, SystemClock},
    config::LimiterConfig,
    decision::Decision,
    engine::DecisionEngine,
    error::{LimiterError, StoreError},
    jitter::Jitter,
    middleware::{MiddlewareError, RateLimitLayer},
    store::{InMemoryWindowStore, WindowRecord, WindowStore},
};
