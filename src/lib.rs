#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # windowlimit
//!
//! Distributed fixed-window rate limiting over a shared, TTL-capable document store.
//!
//! Many gateway instances or service replicas agree on whether an identity (user, API key, IP)
//! is over its request budget without talking to each other. Each decision is a single atomic
//! "increment if under threshold, else create" against the store; conflicts are classified and
//! resolved locally, and the store's TTL sweep ends each window.
//!
//! ## Features
//!
//! - **One round trip** per decision in the common case
//! - **Conflict handling**: uniqueness conflicts resolved inline, write conflicts retried with
//!   exponential backoff and fail-closed on exhaustion
//! - **Cancellation** of in-flight decisions, including mid-backoff
//! - **Pluggable stores** through [`WindowStore`]; an in-memory store ships for tests and
//!   single-process use, `windowlimit-etcd` for etcd
//! - **Tower middleware** via [`RateLimitLayer`]
//!
//! ## Quick Start
//!
//! ```rust
//! use windowlimit::{DecisionEngine, InMemoryWindowStore, LimiterConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = LimiterConfig::builder().threshold(2).window_minutes(1).build().unwrap();
//!     let engine = DecisionEngine::new(InMemoryWindowStore::new(), config).unwrap();
//!
//!     assert!(engine.decide("user-42").await.unwrap().is_allowed());
//!     assert!(engine.decide("user-42").await.unwrap().is_allowed());
//!
//!     let denied = engine.decide("user-42").await.unwrap();
//!     assert!(!denied.is_allowed());
//!     assert!(denied.retry_after().is_some());
//! }
//! ```

pub mod backoff;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod jitter;
pub mod middleware;
pub mod prelude;
pub mod retry;
pub mod sleeper;
pub mod store;

// Re-exports
pub use backoff::Backoff;
pub use cancel::CancelToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LimiterConfig, LimiterConfigBuilder};
pub use decision::Decision;
pub use engine::DecisionEngine;
pub use error::{AttemptError, BoxError, ConfigError, LimiterError, StoreError};
pub use jitter::Jitter;
pub use middleware::{MiddlewareError, RateLimitLayer, RateLimitService};
pub use retry::{RetryCoordinator, RetryCoordinatorBuilder, RetryOutcome};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use store::{InMemoryWindowStore, WindowRecord, WindowStore};
