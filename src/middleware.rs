//! Tower middleware that puts a [`DecisionEngine`] in front of a service.
//!
//! The layer only knows how to ask for a decision; turning a denial into a protocol response
//! (status code, `Retry-After` header) stays with the transport, using
//! [`MiddlewareError::retry_after_secs`].

use crate::decision::Decision;
use crate::engine::DecisionEngine;
use crate::error::LimiterError;
use crate::store::WindowStore;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_layer::Layer;
use tower_service::Service;

/// Errors produced by [`RateLimitService`].
#[derive(Debug, thiserror::Error)]
pub enum MiddlewareError<E> {
    /// The identity is over budget for its current window.
    #[error("rate limit exceeded, retry after {retry_after}")]
    RateLimited { retry_after: DateTime<Utc> },
    /// The limiter could not decide (store outage, broken store, cancellation).
    #[error(transparent)]
    Limiter(#[from] LimiterError),
    /// The wrapped service failed.
    #[error("{0}")]
    Inner(#[source] E),
}

impl<E> MiddlewareError<E> {
    /// Check if this error is a rate-limit denial
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Seconds until retry for a denial, with `extra_grace` added on top.
    pub fn retry_after_secs(&self, now: DateTime<Utc>, extra_grace: Duration) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } => {
                Decision::deny(*retry_after).retry_after_secs(now, extra_grace)
            }
            _ => None,
        }
    }
}

/// A layer that enforces rate limits using a [`DecisionEngine`].
///
/// `key_fn` extracts the identity key (user id, API key, client address) from each request.
pub struct RateLimitLayer<S, F> {
    engine: Arc<DecisionEngine<S>>,
    key_fn: Arc<F>,
}

impl<S, F> Clone for RateLimitLayer<S, F> {
    fn clone(&self) -> Self {
        Self { engine: self.engine.clone(), key_fn: self.key_fn.clone() }
    }
}

impl<S, F> RateLimitLayer<S, F> {
    /// Create a new rate limit layer.
    pub fn new(engine: DecisionEngine<S>, key_fn: F) -> Self {
        Self { engine: Arc::new(engine), key_fn: Arc::new(key_fn) }
    }
}

impl<Inner, S, F> Layer<Inner> for RateLimitLayer<S, F> {
    type Service = RateLimitService<Inner, S, F>;

    fn layer(&self, inner: Inner) -> Self::Service {
        RateLimitService { inner, engine: self.engine.clone(), key_fn: self.key_fn.clone() }
    }
}

/// Middleware service that enforces rate limits.
pub struct RateLimitService<Inner, S, F> {
    inner: Inner,
    engine: Arc<DecisionEngine<S>>,
    key_fn: Arc<F>,
}

impl<Inner: Clone, S, F> Clone for RateLimitService<Inner, S, F> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), engine: self.engine.clone(), key_fn: self.key_fn.clone() }
    }
}

impl<Inner, S, F, Req> Service<Req> for RateLimitService<Inner, S, F>
where
    Inner: Service<Req> + Clone + Send + 'static,
    Inner::Future: Send + 'static,
    Inner::Error: Send + 'static,
    S: WindowStore + 'static,
    F: Fn(&Req) -> String + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = Inner::Response;
    type Error = MiddlewareError<Inner::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(MiddlewareError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let engine = self.engine.clone();
        let key = (self.key_fn)(&req);
        // Hand the readied service to the future and keep a fresh clone for the next call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let decision = engine.decide(&key).await?;
            match decision.retry_after() {
                None => inner.call(req).await.map_err(MiddlewareError::Inner),
                Some(retry_after) => Err(MiddlewareError::RateLimited { retry_after }),
            }
        })
    }
}
