//! Window record storage contract.
//!
//! The engine never reads-then-writes. Each decision issues one
//! [`conditional_increment_or_create`](WindowStore::conditional_increment_or_create), which a
//! backend must execute atomically:
//!
//! - match the record where `identity_key = key` and `counter < threshold`, increment `counter`;
//! - if no record exists, create one with `counter = 1` and `window_expires_at = new_expiry`;
//! - if a record exists but the match failed, report [`StoreError::UniquenessConflict`];
//! - if a concurrent modification invalidated an optimistic update, report
//!   [`StoreError::WriteConflict`].
//!
//! Records are deleted by the backend's own TTL mechanism some time after `window_expires_at`.
//! The engine never deletes.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod memory;
pub use memory::InMemoryWindowStore;

/// The only persisted entity: one per rate-limited identity.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WindowRecord {
    /// Primary key.
    pub identity_key: String,
    /// Requests admitted in the current window.
    pub counter: u32,
    /// Set at creation, never moved by later increments.
    pub window_expires_at: DateTime<Utc>,
    /// Optimistic-concurrency token, bumped by the store on every successful write.
    pub version: u64,
}

impl WindowRecord {
    /// First record of a fresh window.
    pub fn first(identity_key: impl Into<String>, window_expires_at: DateTime<Utc>) -> Self {
        Self { identity_key: identity_key.into(), counter: 1, window_expires_at, version: 1 }
    }
}

/// Abstract storage interface for window records.
///
/// Implementations must be safe to share between tasks; the engine holds no locks of its own.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Atomically increment-if-under-threshold, or create the window if absent.
    ///
    /// `Ok(None)` is a contract violation: a backend must either return the written record or a
    /// classified conflict.
    async fn conditional_increment_or_create(
        &self,
        key: &str,
        threshold: u32,
        new_expiry: DateTime<Utc>,
    ) -> Result<Option<WindowRecord>, StoreError>;

    /// Read the current record, `Ok(None)` if absent (never created or already swept).
    async fn fetch_by_key(&self, key: &str) -> Result<Option<WindowRecord>, StoreError>;
}

#[async_trait]
impl<S> WindowStore for std::sync::Arc<S>
where
    S: WindowStore + ?Sized,
{
    async fn conditional_increment_or_create(
        &self,
        key: &str,
        threshold: u32,
        new_expiry: DateTime<Utc>,
    ) -> Result<Option<WindowRecord>, StoreError> {
        (**self).conditional_increment_or_create(key, threshold, new_expiry).await
    }

    async fn fetch_by_key(&self, key: &str) -> Result<Option<WindowRecord>, StoreError> {
        (**self).fetch_by_key(key).await
    }
}
