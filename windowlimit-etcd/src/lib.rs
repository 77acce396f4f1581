//! etcd window store for `windowlimit` (companion crate).
//! Bring your own `etcd_client::Client`; windows are stored as JSON under a prefix.
//!
//! Window expiry is enforced by an etcd lease attached when the window is created. Increments
//! keep that lease, so traffic never extends a window.
//!
//! etcd deletes a key as soon as its lease runs out, so there is no sweep lag to cover. Build the
//! engine's config with [`config_builder`] (grace [`RECOMMENDED_TTL_SWEEP_GRACE`]); the default
//! 60 s grace would shrink every one-minute window to the one-second lease minimum.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use etcd_client::{Compare, CompareOp, PutOptions, Txn, TxnOp};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use windowlimit::{LimiterConfig, LimiterConfigBuilder, StoreError, WindowRecord, WindowStore};

/// Sweep grace for etcd-backed limiters: lease expiry removes keys on time.
pub const RECOMMENDED_TTL_SWEEP_GRACE: Duration = Duration::ZERO;

/// [`LimiterConfig`] builder with the sweep grace set for etcd leases.
pub fn config_builder() -> LimiterConfigBuilder {
    LimiterConfig::builder().ttl_sweep_grace(RECOMMENDED_TTL_SWEEP_GRACE)
}

/// Value stored at `<prefix>/<identity_key>`.
#[derive(Debug, Serialize, Deserialize)]
struct StoredWindow {
    counter: u32,
    window_expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct EtcdWindowStore {
    prefix: String,
    client: etcd_client::Client,
}

impl std::fmt::Debug for EtcdWindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdWindowStore")
            .field("prefix", &self.prefix)
            .field("client", &"<etcd_client::Client>")
            .finish()
    }
}

impl EtcdWindowStore {
    /// Create a store using an existing etcd client; keys will be `prefix/<identity_key>`.
    ///
    /// # Errors
    /// Returns `Err` if the prefix is empty, contains control characters, or is otherwise invalid.
    pub fn new(prefix: impl Into<String>, client: etcd_client::Client) -> Result<Self, String> {
        let prefix = normalize_prefix(prefix.into())?;
        Ok(Self { prefix, client })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key_for(&self, identity_key: &str) -> String {
        format!("{}/{}", self.prefix, identity_key)
    }

    async fn create(
        &self,
        key: String,
        identity_key: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<Option<WindowRecord>, StoreError> {
        let mut client = self.client.clone();
        let value = encode(&StoredWindow { counter: 1, window_expires_at: new_expiry })?;
        let lease = client
            .lease_grant(lease_ttl_secs(new_expiry, Utc::now()), None)
            .await
            .map_err(StoreError::unavailable)?
            .id();

        let txn = Txn::new()
            .when([Compare::create_revision(key.clone(), CompareOp::Equal, 0)])
            .and_then([TxnOp::put(key.clone(), value, Some(PutOptions::new().with_lease(lease)))]);
        let resp = client.txn(txn).await.map_err(StoreError::unavailable)?;
        if !resp.succeeded() {
            // Another writer created the window first; our lease has nothing attached.
            if let Err(e) = client.lease_revoke(lease).await {
                tracing::debug!(
                    target: "windowlimit_etcd",
                    key = %key,
                    lease,
                    error = %e,
                    "failed to revoke unused lease"
                );
            }
            return Err(StoreError::UniquenessConflict);
        }

        Ok(Some(WindowRecord::first(identity_key, new_expiry)))
    }
}

#[async_trait]
impl WindowStore for EtcdWindowStore {
    async fn conditional_increment_or_create(
        &self,
        identity_key: &str,
        threshold: u32,
        new_expiry: DateTime<Utc>,
    ) -> Result<Option<WindowRecord>, StoreError> {
        let key = self.key_for(identity_key);
        let mut client = self.client.clone();
        let resp = client.get(key.as_str(), None).await.map_err(StoreError::unavailable)?;

        let Some(kv) = resp.kvs().first() else {
            return self.create(key, identity_key, new_expiry).await;
        };
        let stored = decode(kv.value())?;
        if stored.counter >= threshold {
            return Err(StoreError::UniquenessConflict);
        }

        let next = StoredWindow { counter: stored.counter + 1, ..stored };
        let txn = Txn::new()
            .when([Compare::mod_revision(key.clone(), CompareOp::Equal, kv.mod_revision())])
            .and_then([TxnOp::put(
                key.clone(),
                encode(&next)?,
                Some(PutOptions::new().with_ignore_lease()),
            )]);
        let resp = client.txn(txn).await.map_err(StoreError::unavailable)?;
        if !resp.succeeded() {
            tracing::trace!(target: "windowlimit_etcd", key = %key, "concurrent modification");
            return Err(StoreError::WriteConflict);
        }

        Ok(Some(WindowRecord {
            identity_key: identity_key.to_string(),
            counter: next.counter,
            window_expires_at: next.window_expires_at,
            version: revision_to_version(resp.header().map(|h| h.revision())),
        }))
    }

    async fn fetch_by_key(&self, identity_key: &str) -> Result<Option<WindowRecord>, StoreError> {
        let mut client = self.client.clone();
        let resp = client
            .get(self.key_for(identity_key), None)
            .await
            .map_err(StoreError::unavailable)?;

        let Some(kv) = resp.kvs().first() else {
            return Ok(None);
        };
        let stored = decode(kv.value())?;
        Ok(Some(WindowRecord {
            identity_key: identity_key.to_string(),
            counter: stored.counter,
            window_expires_at: stored.window_expires_at,
            version: revision_to_version(Some(kv.mod_revision())),
        }))
    }
}

fn normalize_prefix(prefix: String) -> Result<String, String> {
    // Normalize: trim whitespace and strip trailing slashes
    let p = prefix.trim().trim_end_matches('/').to_string();

    if p.is_empty() {
        return Err("prefix cannot be empty".to_string());
    }
    if p.chars().any(|c| c.is_control()) {
        return Err("prefix cannot contain control characters".to_string());
    }
    Ok(p)
}

/// Whole seconds until `expiry`, rounded up, never below etcd's minimum of 1.
fn lease_ttl_secs(expiry: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let ms = (expiry - now).num_milliseconds().max(0);
    ((ms + 999) / 1000).max(1)
}

fn revision_to_version(revision: Option<i64>) -> u64 {
    revision.and_then(|r| u64::try_from(r).ok()).unwrap_or(0)
}

fn encode(window: &StoredWindow) -> Result<String, StoreError> {
    serde_json::to_string(window).map_err(StoreError::unavailable)
}

fn decode(bytes: &[u8]) -> Result<StoredWindow, StoreError> {
    serde_json::from_slice(bytes).map_err(StoreError::unavailable)
}
