#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use windowlimit::{StoreError, WindowRecord, WindowStore};

type Script = Box<dyn Fn(usize) -> Result<Option<WindowRecord>, StoreError> + Send + Sync>;

/// Store stub whose answers are scripted per call (0-based call index).
pub struct ScriptedStore {
    increment: Script,
    fetch: Script,
    increments: AtomicUsize,
    fetches: AtomicUsize,
}

impl ScriptedStore {
    /// Every increment succeeds; every fetch finds nothing.
    pub fn new() -> Self {
        Self {
            increment: Box::new(|_| Ok(Some(record("scripted", 1, Utc::now())))),
            fetch: Box::new(|_| Ok(None)),
            increments: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn on_increment<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) -> Result<Option<WindowRecord>, StoreError> + Send + Sync + 'static,
    {
        self.increment = Box::new(f);
        self
    }

    pub fn on_fetch<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) -> Result<Option<WindowRecord>, StoreError> + Send + Sync + 'static,
    {
        self.fetch = Box::new(f);
        self
    }

    pub fn increments(&self) -> usize {
        self.increments.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WindowStore for ScriptedStore {
    async fn conditional_increment_or_create(
        &self,
        _key: &str,
        _threshold: u32,
        _new_expiry: DateTime<Utc>,
    ) -> Result<Option<WindowRecord>, StoreError> {
        let n = self.increments.fetch_add(1, Ordering::SeqCst);
        (self.increment)(n)
    }

    async fn fetch_by_key(&self, _key: &str) -> Result<Option<WindowRecord>, StoreError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst);
        (self.fetch)(n)
    }
}

pub fn record(key: &str, counter: u32, window_expires_at: DateTime<Utc>) -> WindowRecord {
    WindowRecord { identity_key: key.to_string(), counter, window_expires_at, version: 1 }
}

pub fn outage() -> StoreError {
    StoreError::unavailable(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"))
}

/// Route `tracing` output through the test harness; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}
