use crate::clock::{add_duration, Clock, SystemClock};
use crate::error::StoreError;
use crate::store::{WindowRecord, WindowStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default delay between a record's expiry and its removal.
pub const DEFAULT_SWEEP_LAG: Duration = Duration::from_secs(60);

/// Shortest interval between two full sweeps, whatever the sweep lag.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct Windows {
    records: HashMap<String, WindowRecord>,
    last_sweep: Option<DateTime<Utc>>,
}

/// In-process window store.
///
/// Every operation runs under one mutex, which gives the same atomicity a document store's
/// conditional upsert does. Expired records are not removed at `window_expires_at` but only once
/// `window_expires_at + sweep_lag` has passed, mimicking a periodic TTL sweep. Writes run a full
/// sweep at most once per `sweep_lag`, so keys that are never touched again still get dropped.
#[derive(Clone, Debug)]
pub struct InMemoryWindowStore {
    windows: Arc<Mutex<Windows>>,
    clock: Arc<dyn Clock>,
    sweep_lag: Duration,
}

impl Default for InMemoryWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self {
            windows: Arc::new(Mutex::new(Windows::default())),
            clock: Arc::new(SystemClock),
            sweep_lag: DEFAULT_SWEEP_LAG,
        }
    }

    /// Use `clock` to decide when records have been swept.
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// How long an expired record lingers before the sweep removes it.
    pub fn with_sweep_lag(mut self, lag: Duration) -> Self {
        self.sweep_lag = lag;
        self
    }

    /// Remove every record whose sweep deadline has passed. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.lock();
        self.sweep_all(&mut windows, now)
    }

    /// Records currently held, including expired ones the sweep has not reached yet.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Windows> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_swept(&self, record: &WindowRecord, now: DateTime<Utc>) -> bool {
        now >= add_duration(record.window_expires_at, self.sweep_lag)
    }

    fn sweep_all(&self, windows: &mut Windows, now: DateTime<Utc>) -> usize {
        let before = windows.records.len();
        windows.records.retain(|_, record| !self.is_swept(record, now));
        windows.last_sweep = Some(now);
        let removed = before - windows.records.len();
        if removed > 0 {
            tracing::trace!(target: "windowlimit::store", removed, "expired windows swept");
        }
        removed
    }

    /// Run a full sweep if the last one is at least one sweep interval old.
    fn sweep_if_due(&self, windows: &mut Windows, now: DateTime<Utc>) {
        let interval = self.sweep_lag.max(MIN_SWEEP_INTERVAL);
        let due = match windows.last_sweep {
            Some(last) => now >= add_duration(last, interval),
            None => true,
        };
        if due {
            self.sweep_all(windows, now);
        }
    }

    /// Drop `key` if its sweep deadline has passed, so lookups never see it.
    fn expire(&self, windows: &mut Windows, key: &str, now: DateTime<Utc>) {
        if windows.records.get(key).is_some_and(|record| self.is_swept(record, now)) {
            tracing::trace!(target: "windowlimit::store", identity_key = key, "window swept");
            windows.records.remove(key);
        }
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn conditional_increment_or_create(
        &self,
        key: &str,
        threshold: u32,
        new_expiry: DateTime<Utc>,
    ) -> Result<Option<WindowRecord>, StoreError> {
        let now = self.clock.now();
        let mut windows = self.lock();
        self.sweep_if_due(&mut windows, now);
        self.expire(&mut windows, key, now);

        match windows.records.get_mut(key) {
            Some(record) if record.counter < threshold => {
                record.counter += 1;
                record.version += 1;
                Ok(Some(record.clone()))
            }
            // The match failed, so the upsert falls through to an insert that collides.
            Some(_) => Err(StoreError::UniquenessConflict),
            None => {
                let record = WindowRecord::first(key, new_expiry);
                windows.records.insert(key.to_string(), record.clone());
                Ok(Some(record))
            }
        }
    }

    async fn fetch_by_key(&self, key: &str) -> Result<Option<WindowRecord>, StoreError> {
        let now = self.clock.now();
        let mut windows = self.lock();
        self.expire(&mut windows, key, now);
        Ok(windows.records.get(key).cloned())
    }
}
