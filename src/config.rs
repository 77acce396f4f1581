//! Limiter configuration.
//!
//! Everything the engine needs is carried in one validated [`LimiterConfig`] handed over at
//! construction. Loading it (files, env, flags) is the embedding service's job; with the `serde`
//! feature the struct can be deserialized directly.

use crate::backoff::Backoff;
use crate::clock::{add_duration, sub_duration};
use crate::error::ConfigError;
use crate::jitter::Jitter;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default admitted requests per window.
pub const DEFAULT_THRESHOLD: u32 = 10;
/// Default window length.
pub const DEFAULT_WINDOW_MINUTES: u32 = 1;
/// Default assumed TTL-sweep lag. Document stores commonly sweep expired records once a minute.
pub const DEFAULT_TTL_SWEEP_GRACE: Duration = Duration::from_secs(60);
/// Default total store attempts per decision (initial + retries).
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
/// Default delay before the first retry.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Validated configuration for a [`DecisionEngine`](crate::DecisionEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LimiterConfig {
    /// Requests admitted per identity per window.
    pub threshold: u32,
    /// Fixed window length, counted from the first request of the window.
    pub window_minutes: u32,
    /// Assumed maximum lag between a record's expiry and the store actually deleting it.
    #[cfg_attr(feature = "serde", serde(rename = "ttl_sweep_grace_ms", with = "millis"))]
    pub ttl_sweep_grace: Duration,
    /// Total store attempts per decision when write conflicts keep occurring.
    pub max_attempts: usize,
    /// Delay before the first retry; doubles on each subsequent retry.
    #[cfg_attr(feature = "serde", serde(rename = "initial_backoff_ms", with = "millis"))]
    pub initial_backoff: Duration,
    /// Optional cap on the retry delay.
    #[cfg_attr(feature = "serde", serde(rename = "max_backoff_ms", with = "millis::option"))]
    pub max_backoff: Option<Duration>,
    /// Randomization applied to each retry delay.
    pub jitter: Jitter,
}

#[cfg(feature = "serde")]
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => super::serialize(d, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
        }
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            window_minutes: DEFAULT_WINDOW_MINUTES,
            ttl_sweep_grace: DEFAULT_TTL_SWEEP_GRACE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: None,
            jitter: Jitter::None,
        }
    }
}

impl LimiterConfig {
    /// Start from the defaults.
    pub fn builder() -> LimiterConfigBuilder {
        LimiterConfigBuilder::default()
    }

    /// Check every field. Deserialized configs bypass the builder, so the engine calls this too.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        if self.window_minutes == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(0));
        }
        self.backoff()?;
        Ok(())
    }

    /// Window length as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(u64::from(self.window_minutes) * 60)
    }

    /// Backoff schedule described by this config.
    pub fn backoff(&self) -> Result<Backoff, ConfigError> {
        let backoff = Backoff::exponential(self.initial_backoff);
        match self.max_backoff {
            Some(max) => Ok(backoff.with_max(max)?),
            None => Ok(backoff),
        }
    }

    /// Expiry stamped on a record created at `now`: `now + window - grace`.
    ///
    /// The grace subtraction makes the store's lagging sweep delete the record at roughly
    /// `now + window`. Never earlier than `now`.
    pub fn proposed_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let end = add_duration(now, self.window());
        sub_duration(end, self.ttl_sweep_grace).max(now)
    }

    /// Retry hint for a deny backed by an existing record: expiry plus the sweep grace.
    pub fn retry_after_for(&self, window_expires_at: DateTime<Utc>) -> DateTime<Utc> {
        add_duration(window_expires_at, self.ttl_sweep_grace)
    }

    /// Conservative retry hint when the real window expiry could not be determined.
    pub fn fail_closed_retry_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        add_duration(now, self.window())
    }
}

/// Builder for [`LimiterConfig`].
#[derive(Debug, Clone, Default)]
pub struct LimiterConfigBuilder {
    config: LimiterConfig,
}

impl LimiterConfigBuilder {
    /// Requests admitted per window. Must be > 0.
    pub fn threshold(mut self, threshold: u32) -> Self {
        self.config.threshold = threshold;
        self
    }

    /// Window length in whole minutes. Must be > 0.
    pub fn window_minutes(mut self, minutes: u32) -> Self {
        self.config.window_minutes = minutes;
        self
    }

    pub fn ttl_sweep_grace(mut self, grace: Duration) -> Self {
        self.config.ttl_sweep_grace = grace;
        self
    }

    /// Set total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn initial_backoff(mut self, delay: Duration) -> Self {
        self.config.initial_backoff = delay;
        self
    }

    pub fn max_backoff(mut self, max: Duration) -> Self {
        self.config.max_backoff = Some(max);
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Build the config, validating inputs.
    pub fn build(self) -> Result<LimiterConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
