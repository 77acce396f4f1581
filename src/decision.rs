//! The allow/deny outcome handed to the transport layer.

use crate::clock::add_duration;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Result of a rate-limit check.
///
/// `retry_after` is absent exactly when the request is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawDecision"))]
pub struct Decision {
    allowed: bool,
    retry_after: Option<DateTime<Utc>>,
}

/// Unchecked wire form of [`Decision`].
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawDecision {
    allowed: bool,
    retry_after: Option<DateTime<Utc>>,
}

#[cfg(feature = "serde")]
impl TryFrom<RawDecision> for Decision {
    type Error = &'static str;

    fn try_from(raw: RawDecision) -> Result<Self, Self::Error> {
        match (raw.allowed, raw.retry_after) {
            (true, None) => Ok(Self::allow()),
            (false, Some(at)) => Ok(Self::deny(at)),
            (true, Some(_)) => Err("an allowed decision cannot carry retry_after"),
            (false, None) => Err("a denied decision must carry retry_after"),
        }
    }
}

impl Decision {
    /// The request may proceed.
    pub fn allow() -> Self {
        Self { allowed: true, retry_after: None }
    }

    /// The request is over budget until `retry_after`.
    pub fn deny(retry_after: DateTime<Utc>) -> Self {
        Self { allowed: false, retry_after: Some(retry_after) }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Absolute instant after which the caller may try again. `None` when allowed.
    pub fn retry_after(&self) -> Option<DateTime<Utc>> {
        self.retry_after
    }

    /// Whole seconds a client should wait, for a `Retry-After` style header.
    ///
    /// Computes `max(0, retry_after + extra_grace - now)`, rounding partial seconds up so a
    /// client never comes back early. Returns `None` for allowed requests.
    pub fn retry_after_secs(&self, now: DateTime<Utc>, extra_grace: Duration) -> Option<u64> {
        let at = add_duration(self.retry_after?, extra_grace);
        let remaining = (at - now).num_milliseconds().max(0) as u64;
        Some((remaining + 999) / 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_never_carries_retry_after() {
        let d = Decision::allow();
        assert!(d.is_allowed());
        assert!(d.retry_after().is_none());
        assert_eq!(d.retry_after_secs(Utc::now(), Duration::from_secs(60)), None);
    }

    #[test]
    fn deny_always_carries_retry_after() {
        let at = Utc::now();
        let d = Decision::deny(at);
        assert!(!d.is_allowed());
        assert_eq!(d.retry_after(), Some(at));
    }

    #[test]
    fn retry_after_secs_adds_grace_and_rounds_up() {
        let now = Utc::now();
        let d = Decision::deny(now + chrono::Duration::milliseconds(1500));
        assert_eq!(d.retry_after_secs(now, Duration::ZERO), Some(2));
        assert_eq!(d.retry_after_secs(now, Duration::from_secs(60)), Some(62));
    }

    #[test]
    fn retry_after_secs_never_goes_negative() {
        let now = Utc::now();
        let d = Decision::deny(now - chrono::Duration::seconds(30));
        assert_eq!(d.retry_after_secs(now, Duration::from_secs(10)), Some(0));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserialization_rejects_inconsistent_decisions() {
        let at = Utc::now();
        let deny = Decision::deny(at);
        let json = serde_json::to_string(&deny).unwrap();
        assert_eq!(serde_json::from_str::<Decision>(&json).unwrap(), deny);

        let allow: Decision =
            serde_json::from_str(r#"{"allowed":true,"retry_after":null}"#).unwrap();
        assert!(allow.is_allowed());

        let at_json = serde_json::to_string(&at).unwrap();
        let bad = format!(r#"{{"allowed":true,"retry_after":{at_json}}}"#);
        assert!(serde_json::from_str::<Decision>(&bad).is_err());
        let missing = r#"{"allowed":false,"retry_after":null}"#;
        assert!(serde_json::from_str::<Decision>(missing).is_err());
    }
}
