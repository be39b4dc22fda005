//! Rate limit counter store contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, TurnstileError};

/// Quota applied by a counter store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Count at which a key is considered over quota
    pub threshold: u64,
    /// Window length, started by the increment that creates the counter
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(threshold: u64, window: Duration) -> Self {
        Self { threshold, window }
    }

    /// Whether `count` admissions inside one window exhaust the quota.
    pub fn is_exceeded(&self, count: u64) -> bool {
        count >= self.threshold
    }
}

/// A shared per-key counter with a time-bounded window.
///
/// `increment` is atomic on its own. Checking and then incrementing is not,
/// so callers that need both under one decision hold a lock around them.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// The quota this store checks counts against.
    fn policy(&self) -> RateLimitPolicy;

    /// Add one to the counter for `key`, opening a new window when the
    /// counter was absent or expired.
    async fn increment(&self, key: &str) -> Result<()>;

    /// Current count for `key` inside its window; absent keys read as 0.
    async fn current_count(&self, key: &str) -> Result<u64>;

    /// Whether `key` has reached the threshold. Never mutates state.
    async fn is_rate_limit_exceeded(&self, key: &str) -> Result<bool> {
        let count = self.current_count(key).await?;
        Ok(self.policy().is_exceeded(count))
    }
}

/// Parse a stored counter value.
///
/// Counters are exchanged as plain base-10 digits, with no sign or
/// whitespace. Anything else is reported instead of being read as zero.
pub fn parse_count(key: &str, raw: &str) -> Result<u64> {
    let malformed = || TurnstileError::MalformedCounterValue {
        key: key.to_string(),
        value: raw.to_string(),
    };
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    raw.parse::<u64>().map_err(|_| malformed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_threshold_is_inclusive() {
        let policy = RateLimitPolicy::new(2, Duration::from_secs(10));
        assert!(!policy.is_exceeded(0));
        assert!(!policy.is_exceeded(1));
        assert!(policy.is_exceeded(2));
        assert!(policy.is_exceeded(3));
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("k", "0").unwrap(), 0);
        assert_eq!(parse_count("k", "17").unwrap(), 17);
    }

    #[test]
    fn test_parse_count_rejects_garbage() {
        for raw in [
            "", "abc", "-1", "1.5", "12x", " 7 ", "7 ", "\t7", "+7", "18446744073709551616",
        ] {
            let err = parse_count("k", raw).unwrap_err();
            match err {
                TurnstileError::MalformedCounterValue { key, value } => {
                    assert_eq!(key, "k");
                    assert_eq!(value, raw);
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }
}
