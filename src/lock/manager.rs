//! Distributed lock manager contract.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{Result, TurnstileError};

/// Result of a single non-blocking acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquireOutcome {
    pub success: bool,
    /// Token minted for this attempt; only meaningful when `success` is set
    pub identity: String,
}

/// Result of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReleaseOutcome {
    /// False when the identity did not own the lock; the lock is untouched
    pub success: bool,
}

/// Result of a lease renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtendOutcome {
    /// False when the identity no longer owns the lock; nothing was renewed
    pub success: bool,
}

/// How long locks live and how `acquire_lock` retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetryPolicy {
    /// Lease after which an unreleased lock is reclaimed
    pub lease: Duration,
    pub retry_delay: Duration,
    /// Upper bound of random extra delay added to each retry
    pub retry_jitter: Duration,
    /// `None` retries until the lock is granted
    pub max_attempts: Option<u32>,
}

impl LockRetryPolicy {
    pub fn next_delay(&self) -> Duration {
        if self.retry_jitter.is_zero() {
            return self.retry_delay;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=self.retry_jitter.as_millis() as u64);
        self.retry_delay + Duration::from_millis(jitter_ms)
    }
}

impl Default for LockRetryPolicy {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(120),
            retry_delay: Duration::from_millis(200),
            retry_jitter: Duration::from_millis(100),
            max_attempts: None,
        }
    }
}

/// Named mutual exclusion with ownership tokens.
///
/// Implementations backed by a shared service must keep exclusion across
/// processes, not only across tasks.
#[async_trait]
pub trait LockManager: Send + Sync {
    fn retry_policy(&self) -> LockRetryPolicy;

    /// Make one attempt to take `key` without waiting.
    async fn try_to_acquire_lock(&self, key: &str) -> Result<AcquireOutcome>;

    /// Release `key` if `identity` still owns it.
    async fn release_lock(&self, key: &str, identity: &str) -> Result<ReleaseOutcome>;

    /// Restart the lease on `key` from now if `identity` still owns it.
    async fn extend_lock(&self, key: &str, identity: &str) -> Result<ExtendOutcome>;

    /// Take `key`, retrying per [`LockRetryPolicy`] until granted.
    ///
    /// Returns the identity that must be presented to release the lock.
    async fn acquire_lock(&self, key: &str) -> Result<String> {
        let policy = self.retry_policy();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let outcome = self.try_to_acquire_lock(key).await?;
            if outcome.success {
                debug!(key = %key, attempts = attempts, "Lock acquired");
                return Ok(outcome.identity);
            }

            if let Some(max) = policy.max_attempts {
                if attempts >= max {
                    return Err(TurnstileError::LockAcquisition {
                        key: key.to_string(),
                        attempts,
                    });
                }
            }

            let delay = policy.next_delay();
            trace!(key = %key, attempts = attempts, delay = ?delay, "Lock busy, retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

/// Mint a fresh identity for one acquisition attempt.
pub fn new_identity() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_delay_without_jitter_is_fixed() {
        let policy = LockRetryPolicy {
            retry_jitter: Duration::ZERO,
            ..Default::default()
        };
        for _ in 0..10 {
            assert_eq!(policy.next_delay(), Duration::from_millis(200));
        }
    }

    #[test]
    fn test_next_delay_jitter_bounds() {
        let policy = LockRetryPolicy {
            retry_delay: Duration::from_millis(50),
            retry_jitter: Duration::from_millis(25),
            ..Default::default()
        };
        for _ in 0..100 {
            let delay = policy.next_delay();
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(75));
        }
    }

    #[test]
    fn test_identities_are_unique() {
        assert_ne!(new_identity(), new_identity());
    }
}
