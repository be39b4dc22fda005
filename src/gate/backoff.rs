//! Polling policy for over-quota admissions.

use std::time::Duration;

use rand::Rng;
use tracing::trace;

use crate::error::{Result, TurnstileError};

/// Default interval between exceeded-quota checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How an over-quota admission waits before re-checking.
///
/// The default is a fixed interval with no cap and no jitter. `max_polls` and
/// `jitter` are opt-in deviations from that behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Fail with [`TurnstileError::PollingExhausted`] after this many sleeps
    pub max_polls: Option<u32>,
    /// Upper bound of random extra delay added to each sleep
    pub jitter: Option<Duration>,
}

impl PollPolicy {
    /// Fixed-interval, unbounded polling.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_polls: None,
            jitter: None,
        }
    }

    pub fn next_delay(&self) -> Duration {
        match self.jitter {
            Some(jitter) if !jitter.is_zero() => {
                let extra_ms = rand::thread_rng().gen_range(0..=jitter.as_millis() as u64);
                self.interval + Duration::from_millis(extra_ms)
            }
            _ => self.interval,
        }
    }

    /// Sleep before the next check, yielding to other tasks.
    ///
    /// `polls` is the number of sleeps already taken for this admission.
    pub async fn wait(&self, key: &str, polls: u32) -> Result<()> {
        if let Some(max) = self.max_polls {
            if polls >= max {
                return Err(TurnstileError::PollingExhausted {
                    key: key.to_string(),
                    polls,
                });
            }
        }

        let delay = self.next_delay();
        trace!(key = %key, polls = polls, delay = ?delay, "Rate limit exceeded, waiting");
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_POLL_INTERVAL)
    }
}
