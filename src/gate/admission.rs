//! Admission gate implementation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::backoff::PollPolicy;
use super::downstream::{Downstream, NoopDownstream};
use crate::error::Result;
use crate::key::ClientKey;
use crate::lock::{LockGuard, LockManager};
use crate::ratelimit::CounterStore;

/// Outcome of one successful admission.
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub client_key: String,
    pub admitted: bool,
    /// Sleeps taken while the client was over quota
    pub polls: u32,
    /// Time spent between taking the lock and passing the quota check
    pub waited_ms: u64,
    pub admitted_at: DateTime<Utc>,
}

/// Serializes admissions per client key and holds each client to its quota.
///
/// For a given key, the lock is held across the whole check, wait, increment
/// and downstream call, so admissions for one client are handled one at a
/// time across every gate sharing the same lock manager. Different keys never
/// wait on each other.
pub struct AdmissionGate<C, L>
where
    C: CounterStore + ?Sized,
    L: LockManager + ?Sized + 'static,
{
    counters: Arc<C>,
    locks: Arc<L>,
    downstream: Arc<dyn Downstream>,
    poll: PollPolicy,
}

impl<C, L> AdmissionGate<C, L>
where
    C: CounterStore + ?Sized,
    L: LockManager + ?Sized + 'static,
{
    /// Create a gate over the given collaborators with a no-op downstream.
    pub fn new(counters: Arc<C>, locks: Arc<L>, poll: PollPolicy) -> Self {
        Self {
            counters,
            locks,
            downstream: Arc::new(NoopDownstream),
            poll,
        }
    }

    /// Replace the downstream called after each admission.
    pub fn with_downstream(mut self, downstream: Arc<dyn Downstream>) -> Self {
        self.downstream = downstream;
        self
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    pub fn counters(&self) -> &Arc<C> {
        &self.counters
    }

    /// Admit a request for `client_key`, waiting while it is over quota.
    ///
    /// Returns `true` once admitted; collaborator errors propagate.
    pub async fn admit(&self, client_key: &ClientKey) -> Result<bool> {
        self.admit_with_report(client_key)
            .await
            .map(|admission| admission.admitted)
    }

    /// Admit a request and report how long it waited.
    #[instrument(skip(self), fields(key = %client_key))]
    pub async fn admit_with_report(&self, client_key: &ClientKey) -> Result<Admission> {
        let guard = LockGuard::acquire(self.locks.clone(), client_key.lock_key()).await?;
        debug!(lock = %guard.key(), "Admission lock held");

        let decided = self.decide(client_key, &guard).await;
        let released = guard.release().await;

        match (decided, released) {
            (Ok(admission), Ok(())) => {
                info!(
                    polls = admission.polls,
                    waited_ms = admission.waited_ms,
                    "Request admitted"
                );
                Ok(admission)
            }
            (Ok(_), Err(e)) => {
                warn!(error = %e, "Admitted but lock release failed");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!(error = %release_err, "Lock release failed after admission error");
                Err(e)
            }
        }
    }

    /// Check the quota, wait it out if needed, then count and forward.
    /// Runs with the client's lock held; the lease is renewed after every
    /// sleep so a long wait cannot outlive it.
    async fn decide(&self, client_key: &ClientKey, guard: &LockGuard<L>) -> Result<Admission> {
        let key = client_key.as_str();
        let started = Instant::now();
        let mut polls: u32 = 0;

        while self.counters.is_rate_limit_exceeded(key).await? {
            self.poll.wait(key, polls).await?;
            polls += 1;
            guard.extend().await?;
        }
        let waited = started.elapsed();

        self.counters.increment(key).await?;
        self.downstream.call(client_key).await?;

        Ok(Admission {
            client_key: key.to_string(),
            admitted: true,
            polls,
            waited_ms: waited.as_millis() as u64,
            admitted_at: Utc::now(),
        })
    }
}
