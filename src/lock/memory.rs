//! In-process lock manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::manager::{
    new_identity, AcquireOutcome, ExtendOutcome, LockManager, LockRetryPolicy, ReleaseOutcome,
};
use crate::error::Result;

#[derive(Debug, Clone)]
struct LockRecord {
    identity: String,
    expires_at: Instant,
}

/// A lock manager whose exclusion only spans the current process.
///
/// Leases follow the tokio clock, like [`crate::ratelimit::MemoryCounterStore`].
#[derive(Debug, Default)]
pub struct MemoryLockManager {
    policy: LockRetryPolicy,
    locks: Mutex<HashMap<String, LockRecord>>,
}

impl MemoryLockManager {
    pub fn new(policy: LockRetryPolicy) -> Self {
        Self {
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Identity currently holding `key`, if its lease is live.
    pub fn holder(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.locks
            .lock()
            .get(key)
            .filter(|record| now < record.expires_at)
            .map(|record| record.identity.clone())
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.holder(key).is_some()
    }

    /// Drop records whose lease has lapsed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, record| now < record.expires_at);
        before - locks.len()
    }

    /// Number of stored records, lapsed leases included.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    /// Sweep lapsed leases every `every` until the manager is dropped.
    pub fn spawn_cleanup_loop(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    debug!("Lock manager dropped, stopping cleanup");
                    return;
                };
                let purged = manager.purge_expired();
                if purged > 0 {
                    debug!(purged = purged, "Purged lapsed leases");
                }
            }
        })
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    fn retry_policy(&self) -> LockRetryPolicy {
        self.policy
    }

    async fn try_to_acquire_lock(&self, key: &str) -> Result<AcquireOutcome> {
        let now = Instant::now();
        let identity = new_identity();
        let mut locks = self.locks.lock();

        if let Some(existing) = locks.get(key) {
            if now < existing.expires_at {
                return Ok(AcquireOutcome {
                    success: false,
                    identity,
                });
            }
            debug!(key = %key, "Reclaiming lock with lapsed lease");
        }

        locks.insert(
            key.to_string(),
            LockRecord {
                identity: identity.clone(),
                expires_at: now + self.policy.lease,
            },
        );
        Ok(AcquireOutcome {
            success: true,
            identity,
        })
    }

    async fn release_lock(&self, key: &str, identity: &str) -> Result<ReleaseOutcome> {
        let now = Instant::now();
        let mut locks = self.locks.lock();

        let owned = locks
            .get(key)
            .is_some_and(|record| record.identity == identity && now < record.expires_at);
        if owned {
            locks.remove(key);
        }
        Ok(ReleaseOutcome { success: owned })
    }

    async fn extend_lock(&self, key: &str, identity: &str) -> Result<ExtendOutcome> {
        let now = Instant::now();
        let mut locks = self.locks.lock();

        match locks.get_mut(key) {
            Some(record) if record.identity == identity && now < record.expires_at => {
                record.expires_at = now + self.policy.lease;
                Ok(ExtendOutcome { success: true })
            }
            _ => Ok(ExtendOutcome { success: false }),
        }
    }
}
