//! In-process counter store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::counter::{CounterStore, RateLimitPolicy};
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
struct CounterRecord {
    count: u64,
    expires_at: Instant,
}

impl CounterRecord {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// A counter store backed by a concurrent map.
///
/// Windows follow the tokio clock, so tests can drive expiry with a paused
/// runtime. Counts are only shared within one process.
#[derive(Debug)]
pub struct MemoryCounterStore {
    policy: RateLimitPolicy,
    counters: DashMap<String, CounterRecord>,
}

impl MemoryCounterStore {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            counters: DashMap::new(),
        }
    }

    /// When the live window for `key` ends, if there is one.
    pub fn window_expiry(&self, key: &str) -> Option<Instant> {
        let now = Instant::now();
        self.counters
            .get(key)
            .filter(|record| record.is_live(now))
            .map(|record| record.expires_at)
    }

    /// Drop records whose window has lapsed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, record| record.is_live(now));
        before - self.counters.len()
    }

    /// Number of stored records, expired ones included.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Sweep lapsed windows every `every` until the store is dropped.
    ///
    /// Without a sweep, records for clients that never return stay in the
    /// map for the life of the process.
    pub fn spawn_cleanup_loop(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    debug!("Counter store dropped, stopping cleanup");
                    return;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged = purged, remaining = store.len(), "Purged lapsed counters");
                }
            }
        })
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    async fn increment(&self, key: &str) -> Result<()> {
        let now = Instant::now();
        let mut record = self
            .counters
            .entry(key.to_string())
            .or_insert(CounterRecord {
                count: 0,
                expires_at: now,
            });

        if !record.is_live(now) {
            record.count = 0;
        }
        record.count += 1;

        if record.count == 1 {
            record.expires_at = now + self.policy.window;
            debug!(key = %key, window = ?self.policy.window, "Opened new counter window");
        }

        trace!(key = %key, count = record.count, "Incremented counter");
        Ok(())
    }

    async fn current_count(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|record| record.is_live(now))
            .map(|record| record.count)
            .unwrap_or(0))
    }
}
