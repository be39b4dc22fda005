//! Wiring of counter stores and lock managers from configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{BackendKind, TurnstileConfig};
use crate::error::Result;
use crate::gate::AdmissionGate;
use crate::lock::{LockManager, MemoryLockManager, RedisLockManager};
use crate::ratelimit::{CounterStore, MemoryCounterStore, RedisCounterStore};

/// A gate over whichever backends the configuration selected.
pub type DynAdmissionGate = AdmissionGate<dyn CounterStore, dyn LockManager>;

/// The pair of collaborators a gate is built from.
#[derive(Clone)]
pub struct Backends {
    pub counters: Arc<dyn CounterStore>,
    pub locks: Arc<dyn LockManager>,
}

impl Backends {
    /// Build the backends named by `config.backend.kind`.
    ///
    /// The Redis backends share one connection manager.
    pub async fn from_config(config: &TurnstileConfig) -> Result<Self> {
        let rate_limit = config.rate_limit_policy();
        let lock_policy = config.lock_retry_policy();

        match config.backend.kind {
            BackendKind::Memory => {
                let cleanup_every = Duration::from_millis(config.backend.cleanup_interval_ms);
                info!(cleanup_every = ?cleanup_every, "Using in-memory counters and locks");

                // Each sweep stops on its own once its backend is dropped
                let counters = Arc::new(MemoryCounterStore::new(rate_limit));
                counters.spawn_cleanup_loop(cleanup_every);
                let locks = Arc::new(MemoryLockManager::new(lock_policy));
                locks.spawn_cleanup_loop(cleanup_every);

                Ok(Self { counters, locks })
            }
            BackendKind::Redis => {
                let client = redis::Client::open(config.backend.redis_url.as_str())?;
                let connection_manager = client.get_connection_manager().await?;
                info!(
                    redis_url = %config.backend.redis_url,
                    prefix = %config.backend.key_prefix,
                    "Connected to Redis"
                );

                let prefix = config.backend.key_prefix.as_str();
                Ok(Self {
                    counters: Arc::new(RedisCounterStore::new(
                        connection_manager.clone(),
                        prefix,
                        rate_limit,
                    )),
                    locks: Arc::new(RedisLockManager::new(connection_manager, prefix, lock_policy)),
                })
            }
        }
    }

    /// Build an admission gate over these backends.
    pub fn gate(&self, config: &TurnstileConfig) -> DynAdmissionGate {
        AdmissionGate::new(self.counters.clone(), self.locks.clone(), config.poll_policy())
    }
}
