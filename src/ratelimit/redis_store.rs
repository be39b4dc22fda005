//! Counter store backed by Redis.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, trace};

use super::counter::{parse_count, CounterStore, RateLimitPolicy};
use crate::error::Result;

/// Increments and, on the first hit of a window, arms the expiry in the same
/// round trip so no counter is ever left without a TTL.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call("INCR", KEYS[1])
if count == 1 then
    redis.call("PEXPIRE", KEYS[1], ARGV[1])
end
return count
"#;

/// A counter store shared by every gate instance pointed at the same Redis.
pub struct RedisCounterStore {
    connection_manager: ConnectionManager,
    prefix: String,
    policy: RateLimitPolicy,
    increment_script: redis::Script,
}

impl RedisCounterStore {
    pub fn new(connection_manager: ConnectionManager, prefix: &str, policy: RateLimitPolicy) -> Self {
        Self {
            connection_manager,
            prefix: prefix.to_string(),
            policy,
            increment_script: redis::Script::new(INCREMENT_SCRIPT),
        }
    }

    fn counter_key(&self, key: &str) -> String {
        format!("{}:counter:{}", self.prefix, key)
    }

    fn window_ms(&self) -> u64 {
        (self.policy.window.as_millis() as u64).max(1)
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("prefix", &self.prefix)
            .field("policy", &self.policy)
            .finish()
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    async fn increment(&self, key: &str) -> Result<()> {
        let counter_key = self.counter_key(key);
        let mut connection_manager = self.connection_manager.clone();

        let count: u64 = self
            .increment_script
            .key(&counter_key)
            .arg(self.window_ms())
            .invoke_async(&mut connection_manager)
            .await?;

        if count == 1 {
            debug!(key = %counter_key, window_ms = self.window_ms(), "Opened new counter window");
        }
        trace!(key = %counter_key, count = count, "Incremented counter");
        Ok(())
    }

    async fn current_count(&self, key: &str) -> Result<u64> {
        let counter_key = self.counter_key(key);
        let mut connection_manager = self.connection_manager.clone();

        let raw: Option<String> = connection_manager.get(&counter_key).await?;
        match raw {
            Some(raw) => parse_count(&counter_key, &raw),
            None => Ok(0),
        }
    }
}
