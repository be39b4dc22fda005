//! Lock manager backed by Redis.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use super::manager::{
    new_identity, AcquireOutcome, ExtendOutcome, LockManager, LockRetryPolicy, ReleaseOutcome,
};
use crate::error::Result;

/// Deletes the lock only while it still carries the caller's identity.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Restarts the lease only while the lock still carries the caller's identity.
const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
end
return 0
"#;

/// A lock manager that excludes across every process sharing one Redis.
///
/// Locks are `SET NX PX` keys whose value is the owner's identity, so a
/// crashed holder loses the lock once its lease lapses.
pub struct RedisLockManager {
    connection_manager: ConnectionManager,
    prefix: String,
    policy: LockRetryPolicy,
    release_script: redis::Script,
    extend_script: redis::Script,
}

impl RedisLockManager {
    pub fn new(connection_manager: ConnectionManager, prefix: &str, policy: LockRetryPolicy) -> Self {
        Self {
            connection_manager,
            prefix: prefix.to_string(),
            policy,
            release_script: redis::Script::new(RELEASE_SCRIPT),
            extend_script: redis::Script::new(EXTEND_SCRIPT),
        }
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:lock:{}", self.prefix, key)
    }

    fn lease_ms(&self) -> u64 {
        (self.policy.lease.as_millis() as u64).max(1)
    }
}

impl std::fmt::Debug for RedisLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockManager")
            .field("prefix", &self.prefix)
            .field("policy", &self.policy)
            .finish()
    }
}

#[async_trait]
impl LockManager for RedisLockManager {
    fn retry_policy(&self) -> LockRetryPolicy {
        self.policy
    }

    async fn try_to_acquire_lock(&self, key: &str) -> Result<AcquireOutcome> {
        let lock_key = self.lock_key(key);
        let identity = new_identity();
        let mut connection_manager = self.connection_manager.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(&lock_key)
            .arg(&identity)
            .arg("NX")
            .arg("PX")
            .arg(self.lease_ms())
            .query_async(&mut connection_manager)
            .await?;

        Ok(AcquireOutcome {
            success: reply.is_some(),
            identity,
        })
    }

    async fn release_lock(&self, key: &str, identity: &str) -> Result<ReleaseOutcome> {
        let lock_key = self.lock_key(key);
        let mut connection_manager = self.connection_manager.clone();

        let deleted: i64 = self
            .release_script
            .key(&lock_key)
            .arg(identity)
            .invoke_async(&mut connection_manager)
            .await?;

        if deleted == 1 {
            debug!(key = %lock_key, "Lock released");
        } else {
            warn!(key = %lock_key, "Release refused, identity does not own the lock");
        }
        Ok(ReleaseOutcome {
            success: deleted == 1,
        })
    }

    async fn extend_lock(&self, key: &str, identity: &str) -> Result<ExtendOutcome> {
        let lock_key = self.lock_key(key);
        let mut connection_manager = self.connection_manager.clone();

        let renewed: i64 = self
            .extend_script
            .key(&lock_key)
            .arg(identity)
            .arg(self.lease_ms())
            .invoke_async(&mut connection_manager)
            .await?;

        if renewed != 1 {
            warn!(key = %lock_key, "Lease renewal refused, identity does not own the lock");
        }
        Ok(ExtendOutcome {
            success: renewed == 1,
        })
    }
}
