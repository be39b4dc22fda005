//! Distributed locks guarding per-client admission decisions.

mod guard;
mod manager;
mod memory;
mod redis_lock;

pub use guard::LockGuard;
pub use manager::{new_identity, AcquireOutcome, ExtendOutcome, LockManager, LockRetryPolicy, ReleaseOutcome};
pub use memory::MemoryLockManager;
pub use redis_lock::RedisLockManager;
