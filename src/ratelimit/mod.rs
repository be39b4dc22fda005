//! Rate limit counters and their backing stores.

mod counter;
mod memory;
mod redis_store;

pub use counter::{parse_count, CounterStore, RateLimitPolicy};
pub use memory::MemoryCounterStore;
pub use redis_store::RedisCounterStore;
