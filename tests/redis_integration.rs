//! Runs against a live Redis when `REDIS_URL` is set; otherwise each test
//! returns early.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use redis::AsyncCommands;
use turnstile::config::{BackendKind, TurnstileConfig};
use turnstile::lock::{LockManager, LockRetryPolicy, RedisLockManager};
use turnstile::ratelimit::{CounterStore, RateLimitPolicy, RedisCounterStore};
use turnstile::{AdmissionGate, Backends, ClientKey, PollPolicy, TurnstileError};

fn redis_url() -> Option<String> {
    env::var("REDIS_URL").ok()
}

fn unique_prefix() -> String {
    let n: u64 = rand::random();
    format!("turnstile_test_{n}")
}

async fn connection(url: &str) -> redis::aio::ConnectionManager {
    let client = redis::Client::open(url).unwrap();
    client.get_connection_manager().await.unwrap()
}

fn lock_policy() -> LockRetryPolicy {
    LockRetryPolicy {
        lease: Duration::from_secs(10),
        retry_delay: Duration::from_millis(20),
        retry_jitter: Duration::from_millis(10),
        max_attempts: None,
    }
}

#[tokio::test]
async fn test_counter_threshold_and_window() {
    let Some(url) = redis_url() else { return };
    let prefix = unique_prefix();
    let store = RedisCounterStore::new(
        connection(&url).await,
        &prefix,
        RateLimitPolicy::new(2, Duration::from_millis(800)),
    );

    assert_eq!(store.current_count("u1").await.unwrap(), 0);
    store.increment("u1").await.unwrap();
    assert!(!store.is_rate_limit_exceeded("u1").await.unwrap());
    store.increment("u1").await.unwrap();
    assert!(store.is_rate_limit_exceeded("u1").await.unwrap());

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(!store.is_rate_limit_exceeded("u1").await.unwrap());
    store.increment("u1").await.unwrap();
    assert_eq!(store.current_count("u1").await.unwrap(), 1);
}

#[tokio::test]
async fn test_counter_ttl_set_only_on_first_increment() {
    let Some(url) = redis_url() else { return };
    let prefix = unique_prefix();
    let mut conn = connection(&url).await;
    let store = RedisCounterStore::new(
        conn.clone(),
        &prefix,
        RateLimitPolicy::new(10, Duration::from_secs(5)),
    );
    let raw_key = format!("{prefix}:counter:u1");

    store.increment("u1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    store.increment("u1").await.unwrap();

    let ttl_ms: i64 = conn.pttl(&raw_key).await.unwrap();
    assert!(ttl_ms > 0);
    assert!(ttl_ms <= 3_900, "expiry moved: {ttl_ms}ms left");
}

#[tokio::test]
async fn test_counter_rejects_non_numeric_value() {
    let Some(url) = redis_url() else { return };
    let prefix = unique_prefix();
    let mut conn = connection(&url).await;
    let store = RedisCounterStore::new(
        conn.clone(),
        &prefix,
        RateLimitPolicy::new(1, Duration::from_secs(5)),
    );

    let _: () = conn
        .set(format!("{prefix}:counter:bad"), "garbage")
        .await
        .unwrap();

    let err = store.is_rate_limit_exceeded("bad").await.unwrap_err();
    assert!(matches!(err, TurnstileError::MalformedCounterValue { .. }));
}

#[tokio::test]
async fn test_lock_exclusion_and_fencing() {
    let Some(url) = redis_url() else { return };
    let prefix = unique_prefix();
    // Two managers with separate connections stand in for two processes
    let first = RedisLockManager::new(connection(&url).await, &prefix, lock_policy());
    let second = RedisLockManager::new(connection(&url).await, &prefix, lock_policy());

    let owner = first.acquire_lock("k").await.unwrap();
    assert!(!second.try_to_acquire_lock("k").await.unwrap().success);

    let refused = second.release_lock("k", "intruder").await.unwrap();
    assert!(!refused.success);
    assert!(!second.try_to_acquire_lock("k").await.unwrap().success);

    assert!(first.release_lock("k", &owner).await.unwrap().success);
    assert!(second.try_to_acquire_lock("k").await.unwrap().success);
}

#[tokio::test]
async fn test_lock_extend_restarts_lease_for_owner_only() {
    let Some(url) = redis_url() else { return };
    let prefix = unique_prefix();
    let mut conn = connection(&url).await;
    let manager = RedisLockManager::new(conn.clone(), &prefix, lock_policy());
    let raw_key = format!("{prefix}:lock:k");

    let owner = manager.acquire_lock("k").await.unwrap();
    let _: bool = conn.pexpire(&raw_key, 500).await.unwrap();

    assert!(!manager.extend_lock("k", "intruder").await.unwrap().success);
    let ttl_ms: i64 = conn.pttl(&raw_key).await.unwrap();
    assert!(ttl_ms <= 500, "foreign renewal changed the lease: {ttl_ms}");

    assert!(manager.extend_lock("k", &owner).await.unwrap().success);
    let ttl_ms: i64 = conn.pttl(&raw_key).await.unwrap();
    assert!(ttl_ms > 5_000 && ttl_ms <= 10_000, "unexpected ttl {ttl_ms}");

    manager.release_lock("k", &owner).await.unwrap();
    assert!(!manager.extend_lock("k", &owner).await.unwrap().success);
}

#[tokio::test]
async fn test_gates_on_separate_connections_serialize() {
    let Some(url) = redis_url() else { return };
    let prefix = unique_prefix();
    let policy = RateLimitPolicy::new(100, Duration::from_secs(30));

    let gates: Vec<_> = futures::future::join_all((0..2).map(|_| {
        let url = url.clone();
        let prefix = prefix.clone();
        async move {
            let conn = connection(&url).await;
            Arc::new(AdmissionGate::new(
                Arc::new(RedisCounterStore::new(conn.clone(), &prefix, policy)),
                Arc::new(RedisLockManager::new(conn, &prefix, lock_policy())),
                PollPolicy::default(),
            ))
        }
    }))
    .await;

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let gate = gates[i % 2].clone();
            tokio::spawn(async move { gate.admit(&ClientKey::new("shared").unwrap()).await })
        })
        .collect();
    for task in futures::future::join_all(tasks).await {
        assert!(task.unwrap().unwrap());
    }

    let store = RedisCounterStore::new(connection(&url).await, &prefix, policy);
    assert_eq!(store.current_count("shared").await.unwrap(), 20);
}

#[tokio::test]
async fn test_backends_from_config() {
    let Some(url) = redis_url() else { return };
    let mut config = TurnstileConfig::default();
    config.backend.kind = BackendKind::Redis;
    config.backend.redis_url = url;
    config.backend.key_prefix = unique_prefix();

    let backends = Backends::from_config(&config).await.unwrap();
    let gate = backends.gate(&config);
    assert!(gate.admit(&ClientKey::new("cfg").unwrap()).await.unwrap());
    assert_eq!(backends.counters.current_count("cfg").await.unwrap(), 1);
}
