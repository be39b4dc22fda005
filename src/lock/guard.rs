//! Scoped lock ownership.

use std::sync::Arc;

use tracing::{debug, warn};

use super::manager::LockManager;
use crate::error::{Result, TurnstileError};

/// Holds a lock until [`LockGuard::release`] is awaited or the guard drops.
///
/// Dropping an unreleased guard (an error path, a panic, or a cancelled
/// future) schedules the release on the current tokio runtime.
pub struct LockGuard<L: LockManager + ?Sized + 'static> {
    manager: Arc<L>,
    key: String,
    identity: String,
    released: bool,
}

impl<L: LockManager + ?Sized + 'static> LockGuard<L> {
    /// Block until `key` is granted by `manager`.
    pub async fn acquire(manager: Arc<L>, key: String) -> Result<Self> {
        let identity = manager.acquire_lock(&key).await?;
        Ok(Self {
            manager,
            key,
            identity,
            released: false,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Restart the lease, failing with [`TurnstileError::LockLost`] if another
    /// holder took over after it lapsed.
    pub async fn extend(&self) -> Result<()> {
        let outcome = self.manager.extend_lock(&self.key, &self.identity).await?;
        if !outcome.success {
            return Err(TurnstileError::LockLost {
                key: self.key.clone(),
            });
        }
        Ok(())
    }

    /// Release the lock, surfacing a mismatch if ownership was lost.
    ///
    /// If this future is dropped before the release completes, the guard's
    /// drop still schedules one.
    pub async fn release(mut self) -> Result<()> {
        let outcome = self.manager.release_lock(&self.key, &self.identity).await;
        self.released = true;
        if !outcome?.success {
            return Err(TurnstileError::LockReleaseMismatch {
                key: self.key.clone(),
            });
        }
        Ok(())
    }
}

impl<L: LockManager + ?Sized + 'static> Drop for LockGuard<L> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "Lock guard dropped outside a runtime, leaving it to lease expiry");
            return;
        };

        warn!(key = %self.key, "Lock guard dropped without release, releasing in background");
        let manager = self.manager.clone();
        let key = std::mem::take(&mut self.key);
        let identity = std::mem::take(&mut self.identity);
        handle.spawn(async move {
            match manager.release_lock(&key, &identity).await {
                Ok(outcome) if outcome.success => debug!(key = %key, "Background release succeeded"),
                Ok(_) => warn!(key = %key, "Background release refused, lock already lost"),
                Err(e) => warn!(key = %key, error = %e, "Background release failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{
        AcquireOutcome, ExtendOutcome, LockRetryPolicy, MemoryLockManager, ReleaseOutcome,
    };
    use std::time::Duration;

    fn manager() -> Arc<MemoryLockManager> {
        Arc::new(MemoryLockManager::new(LockRetryPolicy {
            retry_delay: Duration::from_millis(10),
            retry_jitter: Duration::ZERO,
            ..Default::default()
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_frees_lock() {
        let manager = manager();
        let guard = LockGuard::acquire(manager.clone(), "k".to_string()).await.unwrap();
        assert_eq!(manager.holder("k").as_deref(), Some(guard.identity()));

        guard.release().await.unwrap();
        assert!(!manager.is_locked("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_reports_lost_ownership() {
        let manager = manager();
        let guard = LockGuard::acquire(manager.clone(), "k".to_string()).await.unwrap();

        // Someone else's lease replaced ours
        manager.release_lock("k", &guard.identity().to_string()).await.unwrap();
        let usurper = manager.acquire_lock("k").await.unwrap();

        let err = guard.release().await.unwrap_err();
        assert!(matches!(err, TurnstileError::LockReleaseMismatch { .. }));
        assert_eq!(manager.holder("k"), Some(usurper));
    }

    /// Delays every release so it can be interrupted mid-flight.
    struct SlowRelease(Arc<MemoryLockManager>);

    #[async_trait::async_trait]
    impl LockManager for SlowRelease {
        fn retry_policy(&self) -> LockRetryPolicy {
            self.0.retry_policy()
        }

        async fn try_to_acquire_lock(&self, key: &str) -> Result<AcquireOutcome> {
            self.0.try_to_acquire_lock(key).await
        }

        async fn release_lock(&self, key: &str, identity: &str) -> Result<ReleaseOutcome> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.0.release_lock(key, identity).await
        }

        async fn extend_lock(&self, key: &str, identity: &str) -> Result<ExtendOutcome> {
            self.0.extend_lock(key, identity).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_release_still_frees_lock() {
        let inner = manager();
        let slow = Arc::new(SlowRelease(inner.clone()));
        let guard = LockGuard::acquire(slow, "k".to_string()).await.unwrap();

        let releasing = tokio::spawn(guard.release());
        tokio::time::sleep(Duration::from_millis(100)).await;
        releasing.abort();
        assert!(releasing.await.unwrap_err().is_cancelled());
        assert!(inner.is_locked("k"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!inner.is_locked("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_fails_once_lease_is_taken_over() {
        let manager = manager();
        let guard = LockGuard::acquire(manager.clone(), "k".to_string()).await.unwrap();
        guard.extend().await.unwrap();

        // Lease runs out and someone else claims the key
        tokio::time::advance(Duration::from_secs(120)).await;
        let usurper = manager.acquire_lock("k").await.unwrap();

        let err = guard.extend().await.unwrap_err();
        assert!(matches!(err, TurnstileError::LockLost { .. }));
        assert_eq!(manager.holder("k"), Some(usurper));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_in_background() {
        let manager = manager();
        {
            let _guard = LockGuard::acquire(manager.clone(), "k".to_string()).await.unwrap();
            assert!(manager.is_locked("k"));
        }

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!manager.is_locked("k"));
    }
}
