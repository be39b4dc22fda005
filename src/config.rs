//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TurnstileError};
use crate::gate::PollPolicy;
use crate::lock::LockRetryPolicy;
use crate::ratelimit::RateLimitPolicy;

/// Environment variable prefix, e.g. `TURNSTILE__RATE_LIMIT__THRESHOLD=20`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile gate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Quota settings
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Exceeded-quota polling settings
    #[serde(default)]
    pub polling: PollingSettings,

    /// Lock acquisition settings
    #[serde(default)]
    pub lock: LockSettings,

    /// Backing store selection
    #[serde(default)]
    pub backend: BackendSettings,
}

/// Rate limit quota settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Admissions allowed per window before callers start polling
    #[serde(default = "default_threshold")]
    pub threshold: u64,

    /// Window length in milliseconds, measured from the first increment
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            window_ms: default_window_ms(),
        }
    }
}

fn default_threshold() -> u64 {
    10
}

fn default_window_ms() -> u64 {
    60_000
}

/// Polling settings used while a client is over quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    /// Fixed sleep between exceeded checks
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// Give up after this many sleeps (unbounded when unset)
    #[serde(default)]
    pub max_polls: Option<u32>,

    /// Upper bound of random extra delay per sleep (none when unset)
    #[serde(default)]
    pub jitter_ms: Option<u64>,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_polls: None,
            jitter_ms: None,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}

/// Lock settings shared by every lock manager implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    /// Lease after which an unreleased lock is reclaimed
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    /// Delay between acquisition attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Random extra delay between acquisition attempts
    #[serde(default = "default_retry_jitter_ms")]
    pub retry_jitter_ms: u64,

    /// Give up after this many attempts (retry until acquired when unset)
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease_ms: default_lease_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_jitter_ms: default_retry_jitter_ms(),
            max_attempts: None,
        }
    }
}

fn default_lease_ms() -> u64 {
    120_000
}

fn default_retry_delay_ms() -> u64 {
    200
}

fn default_retry_jitter_ms() -> u64 {
    100
}

/// Which backing services hold counters and locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local maps; no cross-process guarantees
    Memory,
    /// A shared Redis server
    Redis,
}

/// Backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default = "default_backend_kind")]
    pub kind: BackendKind,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Namespace prepended to every Redis key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// How often the memory backend sweeps lapsed windows and leases
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }
}

fn default_backend_kind() -> BackendKind {
    BackendKind::Memory
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_key_prefix() -> String {
    "turnstile".to_string()
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

impl TurnstileConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `TURNSTILE__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: TurnstileConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path, ignoring the environment.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| TurnstileError::Config(e.to_string()))
    }

    /// Reject settings that would make the gate misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.threshold == 0 {
            return Err(TurnstileError::Config(
                "rate_limit.threshold must be greater than 0".to_string(),
            ));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(TurnstileError::Config(
                "rate_limit.window_ms must be greater than 0".to_string(),
            ));
        }
        if self.polling.interval_ms == 0 {
            return Err(TurnstileError::Config(
                "polling.interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.lock.lease_ms == 0 {
            return Err(TurnstileError::Config(
                "lock.lease_ms must be greater than 0".to_string(),
            ));
        }
        // The lease is renewed after every poll, so it must outlast one sleep
        let longest_poll_ms = self
            .polling
            .interval_ms
            .saturating_add(self.polling.jitter_ms.unwrap_or(0));
        if self.lock.lease_ms <= longest_poll_ms {
            return Err(TurnstileError::Config(format!(
                "lock.lease_ms ({}) must exceed polling.interval_ms plus polling.jitter_ms ({})",
                self.lock.lease_ms, longest_poll_ms
            )));
        }
        if self.backend.cleanup_interval_ms == 0 {
            return Err(TurnstileError::Config(
                "backend.cleanup_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.backend.kind == BackendKind::Redis && self.backend.redis_url.is_empty() {
            return Err(TurnstileError::Config(
                "backend.redis_url is required for the redis backend".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(
            self.rate_limit.threshold,
            Duration::from_millis(self.rate_limit.window_ms),
        )
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.polling.interval_ms),
            max_polls: self.polling.max_polls,
            jitter: self.polling.jitter_ms.map(Duration::from_millis),
        }
    }

    pub fn lock_retry_policy(&self) -> LockRetryPolicy {
        LockRetryPolicy {
            lease: Duration::from_millis(self.lock.lease_ms),
            retry_delay: Duration::from_millis(self.lock.retry_delay_ms),
            retry_jitter: Duration::from_millis(self.lock.retry_jitter_ms),
            max_attempts: self.lock.max_attempts,
        }
    }
}
