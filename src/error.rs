//! Error types for the Turnstile gate.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The client key could not be used to derive counter or lock keys
    #[error("Invalid client key: {0}")]
    InvalidClientKey(String),

    /// The lock manager gave up before the lock was granted
    #[error("Failed to acquire lock {key} after {attempts} attempts")]
    LockAcquisition { key: String, attempts: u32 },

    /// Release was attempted with an identity that does not own the lock
    #[error("Lock {key} is not owned by the releasing identity")]
    LockReleaseMismatch { key: String },

    /// The lease lapsed while the lock was held, so ownership was lost
    #[error("Lock {key} was lost before the admission finished")]
    LockLost { key: String },

    /// The backing store could not serve the request
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] redis::RedisError),

    /// A stored counter holds something other than a base-10 integer
    #[error("Malformed counter value for {key}: {value:?}")]
    MalformedCounterValue { key: String, value: String },

    /// The poll policy cap was reached while the quota stayed exceeded
    #[error("Rate limit for {key} still exceeded after {polls} polls")]
    PollingExhausted { key: String, polls: u32 },

    /// The downstream call failed while the lock was held
    #[error("Downstream call failed: {0}")]
    Downstream(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TurnstileError {
    fn from(err: config::ConfigError) -> Self {
        TurnstileError::Config(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
