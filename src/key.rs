//! Client key handling.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::TurnstileError;

/// Suffix appended to a client key to name its admission lock.
pub const LOCK_KEY_SUFFIX: &str = "lock";

/// Identifies the caller an admission decision is made for.
///
/// The same key names the caller's rate-limit counter, and with
/// [`LOCK_KEY_SUFFIX`] appended, its admission lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientKey(Arc<str>);

impl ClientKey {
    /// Create a client key, rejecting empty input.
    pub fn new(value: impl Into<String>) -> Result<Self, TurnstileError> {
        let value = value.into();
        if value.is_empty() {
            return Err(TurnstileError::InvalidClientKey(
                "client key must not be empty".to_string(),
            ));
        }
        Ok(Self(Arc::from(value)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the lock guarding this client's admissions.
    pub fn lock_key(&self) -> String {
        format!("{}{}", self.0, LOCK_KEY_SUFFIX)
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClientKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ClientKey {
    type Err = TurnstileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ClientKey {
    type Error = TurnstileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
