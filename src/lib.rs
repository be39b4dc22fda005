//! Turnstile - Per-Client Admission Gate
//!
//! This crate serializes and throttles calls made on behalf of a client key.
//! Each admission takes a distributed lock for the key, checks a shared
//! windowed counter, waits while the client is over quota, then counts the
//! call and forwards it. Counters and locks live in a shared backend (Redis)
//! so several gate processes can run side by side.

pub mod backend;
pub mod config;
pub mod error;
pub mod gate;
pub mod key;
pub mod lock;
pub mod ratelimit;

pub use backend::{Backends, DynAdmissionGate};
pub use error::{Result, TurnstileError};
pub use gate::{Admission, AdmissionGate, PollPolicy};
pub use key::ClientKey;
