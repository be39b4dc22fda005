//! Per-client admission gate.

mod admission;
mod backoff;
mod downstream;

pub use admission::{Admission, AdmissionGate};
pub use backoff::{PollPolicy, DEFAULT_POLL_INTERVAL};
pub use downstream::{Downstream, NoopDownstream};
