//! The call made once a client is admitted.

use async_trait::async_trait;

use crate::error::Result;
use crate::key::ClientKey;

/// The service an admitted request is forwarded to.
///
/// Called while the client's admission lock is still held.
#[async_trait]
pub trait Downstream: Send + Sync {
    async fn call(&self, client_key: &ClientKey) -> Result<()>;
}

/// Placeholder downstream that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDownstream;

#[async_trait]
impl Downstream for NoopDownstream {
    async fn call(&self, _client_key: &ClientKey) -> Result<()> {
        Ok(())
    }
}
