//! Pre-connection network probe interface.

use async_trait::async_trait;

use super::error::ProbeError;

/// Checks that the realtime endpoint is reachable before a join is attempted.
///
/// The connection manager wraps every call in its own timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn probe(&self) -> Result<(), ProbeError>;
}
