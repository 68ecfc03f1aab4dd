//! Emulator reachability
//!
//! Every client implements [`EmulatorProbe`] so the harness can decide
//! whether a group runs or is skipped before any fixture is created.

use crate::error::ClientError;
use async_trait::async_trait;
use url::Url;

/// Cheap health request against one emulator API
#[async_trait]
pub trait EmulatorProbe: Send + Sync {
    /// Short service name used in logs and reports
    fn name(&self) -> &'static str;

    /// Base endpoint the client talks to
    fn endpoint(&self) -> &Url;

    /// Issue a read-only request that proves the emulator answers and
    /// accepts the configured credentials
    ///
    /// # Errors
    /// * `ClientError::Http` - Emulator unreachable (see `is_connection`)
    /// * `ClientError::Api` - Emulator answered but rejected the request
    async fn health_check(&self) -> Result<(), ClientError>;
}
