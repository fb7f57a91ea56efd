//! Secret-storage boundary (spec §4.X) — interface only. Per §1 the
//! secret-storage bus object tree is out of scope for this crate; this
//! module defines the trait the (unwritten) bus dispatcher would call
//! against, so `vault::VaultClient` has a stable seam to implement.

use keyring_common::{CoreError, VaultItem, VaultStatus};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Per-call context threaded through a `SecretBackend` operation.
/// Carries the cancellation token the unlock coordinator honours at
/// its two checkpoints (spec §4.F).
pub struct OpContext {
    pub token: CancellationToken,
}

impl OpContext {
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

#[allow(async_fn_in_trait)]
pub trait SecretBackend {
    async fn status(&self) -> Result<VaultStatus, CoreError>;
    async fn unlock(&self, ctx: &OpContext) -> Result<(), CoreError>;
    async fn search_items(&self, ctx: &OpContext, query: &str) -> Result<Vec<VaultItem>, CoreError>;
    async fn get_item(&self, ctx: &OpContext, id: &str) -> Result<VaultItem, CoreError>;
    async fn create_item(&self, ctx: &OpContext, req: Value) -> Result<VaultItem, CoreError>;
}
