//! The vault component (spec §4.D–§4.F) — bridge supervision, the raw
//! HTTP client, body redaction, and the auto-unlock coordinator,
//! composed behind one `VaultClient` facade that implements
//! `crate::secretservice::SecretBackend` directly.

pub mod bridge;
pub mod client;
pub mod redact;
pub mod unlock;

use std::sync::Arc;
use std::time::Duration;

use keyring_common::{CoreError, VaultItem, VaultStatus};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::prompt::PromptPipeline;
use crate::secretservice::{OpContext, SecretBackend};
use crate::session::SessionStore;
use bridge::BridgeProcess;
use client::VaultHttp;
use unlock::UnlockCoordinator;

/// The vault facade used by both the secret-storage boundary
/// (`secretservice`) and the SSH key-ring facade (`ssh::keyring`).
pub struct VaultClient {
    http: VaultHttp,
    bridge: Arc<BridgeProcess>,
    session: Arc<SessionStore>,
    prompts: Arc<PromptPipeline>,
    coordinator: UnlockCoordinator,
}

impl VaultClient {
    #[must_use]
    pub fn new(
        http: VaultHttp,
        bridge: Arc<BridgeProcess>,
        session: Arc<SessionStore>,
        prompts: Arc<PromptPipeline>,
        auto_unlock: bool,
        max_retries: u32,
        prompt_timeout: Duration,
    ) -> Self {
        Self {
            http,
            bridge,
            session,
            prompts,
            coordinator: UnlockCoordinator::new(auto_unlock, max_retries, prompt_timeout),
        }
    }

    async fn wrapped<T, F, Fut>(&self, token: &CancellationToken, op: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        self.coordinator
            .run(&self.http, &self.bridge, &self.session, &self.prompts, token, op)
            .await
    }

    pub async fn lock(&self) -> Result<(), CoreError> {
        self.http.raw_lock().await?;
        self.session.clear().await;
        Ok(())
    }

    pub async fn sync(&self, token: &CancellationToken) -> Result<(), CoreError> {
        self.wrapped(token, || self.http.raw_sync()).await
    }

    pub async fn list_items(&self, token: &CancellationToken) -> Result<Vec<VaultItem>, CoreError> {
        self.wrapped(token, || self.http.raw_list_items()).await
    }

    pub async fn update_item(
        &self,
        token: &CancellationToken,
        id: &str,
        req: Value,
    ) -> Result<VaultItem, CoreError> {
        self.wrapped(token, || self.http.raw_update_item(id, req))
            .await
    }

    pub async fn delete_item(&self, token: &CancellationToken, id: &str) -> Result<(), CoreError> {
        self.wrapped(token, || self.http.raw_delete_item(id)).await
    }

    pub async fn list_folders(&self, token: &CancellationToken) -> Result<Vec<Value>, CoreError> {
        self.wrapped(token, || self.http.raw_list_folders()).await
    }

    /// Create a new SSH-key vault item, per the §4.I `Add` table entry.
    /// Thin wrapper over `SecretBackend::create_item` so `ssh::keyring`
    /// doesn't need to hand-assemble the item request shape itself.
    pub async fn create_item_via_secret_backend(
        &self,
        ctx: &OpContext,
        comment: &str,
        private_key_pem: &str,
        public_key_authorised: &str,
        fingerprint: &str,
    ) -> Result<VaultItem, CoreError> {
        let req = serde_json::json!({
            "name": comment,
            "type": "ssh-key",
            "sshKey": {
                "privateKeyPem": private_key_pem,
                "publicKeyAuthorised": public_key_authorised,
                "fingerprint": fingerprint,
            },
        });
        self.create_item(ctx, req).await
    }
}

impl SecretBackend for VaultClient {
    async fn status(&self) -> Result<VaultStatus, CoreError> {
        self.http.raw_status().await
    }

    async fn unlock(&self, ctx: &OpContext) -> Result<(), CoreError> {
        self.wrapped(&ctx.token, || async { Ok(()) }).await
    }

    async fn search_items(&self, ctx: &OpContext, query: &str) -> Result<Vec<VaultItem>, CoreError> {
        self.wrapped(&ctx.token, || self.http.raw_search_items(query))
            .await
    }

    async fn get_item(&self, ctx: &OpContext, id: &str) -> Result<VaultItem, CoreError> {
        self.wrapped(&ctx.token, || self.http.raw_get_item(id)).await
    }

    async fn create_item(&self, ctx: &OpContext, req: Value) -> Result<VaultItem, CoreError> {
        self.wrapped(&ctx.token, || self.http.raw_create_item(req))
            .await
    }
}
