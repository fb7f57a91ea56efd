//! Unlock coordinator (spec §4.F) — the single-flight, retry-aware
//! state machine that sits in front of every vault operation except
//! `Status`/`Unlock`/`Lock` themselves.
//!
//! New (no direct teacher counterpart); concurrency primitives
//! (`tokio::sync::Mutex` guarding only the prompt-and-unlock critical
//! section, `tokio::sync::RwLock` for the session token) follow the
//! same async-trait-over-a-lock shape as `cli/src/infra/state.rs`.

use std::future::Future;
use std::time::Duration;

use keyring_common::CoreError;
use tokio_util::sync::CancellationToken;

use crate::prompt::PromptPipeline;
use crate::session::SessionStore;
use crate::vault::bridge::BridgeProcess;
use crate::vault::client::VaultHttp;

/// Bridge response substrings (case-insensitive) that mean "the
/// supplied master password was wrong", as opposed to any other
/// unlock failure (which is not retried). Preserved verbatim per the
/// spec's open-question guidance — there is no structured error
/// channel in the bridge's wire format to use instead.
const WRONG_PASSWORD_MARKERS: [&str; 2] = ["invalid master password", "invalid password"];

pub struct UnlockCoordinator {
    in_flight: tokio::sync::Mutex<()>,
    auto_unlock: bool,
    max_retries: u32,
    prompt_timeout: Duration,
}

impl UnlockCoordinator {
    #[must_use]
    pub fn new(auto_unlock: bool, max_retries: u32, prompt_timeout: Duration) -> Self {
        Self {
            in_flight: tokio::sync::Mutex::new(()),
            auto_unlock,
            max_retries,
            prompt_timeout,
        }
    }

    /// Run `op` against the vault, auto-unlocking first if necessary.
    /// `op` may be invoked more than once is never true — it runs
    /// exactly once, after the vault is confirmed unlocked.
    pub async fn run<T, F, Fut>(
        &self,
        http: &VaultHttp,
        bridge: &BridgeProcess,
        session: &SessionStore,
        prompts: &PromptPipeline,
        token: &CancellationToken,
        op: F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        if !self.auto_unlock {
            if self.is_locked(http).await? {
                return Err(CoreError::VaultLocked);
            }
            return op().await;
        }

        if !self.is_locked(http).await? {
            return op().await;
        }

        if token.is_cancelled() {
            return Err(CoreError::UserCancelled);
        }

        let _guard = self.in_flight.lock().await;

        if token.is_cancelled() {
            return Err(CoreError::UserCancelled);
        }

        if !self.is_locked(http).await? {
            return op().await;
        }

        if !bridge.healthy().await {
            if bridge.exited().await {
                return Err(CoreError::BridgeExited);
            }
            return Err(CoreError::BridgeUnavailable);
        }

        self.unlock_with_retries(http, session, prompts, token)
            .await?;
        op().await
    }

    async fn is_locked(&self, http: &VaultHttp) -> Result<bool, CoreError> {
        Ok(http.raw_status().await? != keyring_common::VaultStatus::Unlocked)
    }

    async fn unlock_with_retries(
        &self,
        http: &VaultHttp,
        session: &SessionStore,
        prompts: &PromptPipeline,
        token: &CancellationToken,
    ) -> Result<(), CoreError> {
        let mut message = String::new();
        let (mut password, mut prompt_session) = self
            .bounded_prompt(prompts, token, "Unlock vault", &message)
            .await?;

        for attempt in 0..self.max_retries {
            let response = http.raw_unlock(&password).await?;
            if response.success {
                prompt_session.send_result(true, "", false).await;
                if let Some(raw) = response.raw {
                    session.set(keyring_common::SessionToken::new(raw)).await;
                }
                return Ok(());
            }

            if !is_wrong_password(&response.message) {
                prompt_session
                    .send_result(false, &response.message, false)
                    .await;
                return Err(CoreError::ProtocolError(response.message));
            }

            let remaining = self.max_retries - attempt - 1;
            message = format!("Incorrect password. {remaining} attempt(s) remaining");

            if remaining == 0 {
                prompt_session.send_result(false, &message, false).await;
                break;
            }

            prompt_session.send_result(false, &message, true).await;
            match tokio::time::timeout(self.prompt_timeout, prompt_session.wait_for_retry(token))
                .await
            {
                Ok(Some(Ok(next_password))) => password = next_password,
                Ok(Some(Err(err))) => return Err(retry_wait_error(err)),
                Ok(None) => {
                    let (next_password, next_session) = self
                        .bounded_prompt(prompts, token, "Unlock vault", &message)
                        .await?;
                    password = next_password;
                    prompt_session = next_session;
                }
                Err(_) => return Err(CoreError::Timeout),
            }
        }

        Err(CoreError::MaxRetriesExceeded)
    }

    /// Run `prompts.prompt(...)` under an overall deadline. This bounds
    /// the whole pipeline (rich-IPC plus every helper in the fallback
    /// chain) rather than any single provider's own internal timeout —
    /// `RichIpcProvider`'s `timeout` field and `ExternalHelperProvider`'s
    /// fixed per-process timeout both still apply underneath it.
    async fn bounded_prompt(
        &self,
        prompts: &PromptPipeline,
        token: &CancellationToken,
        title: &str,
        message: &str,
    ) -> Result<(String, crate::prompt::PromptSession), CoreError> {
        match tokio::time::timeout(self.prompt_timeout, prompts.prompt(token, title, message))
            .await
        {
            Ok(result) => result.map_err(prompt_error),
            Err(_) => Err(CoreError::Timeout),
        }
    }
}

fn is_wrong_password(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    WRONG_PASSWORD_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

fn prompt_error(err: crate::prompt::ProviderError) -> CoreError {
    match err {
        crate::prompt::ProviderError::Cancelled => CoreError::UserCancelled,
        crate::prompt::ProviderError::Failure(_) => CoreError::NoSecurePromptAvailable,
    }
}

/// An error surfaced while waiting on the *same* rich-IPC connection for
/// a retry password always short-circuits the whole unlock attempt — the
/// caller already has a live conversation, so falling back to re-running
/// the generic prompt chain here would pop a second, unrelated prompt
/// right after the user cancelled (or the connection failed) on this one.
fn retry_wait_error(err: crate::prompt::ProviderError) -> CoreError {
    match err {
        crate::prompt::ProviderError::Cancelled => CoreError::UserCancelled,
        crate::prompt::ProviderError::Failure(msg) => {
            let lower = msg.to_ascii_lowercase();
            if lower.contains("cookie mismatch") {
                CoreError::CookieMismatch
            } else if lower.contains("timed out") {
                CoreError::Timeout
            } else {
                CoreError::ProtocolError(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_password_markers_match_case_insensitively() {
        assert!(is_wrong_password("Invalid Master Password"));
        assert!(is_wrong_password("ERROR: invalid password supplied"));
        assert!(!is_wrong_password("bridge is shutting down"));
    }
}
