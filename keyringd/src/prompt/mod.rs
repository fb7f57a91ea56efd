//! Secure-prompt pipeline (spec §4.C) — asks the user for the vault's
//! master password through whichever channel is actually available,
//! in a fixed priority order: rich-IPC, then GUI helpers, then a
//! console helper, then (only if explicitly allowed) an insecure
//! fallback that echoes the password in plain text.
//!
//! The provider trait and selection loop are grounded on
//! `cli/src/application/ports.rs`'s capability-trait style (a behavior
//! swappable per call site, probed before use rather than assumed).

pub mod helpers;
pub mod protocol;
pub mod rich_ipc;

use tokio_util::sync::CancellationToken;

pub use rich_ipc::RichIpcSession;

/// Why a provider failed to produce a password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The user explicitly dismissed the prompt.
    Cancelled,
    /// The provider itself could not run (missing binary, malformed
    /// socket, non-zero exit other than the cancellation codes).
    Failure(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "prompt cancelled"),
            Self::Failure(msg) => write!(f, "{msg}"),
        }
    }
}

/// A single password prompt. Implementations probe their own
/// availability; `prompt` is only called after `probe` returned `true`.
#[allow(async_fn_in_trait)]
pub trait PromptProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn probe(&self) -> bool;
    async fn prompt(
        &self,
        token: &CancellationToken,
        title: &str,
        message: &str,
    ) -> Result<String, ProviderError>;
}

/// A live conversation with whichever provider answered the first
/// prompt. Only the rich-IPC provider supports a true in-place retry
/// (same connection, same cookie); every other provider re-runs the
/// whole pipeline for each subsequent attempt.
pub enum PromptSession {
    RichIpc(RichIpcSession),
    Opaque,
}

impl PromptSession {
    /// Report the outcome of an unlock attempt back to the provider, if
    /// the provider is capable of receiving it (only rich-IPC is).
    pub async fn send_result(&mut self, success: bool, error: &str, retry: bool) {
        if let Self::RichIpc(session) = self {
            session.send_result(success, error, retry).await;
        }
    }

    /// Wait for a retry password on the same conversation. Returns
    /// `None` when this session cannot retry in place — the caller
    /// should fall back to running the pipeline again from the top.
    pub async fn wait_for_retry(
        &mut self,
        token: &CancellationToken,
    ) -> Option<Result<String, ProviderError>> {
        match self {
            Self::RichIpc(session) => Some(session.wait_for_retry(token).await),
            Self::Opaque => None,
        }
    }
}

/// The ordered provider chain plus the optional rich-IPC conversation
/// starter, built once at daemon startup from `DaemonConfig`.
pub struct PromptPipeline {
    rich_ipc: Option<rich_ipc::RichIpcProvider>,
    chain: Vec<Box<dyn PromptProvider>>,
}

impl PromptPipeline {
    #[must_use]
    pub fn new(
        rich_ipc: Option<rich_ipc::RichIpcProvider>,
        chain: Vec<Box<dyn PromptProvider>>,
    ) -> Self {
        Self { rich_ipc, chain }
    }

    /// Build the default chain described in spec §4.C from config: GUI
    /// helpers, a console helper, and — only when explicitly allowed —
    /// an insecure plain-text fallback, strictly last.
    #[must_use]
    pub fn default_chain(
        systemd_ask_password_path: Option<std::path::PathBuf>,
        allow_insecure: bool,
    ) -> Vec<Box<dyn PromptProvider>> {
        let mut chain: Vec<Box<dyn PromptProvider>> = vec![
            Box::new(helpers::zenity_provider()),
            Box::new(helpers::kdialog_provider()),
            Box::new(helpers::rofi_provider()),
            Box::new(helpers::console_provider(systemd_ask_password_path)),
        ];
        if allow_insecure {
            chain.push(Box::new(helpers::insecure_dmenu_provider()));
        }
        chain
    }

    /// Ask for a password, opening a session that later retry attempts
    /// can be driven through. Tries the rich-IPC provider first (if
    /// configured); on any provider-level failure there, falls through
    /// to the generic chain for this attempt only.
    pub async fn prompt(
        &self,
        token: &CancellationToken,
        title: &str,
        message: &str,
    ) -> Result<(String, PromptSession), ProviderError> {
        if let Some(provider) = &self.rich_ipc {
            if provider.probe().await {
                match provider.open_session(token, title, message).await {
                    Ok((password, session)) => {
                        return Ok((password, PromptSession::RichIpc(session)));
                    }
                    Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
                    Err(ProviderError::Failure(_)) => {}
                }
            }
        }
        let password = self.prompt_once(token, title, message).await?;
        Ok((password, PromptSession::Opaque))
    }

    /// One-shot prompt using only the generic (non-rich-IPC) chain,
    /// probing each provider in order and using the first available.
    pub async fn prompt_once(
        &self,
        token: &CancellationToken,
        title: &str,
        message: &str,
    ) -> Result<String, ProviderError> {
        for provider in &self.chain {
            if !provider.probe().await {
                continue;
            }
            match provider.prompt(token, title, message).await {
                Ok(password) => return Ok(password),
                Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
                Err(ProviderError::Failure(_)) => continue,
            }
        }
        Err(ProviderError::Failure(
            "no secure prompt provider is available".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;
    impl PromptProvider for AlwaysFails {
        fn name(&self) -> &'static str {
            "always-fails"
        }
        async fn probe(&self) -> bool {
            true
        }
        async fn prompt(
            &self,
            _token: &CancellationToken,
            _title: &str,
            _message: &str,
        ) -> Result<String, ProviderError> {
            Err(ProviderError::Failure("nope".to_string()))
        }
    }

    struct Unavailable;
    impl PromptProvider for Unavailable {
        fn name(&self) -> &'static str {
            "unavailable"
        }
        async fn probe(&self) -> bool {
            false
        }
        async fn prompt(
            &self,
            _token: &CancellationToken,
            _title: &str,
            _message: &str,
        ) -> Result<String, ProviderError> {
            unreachable!("probe() returned false, prompt() must not be called")
        }
    }

    struct Succeeds(&'static str);
    impl PromptProvider for Succeeds {
        fn name(&self) -> &'static str {
            "succeeds"
        }
        async fn probe(&self) -> bool {
            true
        }
        async fn prompt(
            &self,
            _token: &CancellationToken,
            _title: &str,
            _message: &str,
        ) -> Result<String, ProviderError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn falls_through_unavailable_and_failing_providers_to_the_one_that_works() {
        let pipeline = PromptPipeline::new(
            None,
            vec![
                Box::new(Unavailable),
                Box::new(AlwaysFails),
                Box::new(Succeeds("hunter2")),
            ],
        );
        let token = CancellationToken::new();
        let password = pipeline
            .prompt_once(&token, "Unlock", "Enter password")
            .await
            .expect("should succeed via third provider");
        assert_eq!(password, "hunter2");
    }

    #[tokio::test]
    async fn fails_closed_when_no_provider_is_available() {
        let pipeline = PromptPipeline::new(None, vec![Box::new(Unavailable)]);
        let token = CancellationToken::new();
        let err = pipeline
            .prompt_once(&token, "Unlock", "Enter password")
            .await
            .expect_err("no provider available");
        assert!(matches!(err, ProviderError::Failure(_)));
    }

    #[tokio::test]
    async fn opaque_session_reports_no_in_place_retry() {
        let mut session = PromptSession::Opaque;
        let token = CancellationToken::new();
        session.send_result(false, "bad password", true).await;
        assert!(session.wait_for_retry(&token).await.is_none());
    }
}
