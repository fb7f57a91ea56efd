//! GUI, console, and insecure-fallback prompt providers (spec §4.C).
//!
//! Each is a thin, table-driven wrapper around `process::CommandRunner`:
//! probe via `PATH` lookup, run with a fixed timeout, map the child's
//! exit status (1 or 5 → user cancelled, any other non-zero → provider
//! failure so the pipeline tries the next one), and read the password
//! from stdout.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{PromptProvider, ProviderError};
use crate::process::{executable_on_path, CommandRunner, TokioCommandRunner};

/// Exit codes a helper uses to mean "the user dismissed the prompt",
/// as opposed to any other non-zero status, which means the helper
/// itself failed and the pipeline should try the next provider.
const CANCEL_EXIT_CODES: [i32; 2] = [1, 5];

const HELPER_TIMEOUT: Duration = Duration::from_secs(120);

/// A helper invoked as `<executable> <args>`, with the password read
/// from stdout. `executable` is looked up on `PATH` unless `absolute`
/// overrides it with a fixed path (used for `systemd-ask-password`,
/// which is not reliably on `PATH` for unprivileged users).
struct ExternalHelperProvider {
    name: &'static str,
    executable: PathBuf,
    build_args: fn(title: &str, message: &str) -> Vec<String>,
    runner: TokioCommandRunner,
}

impl ExternalHelperProvider {
    fn new(
        name: &'static str,
        executable: PathBuf,
        build_args: fn(&str, &str) -> Vec<String>,
    ) -> Self {
        Self {
            name,
            executable,
            build_args,
            runner: TokioCommandRunner,
        }
    }
}

impl PromptProvider for ExternalHelperProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn probe(&self) -> bool {
        if self.executable.is_absolute() {
            self.executable.is_file()
        } else {
            executable_on_path(&self.executable.to_string_lossy())
        }
    }

    async fn prompt(
        &self,
        token: &CancellationToken,
        title: &str,
        message: &str,
    ) -> Result<String, ProviderError> {
        let args = (self.build_args)(title, message);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let program = self.executable.to_string_lossy().into_owned();

        tokio::select! {
            biased;
            () = token.cancelled() => Err(ProviderError::Cancelled),
            result = self.runner.run_with_timeout(&program, &arg_refs, HELPER_TIMEOUT) => {
                let output = result.map_err(|e| ProviderError::Failure(e.to_string()))?;
                match output.status.code() {
                    Some(0) => {
                        let password = String::from_utf8_lossy(&output.stdout);
                        Ok(password.trim_end_matches(['\n', '\r']).to_string())
                    }
                    Some(code) if CANCEL_EXIT_CODES.contains(&code) => Err(ProviderError::Cancelled),
                    Some(code) => Err(ProviderError::Failure(format!(
                        "{} exited with status {code}",
                        self.name
                    ))),
                    None => Err(ProviderError::Failure(format!(
                        "{} was terminated by a signal",
                        self.name
                    ))),
                }
            }
        }
    }
}

#[must_use]
pub fn zenity_provider() -> impl PromptProvider {
    ExternalHelperProvider::new("zenity", PathBuf::from("zenity"), |title, message| {
        vec![
            "--password".to_string(),
            format!("--title={title}"),
            format!("--text={message}"),
        ]
    })
}

#[must_use]
pub fn kdialog_provider() -> impl PromptProvider {
    ExternalHelperProvider::new("kdialog", PathBuf::from("kdialog"), |title, message| {
        vec![
            "--password".to_string(),
            message.to_string(),
            "--title".to_string(),
            title.to_string(),
        ]
    })
}

#[must_use]
pub fn rofi_provider() -> impl PromptProvider {
    ExternalHelperProvider::new("rofi", PathBuf::from("rofi"), |_title, message| {
        vec![
            "-dmenu".to_string(),
            "-password".to_string(),
            "-p".to_string(),
            message.to_string(),
        ]
    })
}

/// The console/headless helper, `systemd-ask-password`. Defaults to a
/// `PATH` lookup but honours `--systemd-ask-password-path` for systems
/// where it lives outside the unprivileged `PATH` (it is typically
/// setuid-free but installed under `/usr/bin` or `/bin` only).
#[must_use]
pub fn console_provider(absolute_path: Option<PathBuf>) -> impl PromptProvider {
    let executable = absolute_path.unwrap_or_else(|| PathBuf::from("systemd-ask-password"));
    ExternalHelperProvider::new("console", executable, |_title, message| {
        vec![message.to_string()]
    })
}

/// Plain-text `dmenu`, with no `-password` flag — the password is
/// visible on screen while typed. Only ever added to the chain when
/// `--allow-insecure-prompts` is set, and always last.
#[must_use]
pub fn insecure_dmenu_provider() -> impl PromptProvider {
    ExternalHelperProvider::new("insecure-dmenu", PathBuf::from("dmenu"), |_title, message| {
        vec!["-p".to_string(), message.to_string()]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exit_code_1_is_reported_as_cancelled() {
        let provider =
            ExternalHelperProvider::new("false-ish", PathBuf::from("sh"), |_t, _m| {
                vec!["-c".to_string(), "exit 1".to_string()]
            });
        let token = CancellationToken::new();
        let err = provider
            .prompt(&token, "Unlock", "Enter password")
            .await
            .expect_err("exit 1 must cancel");
        assert_eq!(err, ProviderError::Cancelled);
    }

    #[tokio::test]
    async fn exit_code_5_is_reported_as_cancelled() {
        let provider = ExternalHelperProvider::new("five", PathBuf::from("sh"), |_t, _m| {
            vec!["-c".to_string(), "exit 5".to_string()]
        });
        let token = CancellationToken::new();
        let err = provider
            .prompt(&token, "Unlock", "Enter password")
            .await
            .expect_err("exit 5 must cancel");
        assert_eq!(err, ProviderError::Cancelled);
    }

    #[tokio::test]
    async fn other_nonzero_exit_is_a_provider_failure_not_cancellation() {
        let provider = ExternalHelperProvider::new("two", PathBuf::from("sh"), |_t, _m| {
            vec!["-c".to_string(), "exit 2".to_string()]
        });
        let token = CancellationToken::new();
        let err = provider
            .prompt(&token, "Unlock", "Enter password")
            .await
            .expect_err("exit 2 must fail, not cancel");
        assert!(matches!(err, ProviderError::Failure(_)));
    }

    #[tokio::test]
    async fn stdout_is_trimmed_and_returned_as_the_password() {
        let provider = ExternalHelperProvider::new("echoer", PathBuf::from("sh"), |_t, _m| {
            vec!["-c".to_string(), "printf 'hunter2\\n'".to_string()]
        });
        let token = CancellationToken::new();
        let password = provider
            .prompt(&token, "Unlock", "Enter password")
            .await
            .expect("should succeed");
        assert_eq!(password, "hunter2");
    }

    #[tokio::test]
    async fn probe_is_false_for_a_nonexistent_executable() {
        let provider = ExternalHelperProvider::new(
            "missing",
            PathBuf::from("definitely-not-a-real-binary-xyz"),
            |_t, _m| vec![],
        );
        assert!(!provider.probe().await);
    }
}
