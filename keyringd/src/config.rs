//! Daemon configuration — the §6 flag/env surface collected into one
//! struct, the way `cli/src/cli.rs` collects top-level flags into `Cli`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Which components to run. Mirrors the `--components` flag's
/// `{secrets, ssh}` subset; default is both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum Component {
    Secrets,
    Ssh,
}

/// Session persistence mode (`--session-store`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
#[value(rename_all = "kebab-case")]
pub enum SessionStoreMode {
    #[default]
    Memory,
    File,
}

/// Per-user credential broker daemon — bridges a desktop session to a
/// Bitwarden vault over a local secret-storage endpoint and an SSH agent
/// socket.
#[derive(Debug, Parser)]
#[command(name = "bitwarden-keyringd", version)]
pub struct DaemonConfig {
    /// Loopback port for the vault bridge. `0` picks a free ephemeral port.
    #[arg(long = "bw-port", default_value_t = 0)]
    pub bw_port: u16,

    /// Readiness deadline for the vault bridge supervisor, in seconds.
    #[arg(long = "bw-start-timeout", default_value_t = 30)]
    pub bw_start_timeout_secs: u64,

    /// Enable debug logging.
    #[arg(long)]
    pub debug: bool,

    /// Enable redacted HTTP body logging (implies `--debug` semantics for
    /// the HTTP client only).
    #[arg(long)]
    pub debug_http: bool,

    /// Enable the rich-IPC prompt provider.
    #[arg(long, env = "BITWARDEN_KEYRING_NOCTALIA")]
    pub noctalia: bool,

    /// Override the rich-IPC provider's socket path.
    #[arg(long = "noctalia-socket")]
    pub noctalia_socket: Option<PathBuf>,

    /// Per-prompt timeout for the rich-IPC provider, in seconds.
    #[arg(long = "noctalia-timeout", default_value_t = 60)]
    pub noctalia_timeout_secs: u64,

    /// Components to run. Defaults to both.
    #[arg(long, value_enum)]
    pub components: Vec<Component>,

    /// Override the SSH agent socket path.
    #[arg(long = "ssh-socket")]
    pub ssh_socket: Option<PathBuf>,

    /// Skip announcing `SSH_AUTH_SOCK` to the session-bus activation
    /// environment.
    #[arg(long)]
    pub no_ssh_env_export: bool,

    /// Include the insecure (plain dmenu) prompt fallback.
    #[arg(long)]
    pub allow_insecure_prompts: bool,

    /// Absolute path to the `systemd-ask-password` helper.
    #[arg(long = "systemd-ask-password-path")]
    pub systemd_ask_password_path: Option<PathBuf>,

    /// Session persistence mode.
    #[arg(long = "session-store", value_enum, default_value_t = SessionStoreMode::Memory)]
    pub session_store: SessionStoreMode,

    /// Override the session persistence path (file mode only).
    #[arg(long = "session-file")]
    pub session_file: Option<PathBuf>,

    /// Upper bound for the unlock retry loop.
    #[arg(long = "max-password-retries", default_value_t = 3)]
    pub max_password_retries: u32,
}

impl DaemonConfig {
    /// Returns the component set in effect: the explicit list, or both if
    /// none was given.
    #[must_use]
    pub fn components(&self) -> Vec<Component> {
        if self.components.is_empty() {
            vec![Component::Secrets, Component::Ssh]
        } else {
            self.components.clone()
        }
    }

    #[must_use]
    pub fn runs(&self, c: Component) -> bool {
        self.components().contains(&c)
    }

    /// Validate flag combinations that `clap` itself can't express.
    /// Per §6, `--systemd-ask-password-path` must be absolute: the
    /// console prompt helper is spawned by full path precisely because
    /// it isn't reliably on an unprivileged `PATH`, so a relative value
    /// would resolve against whatever the daemon's current directory
    /// happens to be rather than the intended binary.
    ///
    /// # Errors
    ///
    /// Returns an error if `--systemd-ask-password-path` was given and
    /// is not an absolute path.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(path) = &self.systemd_ask_password_path {
            anyhow::ensure!(
                path.is_absolute(),
                "--systemd-ask-password-path must be an absolute path, got {}",
                path.display()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_components_are_both() {
        let cfg = DaemonConfig::parse_from(["bitwarden-keyringd"]);
        assert!(cfg.runs(Component::Secrets));
        assert!(cfg.runs(Component::Ssh));
    }

    #[test]
    fn explicit_components_restrict_the_set() {
        let cfg = DaemonConfig::parse_from(["bitwarden-keyringd", "--components", "ssh"]);
        assert!(!cfg.runs(Component::Secrets));
        assert!(cfg.runs(Component::Ssh));
    }

    #[test]
    fn validate_accepts_an_absolute_systemd_ask_password_path() {
        let cfg = DaemonConfig::parse_from([
            "bitwarden-keyringd",
            "--systemd-ask-password-path",
            "/usr/bin/systemd-ask-password",
        ]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_a_relative_systemd_ask_password_path() {
        let cfg = DaemonConfig::parse_from([
            "bitwarden-keyringd",
            "--systemd-ask-password-path",
            "relative/path",
        ]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_the_absent_systemd_ask_password_path() {
        let cfg = DaemonConfig::parse_from(["bitwarden-keyringd"]);
        assert!(cfg.validate().is_ok());
    }
}
