//! `bitwarden-keyringd` entry point — wires `DaemonConfig` flags into the
//! component graph (session store → vault client → unlock coordinator →
//! prompt pipeline; SSH server over the key-ring facade) and runs until
//! `SIGINT`/`SIGTERM`.
//!
//! Grounded on `cli/src/main.rs`'s `tokio::select!` against `ctrl_c()`,
//! extended to also listen for `SIGTERM` since this is a long-running
//! daemon rather than a one-shot CLI invocation, and on
//! `services/toolbox/crates/toolbox-server/src/main.rs`'s
//! `tracing_subscriber` + `EnvFilter` setup for structured logging.

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use keyringd::config::{Component, DaemonConfig, SessionStoreMode};
use keyringd::process::{executable_on_path, CommandRunner, TokioCommandRunner};
use keyringd::prompt::rich_ipc::RichIpcProvider;
use keyringd::prompt::PromptPipeline;
use keyringd::session::{Mode as SessionMode, SessionStore};
use keyringd::ssh::keyring::KeyRing;
use keyringd::ssh::server::SshAgentServer;
use keyringd::vault::bridge::BridgeProcess;
use keyringd::vault::client::VaultHttp;
use keyringd::vault::VaultClient;

/// The external vault-bridge subprocess (§4.D). The `bw-*` flag naming
/// and `BW_SESSION` env var both point at the Bitwarden CLI's own
/// `serve` subcommand as the bridge this daemon supervises.
const BRIDGE_EXECUTABLE: &str = "bw";

#[tokio::main]
async fn main() {
    let config = DaemonConfig::parse();
    init_tracing(config.debug);

    if let Err(err) = config.validate() {
        tracing::error!(error = %err, "invalid configuration");
        std::process::exit(1);
    }

    if let Err(err) = run(config).await {
        tracing::error!(error = %err, "bitwarden-keyringd failed to start");
        std::process::exit(1);
    }
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
}

async fn run(config: DaemonConfig) -> Result<()> {
    tracing::info!("bitwarden-keyringd starting");

    if !executable_on_path(BRIDGE_EXECUTABLE) {
        anyhow::bail!(
            "{BRIDGE_EXECUTABLE} is not on PATH; install the Bitwarden CLI to run this daemon"
        );
    }

    let port = resolve_port(config.bw_port)?;

    let session_mode = match config.session_store {
        SessionStoreMode::Memory => SessionMode::Memory,
        SessionStoreMode::File => SessionMode::File,
    };
    let session_path = config
        .session_file
        .clone()
        .unwrap_or_else(SessionStore::default_path);
    let session = Arc::new(SessionStore::new(session_mode, session_path));
    session.load().await;

    let http = VaultHttp::new(format!("http://127.0.0.1:{port}"), config.debug_http);
    let bridge = Arc::new(BridgeProcess::new(BRIDGE_EXECUTABLE, port));
    bridge
        .start(
            &http,
            session.get().await.as_ref(),
            Duration::from_secs(config.bw_start_timeout_secs),
        )
        .await
        .context("starting the vault bridge")?;
    tracing::info!(port, "vault bridge ready");

    let prompts = Arc::new(build_prompt_pipeline(&config));
    let vault = Arc::new(VaultClient::new(
        http,
        bridge.clone(),
        session.clone(),
        prompts,
        true,
        config.max_password_retries,
        Duration::from_secs(config.noctalia_timeout_secs),
    ));

    let root_token = CancellationToken::new();

    let ssh_server = if config.runs(Component::Ssh) {
        let socket_path = config
            .ssh_socket
            .clone()
            .unwrap_or_else(SshAgentServer::default_socket_path);
        let keyring = Arc::new(KeyRing::new(vault.clone(), root_token.clone()));
        let server = Arc::new(SshAgentServer::new(socket_path.clone(), keyring));
        server
            .start()
            .await
            .context("starting the SSH agent socket")?;
        tracing::info!(socket = %socket_path.display(), "ssh agent listening");
        if !config.no_ssh_env_export {
            announce_ssh_auth_sock(&socket_path).await;
        }
        Some(server)
    } else {
        None
    };

    if config.runs(Component::Secrets) {
        tracing::info!(
            "secrets component enabled; the secret-storage bus object tree itself is out \
             of this crate's scope — the vault client and unlock coordinator implement \
             keyringd::secretservice::SecretBackend for a bus dispatcher to drive"
        );
    }

    wait_for_shutdown_signal().await;
    tracing::info!("shutting down");

    root_token.cancel();
    if let Some(server) = ssh_server {
        server.stop().await;
    }
    bridge.stop().await;

    tracing::info!("bitwarden-keyringd stopped");
    Ok(())
}

/// `0` picks a free ephemeral loopback port, per §6's `bw-port` flag.
fn resolve_port(configured: u16) -> Result<u16> {
    if configured != 0 {
        return Ok(configured);
    }
    let listener =
        TcpListener::bind(("127.0.0.1", 0)).context("finding a free ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

fn build_prompt_pipeline(config: &DaemonConfig) -> PromptPipeline {
    let rich_ipc = if config.noctalia {
        let socket = config
            .noctalia_socket
            .clone()
            .unwrap_or_else(default_noctalia_socket_path);
        Some(RichIpcProvider::new(
            socket,
            Duration::from_secs(config.noctalia_timeout_secs),
        ))
    } else {
        None
    };
    let chain = PromptPipeline::default_chain(
        config.systemd_ask_password_path.clone(),
        config.allow_insecure_prompts,
    );
    PromptPipeline::new(rich_ipc, chain)
}

/// Default rich-IPC socket: the convention a desktop-shell widget (e.g.
/// a noctalia-style keyring-IPC panel) would publish its endpoint
/// under, mirroring the SSH socket's own `XDG_RUNTIME_DIR`-first,
/// `/tmp`-fallback layout.
fn default_noctalia_socket_path() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(runtime_dir) => PathBuf::from(runtime_dir).join("noctalia").join("keyring.sock"),
        None => {
            let uid = nix::unistd::geteuid().as_raw();
            PathBuf::from(format!("/tmp/noctalia-{uid}")).join("keyring.sock")
        }
    }
}

/// Best-effort: announce `SSH_AUTH_SOCK` to the session-bus activation
/// environment so D-Bus-activated services started later pick it up,
/// the way `ssh-agent -a` callers usually export the announced env var
/// into their shell. Absence of `dbus-update-activation-environment`
/// (or its failure) never blocks daemon startup.
async fn announce_ssh_auth_sock(socket_path: &std::path::Path) {
    if !executable_on_path("dbus-update-activation-environment") {
        return;
    }
    let assignment = format!("SSH_AUTH_SOCK={}", socket_path.display());
    let _ = TokioCommandRunner
        .run_with_timeout(
            "dbus-update-activation-environment",
            &["--systemd", &assignment],
            Duration::from_secs(5),
        )
        .await;
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(stream) => stream,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
