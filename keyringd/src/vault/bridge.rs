//! Vault bridge supervisor (spec §4.D) — launches and babysits the
//! `bridge serve` child process that actually speaks to the vault.
//!
//! Grounded on `cli/src/workspace/health.rs`'s `wait_ready` fixed-interval
//! polling loop (generalized here from a hardcoded attempt count to a
//! caller-supplied deadline) and `cli/src/multipass.rs`'s trait-wrapped
//! subprocess lifecycle (launch/start/stop as async methods over a
//! `tokio::process::Child`).

use std::time::Duration;

use anyhow::{Context, Result};
use keyring_common::SessionToken;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::process::executable_on_path;
use crate::vault::client::VaultHttp;

const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(100);
const GRACEFUL_STOP_WAIT: Duration = Duration::from_secs(3);
const FORCED_KILL_WAIT: Duration = Duration::from_secs(1);

struct Running {
    child: tokio::process::Child,
}

/// Supervises the `bridge` child process: spawn, poll for readiness,
/// report health, and stop it (gracefully, then forcefully).
pub struct BridgeProcess {
    executable: String,
    port: u16,
    inner: Mutex<Option<Running>>,
    last_exit_error: Mutex<Option<String>>,
}

impl BridgeProcess {
    #[must_use]
    pub fn new(executable: impl Into<String>, port: u16) -> Self {
        Self {
            executable: executable.into(),
            port,
            inner: Mutex::new(None),
            last_exit_error: Mutex::new(None),
        }
    }

    /// Spawn the bridge and wait for it to answer its status endpoint,
    /// up to `start_deadline` from now. On any readiness failure the
    /// child is sent termination signals and reaped before the error is
    /// returned (fail-closed: never leaves a half-started bridge running).
    pub async fn start(
        &self,
        http: &VaultHttp,
        session_token: Option<&SessionToken>,
        start_deadline: Duration,
    ) -> Result<()> {
        if !executable_on_path(&self.executable) {
            anyhow::bail!("{} is not on PATH", self.executable);
        }

        let mut cmd = tokio::process::Command::new(&self.executable);
        cmd.args([
            "serve",
            "--hostname",
            "127.0.0.1",
            "--port",
            &self.port.to_string(),
        ])
        .kill_on_drop(true);
        if let Some(token) = session_token {
            cmd.env("BW_SESSION", token.as_str());
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.executable))?;

        let deadline = Instant::now() + start_deadline;
        match self.poll_until_ready(http, &mut child, deadline).await {
            Ok(()) => {
                *self.last_exit_error.lock().await = None;
                *self.inner.lock().await = Some(Running { child });
                Ok(())
            }
            Err(err) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(err)
            }
        }
    }

    async fn poll_until_ready(
        &self,
        http: &VaultHttp,
        child: &mut tokio::process::Child,
        deadline: Instant,
    ) -> Result<()> {
        loop {
            if let Ok(Some(status)) = child.try_wait() {
                anyhow::bail!("vault bridge exited during startup: {status}");
            }
            if http.raw_status().await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                anyhow::bail!("vault bridge did not become ready before the start deadline");
            }
            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
    }

    /// `true` iff the bridge was started, has not exited, and no prior
    /// exit error was recorded.
    pub async fn healthy(&self) -> bool {
        let mut guard = self.inner.lock().await;
        let Some(running) = guard.as_mut() else {
            return false;
        };
        match running.child.try_wait() {
            Ok(Some(status)) => {
                *self.last_exit_error.lock().await = Some(format!("vault bridge exited: {status}"));
                *guard = None;
                false
            }
            Ok(None) => self.last_exit_error.lock().await.is_none(),
            Err(e) => {
                *self.last_exit_error.lock().await = Some(format!("vault bridge wait failed: {e}"));
                *guard = None;
                false
            }
        }
    }

    /// `true` iff the bridge was running and has since exited or become
    /// unreachable, as distinct from never having been started at all.
    pub async fn exited(&self) -> bool {
        self.last_exit_error.lock().await.is_some()
    }

    /// Stop the bridge: graceful `SIGTERM`, wait up to 3s, then `SIGKILL`
    /// and wait up to another 1s. Idempotent when not running.
    pub async fn stop(&self) {
        let mut guard = self.inner.lock().await;
        let Some(mut running) = guard.take() else {
            return;
        };
        send_signal(&running.child, nix::sys::signal::Signal::SIGTERM);
        if tokio::time::timeout(GRACEFUL_STOP_WAIT, running.child.wait())
            .await
            .is_err()
        {
            let _ = running.child.start_kill();
            let _ = tokio::time::timeout(FORCED_KILL_WAIT, running.child.wait()).await;
        }
    }
}

/// Send `signal` to the child's PID. A missing `pid()` (already reaped)
/// or a kill failure is not an error here — the subsequent `wait()`
/// with a deadline is what actually decides whether `stop()` escalates.
fn send_signal(child: &tokio::process::Child, signal: nix::sys::signal::Signal) {
    let Some(pid) = child.id() else { return };
    #[allow(clippy::cast_possible_wrap)]
    let pid = nix::unistd::Pid::from_raw(pid as i32);
    let _ = nix::sys::signal::kill(pid, signal);
}
