//! `CommandRunner` port — spawning helper executables and the vault bridge
//! with a guaranteed timeout-and-kill, shared by `prompt::helpers` and
//! `vault::bridge`.
//!
//! Grounded on `cli/src/application/ports.rs`'s `CommandRunner` trait and
//! `cli/src/infra/command_runner.rs`'s `TokioCommandRunner`: `tokio::select!`
//! races the child against a timer and kills it explicitly, since dropping a
//! timed-out future alone does not reap the process on every platform.

use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;

#[allow(async_fn_in_trait)]
pub trait CommandRunner: Send + Sync {
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output>;

    /// Spawn without waiting — used by the vault bridge supervisor, which
    /// owns the child's lifetime directly rather than through one call.
    fn spawn(&self, program: &str, args: &[&str]) -> Result<tokio::process::Child>;
}

pub struct TokioCommandRunner;

async fn collect_output(
    child: &mut tokio::process::Child,
    stdout: &mut Option<tokio::process::ChildStdout>,
    stderr: &mut Option<tokio::process::ChildStderr>,
    program: &str,
) -> Result<Output> {
    let (status, out, err) = tokio::join!(
        child.wait(),
        async {
            let mut buf = Vec::new();
            if let Some(h) = stdout {
                let _ = h.read_to_end(&mut buf).await;
            }
            buf
        },
        async {
            let mut buf = Vec::new();
            if let Some(h) = stderr {
                let _ = h.read_to_end(&mut buf).await;
            }
            buf
        },
    );
    Ok(Output {
        status: status.with_context(|| format!("waiting for {program}"))?,
        stdout: out,
        stderr: err,
    })
}

impl CommandRunner for TokioCommandRunner {
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output> {
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        tokio::select! {
            result = collect_output(&mut child, &mut stdout, &mut stderr, program) => result,
            () = tokio::time::sleep(timeout) => {
                let _ = child.kill().await;
                anyhow::bail!("{program} timed out after {}s", timeout.as_secs())
            }
        }
    }

    fn spawn(&self, program: &str, args: &[&str]) -> Result<tokio::process::Child> {
        tokio::process::Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))
    }
}

/// `which`-style `PATH` lookup, used by every provider's `probe()`.
#[must_use]
pub fn executable_on_path(name: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| {
        let candidate = dir.join(name);
        candidate.is_file() && is_executable(&candidate)
    })
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &std::path::Path) -> bool {
    true
}
