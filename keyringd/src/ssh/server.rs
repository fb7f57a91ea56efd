//! SSH agent socket server (spec §4.H) — socket placement, stale-socket
//! reclamation, the accept loop, and graceful shutdown.
//!
//! Socket-directory tightening is grounded on `cli/src/ssh.rs`'s
//! `KnownHostsManager` (`lstat`, reject symlink, `set_permissions`),
//! generalized from "a known_hosts file" to "a listening socket's
//! parent directory that must also reject group/world access".

use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keyring_common::CoreError;
use nix::unistd::geteuid;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::keyring::KeyRing;
use super::wire;

type TrackedConnection = (CancellationToken, JoinHandle<()>);

pub struct SshAgentServer {
    socket_path: PathBuf,
    keyring: Arc<KeyRing>,
    shutdown: CancellationToken,
    connections: Arc<Mutex<Vec<TrackedConnection>>>,
    started: Mutex<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl SshAgentServer {
    #[must_use]
    pub fn new(socket_path: PathBuf, keyring: Arc<KeyRing>) -> Self {
        Self {
            socket_path,
            keyring,
            shutdown: CancellationToken::new(),
            connections: Arc::new(Mutex::new(Vec::new())),
            started: Mutex::new(false),
            accept_task: Mutex::new(None),
        }
    }

    /// `$XDG_RUNTIME_DIR/bitwarden-keyring/ssh.sock`, falling back to
    /// `/tmp/bitwarden-keyring-<uid>/ssh.sock` when the runtime
    /// directory isn't set (per §6's on-disk layout).
    #[must_use]
    pub fn default_socket_path() -> PathBuf {
        match std::env::var_os("XDG_RUNTIME_DIR") {
            Some(runtime_dir) => PathBuf::from(runtime_dir)
                .join("bitwarden-keyring")
                .join("ssh.sock"),
            None => {
                let uid = geteuid().as_raw();
                PathBuf::from(format!("/tmp/bitwarden-keyring-{uid}")).join("ssh.sock")
            }
        }
    }

    pub async fn start(&self) -> Result<(), CoreError> {
        let parent = self.socket_path.parent().ok_or_else(|| {
            CoreError::InsecureSocketDir("socket path has no parent directory".to_string())
        })?;
        prepare_socket_dir(parent)?;
        reclaim_stale_socket(&self.socket_path).await?;

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| {
            CoreError::ProtocolError(format!("binding {}: {e}", self.socket_path.display()))
        })?;
        if let Err(e) = set_mode(&self.socket_path, 0o600) {
            drop(listener);
            let _ = std::fs::remove_file(&self.socket_path);
            return Err(e);
        }

        *self.started.lock().await = true;
        let shutdown = self.shutdown.clone();
        let keyring = self.keyring.clone();
        let connections = self.connections.clone();
        let handle = tokio::spawn(accept_loop(listener, shutdown, keyring, connections));
        *self.accept_task.lock().await = Some(handle);
        Ok(())
    }

    /// Idempotent. Cancels the accept loop, force-closes every tracked
    /// connection, waits for all handlers to exit, and unlinks the
    /// socket file.
    pub async fn stop(&self) {
        let mut started = self.started.lock().await;
        if !*started {
            return;
        }
        self.shutdown.cancel();

        if let Some(handle) = self.accept_task.lock().await.take() {
            let _ = handle.await;
        }

        let tracked = std::mem::take(&mut *self.connections.lock().await);
        for (token, handle) in tracked {
            token.cancel();
            let _ = handle.await;
        }

        let _ = std::fs::remove_file(&self.socket_path);
        *started = false;
    }
}

async fn accept_loop(
    listener: UnixListener,
    shutdown: CancellationToken,
    keyring: Arc<KeyRing>,
    connections: Arc<Mutex<Vec<TrackedConnection>>>,
) {
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let child_token = shutdown.child_token();
                        let keyring = keyring.clone();
                        let handle_token = child_token.clone();
                        let handle = tokio::spawn(async move {
                            serve_connection(stream, handle_token, keyring).await;
                        });
                        connections.lock().await.push((child_token, handle));
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "ssh agent accept failed");
                    }
                }
            }
        }
    }
}

async fn serve_connection(mut stream: UnixStream, token: CancellationToken, keyring: Arc<KeyRing>) {
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            message = wire::read_message(&mut stream) => {
                let Ok((msg_type, payload)) = message else { return };
                let (response_type, response_payload) = keyring.handle(msg_type, &payload).await;
                if wire::write_message(&mut stream, response_type, &response_payload)
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}

/// Create `dir` mode `0700` if absent, then validate it: reject
/// symlinks, require ownership by the current EUID, require no
/// group-/world-accessible bits — tightening to `0700` once if the
/// bits are loose, and re-checking afterward.
fn prepare_socket_dir(dir: &Path) -> Result<(), CoreError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| {
            CoreError::InsecureSocketDir(format!("creating {}: {e}", dir.display()))
        })?;
        set_mode(dir, 0o700)?;
    }

    let meta = std::fs::symlink_metadata(dir).map_err(|e| {
        CoreError::InsecureSocketDir(format!("stat {}: {e}", dir.display()))
    })?;
    if meta.file_type().is_symlink() {
        return Err(CoreError::InsecureSocketDir(format!(
            "{} is a symlink, refusing to use it as the agent socket directory",
            dir.display()
        )));
    }
    if !meta.file_type().is_dir() {
        return Err(CoreError::InsecureSocketDir(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let euid = geteuid().as_raw();
    if meta.uid() != euid {
        return Err(CoreError::InsecureSocketDir(format!(
            "{} is not owned by the current user",
            dir.display()
        )));
    }

    if meta.mode() & 0o077 != 0 {
        set_mode(dir, 0o700)?;
        let rechecked = std::fs::symlink_metadata(dir).map_err(|e| {
            CoreError::InsecureSocketDir(format!("stat {}: {e}", dir.display()))
        })?;
        if rechecked.mode() & 0o077 != 0 {
            return Err(CoreError::InsecureSocketDir(format!(
                "{} remains group- or world-accessible after tightening permissions",
                dir.display()
            )));
        }
    }
    Ok(())
}

/// If `path` exists: refuse if it is not a socket; attempt a dial — on
/// success the socket is in use (`SocketExists`); on dial failure,
/// unlink the stale node and proceed.
async fn reclaim_stale_socket(path: &Path) -> Result<(), CoreError> {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return Ok(());
    };
    if !(meta.file_type().is_socket() || meta.file_type().is_symlink()) {
        return Err(CoreError::NotSocket);
    }
    match UnixStream::connect(path).await {
        Ok(_) => Err(CoreError::SocketExists),
        Err(_) => std::fs::remove_file(path).map_err(|e| {
            CoreError::ProtocolError(format!("removing stale socket {}: {e}", path.display()))
        }),
    }
}

fn set_mode(path: &Path, mode: u32) -> Result<(), CoreError> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        CoreError::ProtocolError(format!("setting permissions on {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prepare_socket_dir_creates_a_private_directory() {
        let base = tempfile::TempDir::new().expect("tempdir");
        let target = base.path().join("agent-dir");
        prepare_socket_dir(&target).expect("should create and validate");
        let meta = std::fs::symlink_metadata(&target).expect("meta");
        assert_eq!(meta.mode() & 0o777, 0o700);
    }

    #[tokio::test]
    async fn prepare_socket_dir_tightens_a_loose_existing_directory() {
        let base = tempfile::TempDir::new().expect("tempdir");
        let target = base.path().join("agent-dir");
        std::fs::create_dir_all(&target).expect("mkdir");
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o777)).expect("chmod");
        prepare_socket_dir(&target).expect("should tighten");
        let meta = std::fs::symlink_metadata(&target).expect("meta");
        assert_eq!(meta.mode() & 0o077, 0);
    }

    #[tokio::test]
    async fn prepare_socket_dir_rejects_a_symlinked_directory() {
        let base = tempfile::TempDir::new().expect("tempdir");
        let real = base.path().join("real-dir");
        std::fs::create_dir_all(&real).expect("mkdir");
        let link = base.path().join("link-dir");
        std::os::unix::fs::symlink(&real, &link).expect("symlink");
        let err = prepare_socket_dir(&link).expect_err("symlink must be rejected");
        assert!(matches!(err, CoreError::InsecureSocketDir(_)));
    }

    #[tokio::test]
    async fn reclaim_stale_socket_removes_an_unconnectable_socket() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("agent.sock");
        {
            let listener = std::os::unix::net::UnixListener::bind(&path).expect("bind");
            drop(listener);
        }
        assert!(path.exists());
        reclaim_stale_socket(&path).await.expect("should reclaim");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn reclaim_stale_socket_is_a_noop_when_nothing_exists() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("agent.sock");
        reclaim_stale_socket(&path).await.expect("should be a no-op");
    }

    #[tokio::test]
    async fn reclaim_stale_socket_refuses_a_regular_file() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("not-a-socket");
        std::fs::write(&path, b"hi").expect("write");
        let err = reclaim_stale_socket(&path).await.expect_err("must reject");
        assert!(matches!(err, CoreError::NotSocket));
    }

    #[tokio::test]
    async fn reclaim_stale_socket_reports_an_in_use_socket() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&path).expect("bind");

        let err = reclaim_stale_socket(&path).await.expect_err("must reject");
        assert!(matches!(err, CoreError::SocketExists));
        drop(listener);
    }
}
