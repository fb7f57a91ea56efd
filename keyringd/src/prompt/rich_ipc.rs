//! The rich-IPC prompt provider (spec §4.C) — a single persistent UNIX
//! socket connection that can drive the whole retry loop without
//! re-prompting from scratch: request, password, unlock attempt,
//! result, and (if the vault rejected it) a retry on the same cookie.
//!
//! Socket placement is validated the same way
//! `cli/src/ssh.rs`'s `KnownHostsManager` tightens its own directory:
//! `lstat`, reject symlinks, require the expected file type, and here
//! additionally require single-owner permissions, since this socket
//! carries a plaintext master password.

use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::unistd::geteuid;
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;

use super::protocol::{new_cookie, PromptOutcome, PromptRequest, PromptResponse, UnlockResult};
use super::{PromptProvider, ProviderError};
use crate::transport::{FrameEvent, FramedConnection};

/// Connects to a long-lived companion process (e.g. a desktop shell
/// widget) over a UNIX socket and speaks the two-phase retry protocol.
pub struct RichIpcProvider {
    socket_path: PathBuf,
    timeout: Duration,
}

impl RichIpcProvider {
    #[must_use]
    pub fn new(socket_path: PathBuf, timeout: Duration) -> Self {
        Self {
            socket_path,
            timeout,
        }
    }

    async fn connect(&self) -> Result<FramedConnection, ProviderError> {
        validate_socket_path(&self.socket_path).map_err(ProviderError::Failure)?;
        let stream = tokio::time::timeout(
            Duration::from_secs(2),
            UnixStream::connect(&self.socket_path),
        )
        .await
        .map_err(|_| ProviderError::Failure("rich-ipc connect timed out".to_string()))?
        .map_err(|e| ProviderError::Failure(format!("rich-ipc connect failed: {e}")))?;
        Ok(FramedConnection::new(stream))
    }

    /// Open the conversation: send the first request and wait for the
    /// first password.
    pub async fn open_session(
        &self,
        token: &CancellationToken,
        title: &str,
        message: &str,
    ) -> Result<(String, RichIpcSession), ProviderError> {
        let mut conn = self.connect().await?;
        let cookie = new_cookie();
        let request = PromptRequest::new(cookie.clone(), title, message);
        conn.write_frame(&request)
            .await
            .map_err(|e| ProviderError::Failure(format!("writing prompt request: {e}")))?;

        let password = read_password(&mut conn, &cookie, token, self.timeout).await?;
        Ok((
            password,
            RichIpcSession {
                conn,
                cookie,
                timeout: self.timeout,
            },
        ))
    }
}

impl PromptProvider for RichIpcProvider {
    fn name(&self) -> &'static str {
        "rich-ipc"
    }

    async fn probe(&self) -> bool {
        validate_socket_path(&self.socket_path).is_ok()
    }

    async fn prompt(
        &self,
        token: &CancellationToken,
        title: &str,
        message: &str,
    ) -> Result<String, ProviderError> {
        let (password, _session) = self.open_session(token, title, message).await?;
        Ok(password)
    }
}

/// An open conversation with the rich-IPC peer. Reused across retry
/// attempts: the unlock coordinator reports each attempt's outcome and,
/// if told to retry, waits on the same connection for the next password.
pub struct RichIpcSession {
    conn: FramedConnection,
    cookie: String,
    timeout: Duration,
}

impl RichIpcSession {
    pub async fn send_result(&mut self, success: bool, error: &str, retry: bool) {
        let result = UnlockResult {
            cookie: self.cookie.clone(),
            success,
            error: error.to_string(),
            retry,
        };
        // Best-effort: a closed peer at this point just means no retry
        // round-trip is possible — the caller's session already reflects that.
        let _ = self.conn.write_frame(&result).await;
    }

    pub async fn wait_for_retry(
        &mut self,
        token: &CancellationToken,
    ) -> Result<String, ProviderError> {
        let cookie = self.cookie.clone();
        read_password(&mut self.conn, &cookie, token, self.timeout).await
    }
}

async fn read_password(
    conn: &mut FramedConnection,
    cookie: &str,
    token: &CancellationToken,
    timeout: Duration,
) -> Result<String, ProviderError> {
    let deadline = tokio::time::Instant::now() + timeout;
    match conn.read_frame::<PromptResponse>(token, deadline).await {
        FrameEvent::Frame(response) => {
            if response.cookie != cookie {
                return Err(ProviderError::Failure(
                    "rich-ipc response cookie mismatch".to_string(),
                ));
            }
            match response.result {
                PromptOutcome::Cancelled => Err(ProviderError::Cancelled),
                PromptOutcome::Ok => response.password.ok_or_else(|| {
                    ProviderError::Failure("rich-ipc response missing password".to_string())
                }),
                PromptOutcome::Confirmed => Err(ProviderError::Failure(
                    "rich-ipc sent a confirmation, not a password".to_string(),
                )),
            }
        }
        FrameEvent::Cancelled => Err(ProviderError::Cancelled),
        FrameEvent::DeadlineExceeded => {
            Err(ProviderError::Failure("rich-ipc prompt timed out".to_string()))
        }
        FrameEvent::Eof => Err(ProviderError::Failure(
            "rich-ipc peer closed the connection".to_string(),
        )),
    }
}

/// `lstat` both the socket and its parent directory: neither may be a
/// symlink, the socket must actually be a socket, both must be owned by
/// the calling user, and neither may be group- or world-writable.
fn validate_socket_path(path: &Path) -> Result<(), String> {
    let parent = path
        .parent()
        .ok_or_else(|| "socket path has no parent directory".to_string())?;
    check_owned_and_private(parent, true)?;
    check_owned_and_private(path, false)?;
    Ok(())
}

fn check_owned_and_private(path: &Path, expect_dir: bool) -> Result<(), String> {
    let meta = std::fs::symlink_metadata(path)
        .map_err(|e| format!("cannot stat {}: {e}", path.display()))?;
    if meta.file_type().is_symlink() {
        return Err(format!("{} is a symlink, refusing to use it", path.display()));
    }
    if expect_dir {
        if !meta.file_type().is_dir() {
            return Err(format!("{} is not a directory", path.display()));
        }
    } else if !meta.file_type().is_socket() {
        return Err(format!("{} is not a socket", path.display()));
    }
    let euid = geteuid().as_raw();
    if meta.uid() != euid {
        return Err(format!("{} is not owned by the current user", path.display()));
    }
    let mode = std::fs::Permissions::from_mode(meta.mode()).mode();
    if mode & 0o022 != 0 {
        return Err(format!(
            "{} is group- or world-writable, refusing to use it",
            path.display()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_a_symlinked_socket() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let real = dir.path().join("real.sock");
        std::os::unix::net::UnixListener::bind(&real).expect("bind");
        let link = dir.path().join("link.sock");
        std::os::unix::fs::symlink(&real, &link).expect("symlink");

        let err = validate_socket_path(&link).expect_err("symlink must be rejected");
        assert!(err.contains("symlink"));
    }

    #[test]
    fn rejects_a_world_writable_parent_directory() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o777))
            .expect("chmod");
        let sock_path = dir.path().join("bridge.sock");
        std::os::unix::net::UnixListener::bind(&sock_path).expect("bind");

        let err = validate_socket_path(&sock_path).expect_err("world-writable dir must be rejected");
        assert!(err.contains("writable"));
    }

    #[test]
    fn rejects_a_regular_file_in_place_of_a_socket() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("not-a-socket");
        std::fs::write(&path, b"hi").expect("write");

        let err = validate_socket_path(&path).expect_err("regular file must be rejected");
        assert!(err.contains("not a socket"));
    }

    #[test]
    fn accepts_a_private_socket_in_a_private_directory() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700))
            .expect("chmod");
        let path = dir.path().join("bridge.sock");
        std::os::unix::net::UnixListener::bind(&path).expect("bind");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).expect("chmod");

        validate_socket_path(&path).expect("should validate cleanly");
    }
}
