//! Session store (spec §4.B) — the master-session token lifecycle.
//!
//! Grounded on `cli/src/infra/state.rs`'s `StateManager`: synchronous
//! load/save wrapped in `spawn_blocking`, `0600`/`0700` permissions via
//! `std::os::unix::fs::PermissionsExt`, a `with_path` constructor for test
//! injection. The symlink-rejection load contract is new (spec-only).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use keyring_common::SessionToken;
use tokio::sync::RwLock;

/// `memory` (default) or `file`, selected at construction (`--session-store`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Memory,
    File,
}

/// Holds the current session token in memory, optionally backed by a
/// private file on disk. Read/written under a reader-writer lock per
/// spec §5; persisted writes happen outside the lock (best-effort).
pub struct SessionStore {
    mode: Mode,
    path: PathBuf,
    token: RwLock<Option<SessionToken>>,
}

impl SessionStore {
    /// Construct a store. If `BW_SESSION` is set, it seeds the initial
    /// token and is never persisted (spec §4.B environment override).
    pub fn new(mode: Mode, path: PathBuf) -> Self {
        let seeded = std::env::var("BW_SESSION").ok().map(SessionToken::new);
        Self {
            mode,
            path,
            token: RwLock::new(seeded),
        }
    }

    /// Default per-user path: `<user-config>/bitwarden-keyring/session`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bitwarden-keyring")
            .join("session")
    }

    /// Load the on-disk token, if any, into memory. A no-op in memory mode
    /// (never touches the filesystem) and when `BW_SESSION` already seeded
    /// the store.
    pub async fn load(&self) {
        if self.token.read().await.is_some() {
            return;
        }
        if self.mode != Mode::File {
            return;
        }
        let path = self.path.clone();
        let loaded = tokio::task::spawn_blocking(move || load_sync(&path))
            .await
            .unwrap_or(None);
        if let Some(token) = loaded {
            *self.token.write().await = Some(token);
        }
    }

    /// Current token, if any.
    pub async fn get(&self) -> Option<SessionToken> {
        self.token.read().await.clone()
    }

    /// Store a new token. Persists to disk in file mode (best-effort: I/O
    /// failure is silently absorbed, the in-memory copy stays authoritative).
    pub async fn set(&self, token: SessionToken) {
        {
            let mut guard = self.token.write().await;
            *guard = Some(token.clone());
        }
        if self.mode == Mode::File {
            let path = self.path.clone();
            let raw = token.into_string();
            let _ = tokio::task::spawn_blocking(move || save_sync(&path, &raw)).await;
        }
    }

    /// Clear the session. Zeros the in-memory copy; in file mode removes
    /// the file; in memory mode never touches the file path even if one
    /// exists there.
    pub async fn clear(&self) {
        *self.token.write().await = None;
        if self.mode == Mode::File {
            let path = self.path.clone();
            let _ = tokio::task::spawn_blocking(move || std::fs::remove_file(&path)).await;
        }
    }
}

/// `lstat` the path; refuse to read through a symlink (treated as "no
/// session", not an error); on a regular file, read and trim whitespace.
fn load_sync(path: &Path) -> Option<SessionToken> {
    let meta = std::fs::symlink_metadata(path).ok()?;
    if meta.file_type().is_symlink() {
        return None;
    }
    if !meta.file_type().is_file() {
        return None;
    }
    let content = std::fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(SessionToken::new(trimmed.to_string()))
    }
}

fn save_sync(path: &Path, raw: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
        set_permissions(parent, 0o700)?;
    }
    std::fs::write(path, raw).with_context(|| format!("writing {}", path.display()))?;
    set_permissions(path, 0o600)?;
    Ok(())
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("setting permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn store_in(dir: &tempfile::TempDir) -> SessionStore {
        SessionStore::new(Mode::File, dir.path().join("session"))
    }

    #[tokio::test]
    #[serial_test::serial(bw_session_env)]
    async fn set_then_get_returns_the_same_token() {
        std::env::remove_var("BW_SESSION");
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        store.set(SessionToken::new("abc".to_string())).await;
        assert_eq!(store.get().await.expect("token").as_str(), "abc");
    }

    #[tokio::test]
    #[serial_test::serial(bw_session_env)]
    async fn file_mode_writes_a_regular_file_mode_0600() {
        std::env::remove_var("BW_SESSION");
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        store.set(SessionToken::new("abc".to_string())).await;

        let path = dir.path().join("session");
        let meta = std::fs::symlink_metadata(&path).expect("metadata");
        assert!(!meta.file_type().is_symlink());
        assert!(meta.file_type().is_file());
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[tokio::test]
    #[serial_test::serial(bw_session_env)]
    async fn clear_removes_the_file_in_file_mode() {
        std::env::remove_var("BW_SESSION");
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        store.set(SessionToken::new("abc".to_string())).await;
        store.clear().await;
        assert!(!dir.path().join("session").exists());
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    #[serial_test::serial(bw_session_env)]
    async fn memory_mode_never_creates_a_file() {
        std::env::remove_var("BW_SESSION");
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("session");
        let store = SessionStore::new(Mode::Memory, path.clone());
        store.set(SessionToken::new("abc".to_string())).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    #[serial_test::serial(bw_session_env)]
    async fn memory_mode_ignores_a_preexisting_file_on_load() {
        std::env::remove_var("BW_SESSION");
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("session");
        std::fs::write(&path, "stale").expect("seed file");
        let store = SessionStore::new(Mode::Memory, path);
        store.load().await;
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    #[serial_test::serial(bw_session_env)]
    async fn load_rejects_a_symlinked_session_file() {
        std::env::remove_var("BW_SESSION");
        let dir = tempfile::TempDir::new().expect("tempdir");
        let real = dir.path().join("real");
        std::fs::write(&real, "secret").expect("seed");
        let link = dir.path().join("session");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&real, &link).expect("symlink");

        let store = SessionStore::new(Mode::File, link);
        store.load().await;
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    #[serial_test::serial(bw_session_env)]
    async fn bw_session_env_seeds_without_persisting() {
        std::env::set_var("BW_SESSION", "env-token");
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        assert_eq!(store.get().await.expect("seeded").as_str(), "env-token");
        std::env::remove_var("BW_SESSION");
        assert!(!dir.path().join("session").exists());
    }
}
