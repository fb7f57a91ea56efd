//! `bitwarden-keyringd` — a per-user credential broker bridging a desktop
//! session to a Bitwarden vault over a secret-storage endpoint and an SSH
//! agent socket.
//!
//! Layered the way the `cli` crate's `domain` / `application::ports` /
//! `infra` split separates pure types from capability traits from their
//! concrete (filesystem/network/process) implementations: `keyring-common`
//! holds the pure domain vocabulary, `process`/`transport` are the two
//! low-level I/O ports every higher module is built on, and `vault`/`ssh`/
//! `prompt`/`session` compose them into the daemon's actual behaviour.
//! `main.rs` is the only place that wires a `DaemonConfig` into a running
//! component graph.

pub mod config;
pub mod process;
pub mod prompt;
pub mod secretservice;
pub mod session;
pub mod ssh;
pub mod transport;
pub mod vault;
