//! Shared, I/O-free domain types for the `bitwarden-keyring` daemon.
//!
//! Anything in this crate must stay free of filesystem, network, or process
//! access — it is the vocabulary that `keyringd`'s components (and, in
//! principle, an out-of-process secret-storage front-end) share.

pub mod error;
pub mod session;
pub mod types;

pub use error::CoreError;
pub use session::SessionToken;
pub use types::{SshKeyFields, VaultItem, VaultItemType, VaultStatus};
