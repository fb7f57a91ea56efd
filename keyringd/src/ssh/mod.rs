//! SSH agent components (spec §4.G–§4.I): the key materialiser, the
//! agent wire protocol, the socket server, and the key-ring facade that
//! ties them to the vault client.

pub mod keyring;
pub mod keys;
pub mod server;
pub mod wire;
