//! SSH key materialiser (spec §4.G) — turns vault items carrying SSH
//! key material into signers the agent facade can use.
//!
//! Grounded on `examples/other_examples/manifests/ahmadzein-passman`
//! (a password manager with SSH support, depending on `russh-keys`
//! directly) and `warp-tech-warpgate`'s `russh` dependency — rather than
//! hand-rolling PEM/OpenSSH key parsing, we lean on the crate that
//! already speaks every format the vault might hand back.

use keyring_common::{CoreError, VaultItem};
use russh_keys::key::{KeyPair, PublicKey};

/// A vault SSH-key item, successfully parsed into a usable key pair.
pub struct SshKeyItem {
    pub item_id: String,
    pub comment: String,
    pub key_pair: KeyPair,
    pub public_key: PublicKey,
}

impl SshKeyItem {
    #[must_use]
    pub fn public_key_blob(&self) -> Vec<u8> {
        self.public_key.public_key_bytes()
    }
}

/// Parse one item's `private_key_pem` into a signer. `passphrase` is
/// only consulted for encrypted PEMs.
pub fn parse_ssh_key(item: &VaultItem, passphrase: Option<&str>) -> Result<SshKeyItem, CoreError> {
    if !item.is_ssh_key() {
        return Err(CoreError::InvalidKey(format!(
            "item {} is not an ssh-key item",
            item.id
        )));
    }
    let fields = item
        .ssh_key
        .as_ref()
        .expect("is_ssh_key() guarantees ssh_key is Some");

    let key_pair = russh_keys::decode_secret_key(&fields.private_key_pem, passphrase)
        .map_err(|e| CoreError::InvalidKey(format!("{}: {e}", item.id)))?;
    let public_key = key_pair
        .clone_public_key()
        .map_err(|e| CoreError::InvalidKey(format!("{}: {e}", item.id)))?;

    Ok(SshKeyItem {
        item_id: item.id.clone(),
        comment: item.name.clone(),
        key_pair,
        public_key,
    })
}

/// Parse every SSH-key item in `items`. A single bad key never hides
/// the good ones: successes and per-item `(name, cause)` failures are
/// returned side by side.
pub fn list_ssh_keys(items: &[VaultItem]) -> (Vec<SshKeyItem>, Vec<(String, String)>) {
    let mut parsed = Vec::new();
    let mut errors = Vec::new();
    for item in items {
        if !item.is_ssh_key() {
            continue;
        }
        match parse_ssh_key(item, None) {
            Ok(key) => parsed.push(key),
            Err(e) => errors.push((item.name.clone(), e.to_string())),
        }
    }
    (parsed, errors)
}

/// Compare marshalled public-key bytes for equality — no fingerprint
/// comparison is substituted, since two different keys can share a
/// fingerprint collision space far more easily than they can share
/// wire bytes.
#[must_use]
pub fn find_by_public_key<'a>(
    keys: &'a [SshKeyItem],
    public_key_blob: &[u8],
) -> Option<&'a SshKeyItem> {
    keys.iter()
        .find(|key| key.public_key_blob() == public_key_blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyring_common::{SshKeyFields, VaultItemType};

    fn login_item() -> VaultItem {
        VaultItem {
            id: "1".into(),
            name: "not an ssh key".into(),
            item_type: VaultItemType::Login,
            ssh_key: None,
            raw: serde_json::Map::new(),
        }
    }

    fn malformed_ssh_item() -> VaultItem {
        VaultItem {
            id: "2".into(),
            name: "broken".into(),
            item_type: VaultItemType::SshKey,
            ssh_key: Some(SshKeyFields {
                private_key_pem: "not a real key".into(),
                public_key_authorised: None,
                fingerprint: None,
            }),
            raw: serde_json::Map::new(),
        }
    }

    #[test]
    fn rejects_a_non_ssh_key_item() {
        let err = parse_ssh_key(&login_item(), None).expect_err("must reject");
        assert!(matches!(err, CoreError::InvalidKey(_)));
    }

    #[test]
    fn a_malformed_key_is_reported_without_panicking() {
        let err = parse_ssh_key(&malformed_ssh_item(), None).expect_err("must fail to parse");
        assert!(matches!(err, CoreError::InvalidKey(_)));
    }

    #[test]
    fn list_ssh_keys_collects_errors_without_hiding_good_keys() {
        let items = vec![login_item(), malformed_ssh_item()];
        let (parsed, errors) = list_ssh_keys(&items);
        assert!(parsed.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "broken");
    }

    #[test]
    fn find_by_public_key_returns_none_on_an_empty_list() {
        assert!(find_by_public_key(&[], b"anything").is_none());
    }
}
