//! Key-ring facade (spec §4.I) — the classical SSH agent operations,
//! table implemented verbatim, dispatched from the wire protocol in
//! `ssh::server`/`ssh::wire`.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use keyring_common::{CoreError, VaultStatus};
use russh_keys::key::{KeyPair, SignatureHash};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::keys::{find_by_public_key, list_ssh_keys, SshKeyItem};
use super::wire::{self, Cursor};
use crate::secretservice::{OpContext, SecretBackend};
use crate::vault::VaultClient;

pub struct KeyRing {
    vault: Arc<VaultClient>,
    cache: RwLock<Vec<SshKeyItem>>,
    root_token: CancellationToken,
}

impl KeyRing {
    #[must_use]
    pub fn new(vault: Arc<VaultClient>, root_token: CancellationToken) -> Self {
        Self {
            vault,
            cache: RwLock::new(Vec::new()),
            root_token,
        }
    }

    /// `List` — refresh the SSH key cache from the vault and return
    /// public keys with comments taken from `item.name`.
    pub async fn list(&self) -> Result<Vec<(Vec<u8>, String)>, CoreError> {
        self.ensure_vault_unlocked().await?;
        self.refresh().await?;
        let cache = self.cache.read().await;
        Ok(cache
            .iter()
            .map(|k| (k.public_key_blob(), k.comment.clone()))
            .collect())
    }

    /// `Sign(pub, data, flags)` — locate the key by public-key bytes
    /// and sign. `flags` selects an RSA hash variant when the key
    /// supports it; otherwise the key's default algorithm is used.
    pub async fn sign(
        &self,
        public_key_blob: &[u8],
        data: &[u8],
        flags: u32,
    ) -> Result<Vec<u8>, CoreError> {
        self.ensure_vault_unlocked().await?;
        if self.cache.read().await.is_empty() {
            self.refresh().await?;
        }
        let cache = self.cache.read().await;
        let key = find_by_public_key(&cache, public_key_blob)
            .ok_or_else(|| CoreError::ProtocolError("no such key".to_string()))?;
        sign_with(&key.key_pair, data, flags)
    }

    /// `Lock(_)` — lock the vault and clear the cache. Passphrase is
    /// ignored; the vault has its own unlock flow.
    pub async fn lock(&self) -> Result<(), CoreError> {
        self.vault.lock().await?;
        self.cache.write().await.clear();
        Ok(())
    }

    /// `Unlock(_)` — drive the prompt pipeline via the vault's
    /// auto-unlock machinery, then refresh the cache.
    pub async fn unlock(&self) -> Result<(), CoreError> {
        let ctx = OpContext::new(self.root_token.clone());
        self.vault.unlock(&ctx).await?;
        self.refresh().await
    }

    /// `Add(added)` — reject duplicates by public-key comparison;
    /// otherwise create a new SSH-key vault item.
    ///
    /// Scoped to `ssh-ed25519` identities: the other classical agent
    /// key types (RSA, ECDSA) use type-specific private-key field
    /// encodings in the wire format this daemon does not parse.
    pub async fn add(&self, payload: &[u8]) -> Result<(), CoreError> {
        let mut cursor = Cursor::new(payload);
        let key_type = cursor
            .read_string()
            .map_err(CoreError::ProtocolError)?
            .to_vec();
        if key_type != b"ssh-ed25519" {
            return Err(CoreError::ProtocolError(
                "only ssh-ed25519 identities can be added".to_string(),
            ));
        }
        let public = cursor.read_string().map_err(CoreError::ProtocolError)?;
        let private_and_public = cursor.read_string().map_err(CoreError::ProtocolError)?;
        let comment = String::from_utf8_lossy(
            cursor.read_string().map_err(CoreError::ProtocolError)?,
        )
        .into_owned();

        if private_and_public.len() < 32 {
            return Err(CoreError::InvalidKey(
                "ed25519 private key material too short".to_string(),
            ));
        }
        let seed: [u8; 32] = private_and_public[..32]
            .try_into()
            .map_err(|_| CoreError::InvalidKey("ed25519 seed has the wrong length".to_string()))?;
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
        let key_pair = KeyPair::Ed25519(signing_key);

        let mut blob = Vec::new();
        wire::put_string(&mut blob, b"ssh-ed25519");
        wire::put_string(&mut blob, public);

        if self.cache.read().await.is_empty() {
            self.refresh().await?;
        }
        {
            let cache = self.cache.read().await;
            if find_by_public_key(&cache, &blob).is_some() {
                return Err(CoreError::ProtocolError(
                    "key is already present".to_string(),
                ));
            }
        }

        let private_key_pem = russh_keys::encode_pkcs8_pem(&key_pair)
            .map_err(|e| CoreError::InvalidKey(format!("encoding new key: {e}")))?;
        let public_key = key_pair
            .clone_public_key()
            .map_err(|e| CoreError::InvalidKey(format!("deriving public key: {e}")))?;
        let public_key_authorised = {
            let mut line = format!("ssh-ed25519 {}", BASE64.encode(&blob));
            if !comment.is_empty() {
                line.push(' ');
                line.push_str(&comment);
            }
            line
        };
        let fingerprint = format!("SHA256:{}", public_key.fingerprint());

        let ctx = OpContext::new(self.root_token.clone());
        self.vault
            .create_item_via_secret_backend(
                &ctx,
                &comment,
                &private_key_pem,
                &public_key_authorised,
                &fingerprint,
            )
            .await?;
        self.refresh().await
    }

    /// `Remove(pub)` — locate the matching cached item and delete it.
    pub async fn remove(&self, public_key_blob: &[u8]) -> Result<(), CoreError> {
        if self.cache.read().await.is_empty() {
            self.refresh().await?;
        }
        let item_id = {
            let cache = self.cache.read().await;
            find_by_public_key(&cache, public_key_blob)
                .map(|k| k.item_id.clone())
                .ok_or_else(|| CoreError::ProtocolError("no such key".to_string()))?
        };
        let token = self.root_token.clone();
        self.vault.delete_item(&token, &item_id).await?;
        self.refresh().await
    }

    /// `RemoveAll` — always fails, as a safety measure against
    /// catastrophic bulk deletion of vault keys.
    pub async fn remove_all(&self) -> Result<(), CoreError> {
        Err(CoreError::ProtocolError(
            "removing all identities is not supported".to_string(),
        ))
    }

    async fn ensure_vault_unlocked(&self) -> Result<(), CoreError> {
        if self.vault.status().await? != VaultStatus::Unlocked {
            return Err(CoreError::VaultLocked);
        }
        Ok(())
    }

    async fn refresh(&self) -> Result<(), CoreError> {
        let token = self.root_token.clone();
        let items = self.vault.list_items(&token).await?;
        let (parsed, _errors) = list_ssh_keys(&items);
        *self.cache.write().await = parsed;
        Ok(())
    }

    /// Dispatch one agent wire message; always returns a response
    /// message, never an error (agent protocol failures are themselves
    /// response messages — `SSH_AGENT_FAILURE`/`EXTENSION_FAILURE`).
    pub async fn handle(&self, msg_type: u8, payload: &[u8]) -> (u8, Vec<u8>) {
        match msg_type {
            wire::SSH_AGENTC_REQUEST_IDENTITIES => match self.list().await {
                Ok(keys) => (wire::SSH_AGENT_IDENTITIES_ANSWER, encode_identities(&keys)),
                Err(_) => (wire::SSH_AGENT_FAILURE, Vec::new()),
            },
            wire::SSH_AGENTC_SIGN_REQUEST => match decode_sign_request(payload) {
                Ok((key_blob, data, flags)) => match self.sign(&key_blob, &data, flags).await {
                    Ok(signature) => (wire::SSH_AGENT_SIGN_RESPONSE, encode_signature(&signature)),
                    Err(_) => (wire::SSH_AGENT_FAILURE, Vec::new()),
                },
                Err(_) => (wire::SSH_AGENT_FAILURE, Vec::new()),
            },
            wire::SSH_AGENTC_LOCK => match self.lock().await {
                Ok(()) => (wire::SSH_AGENT_SUCCESS, Vec::new()),
                Err(_) => (wire::SSH_AGENT_FAILURE, Vec::new()),
            },
            wire::SSH_AGENTC_UNLOCK => match self.unlock().await {
                Ok(()) => (wire::SSH_AGENT_SUCCESS, Vec::new()),
                Err(_) => (wire::SSH_AGENT_FAILURE, Vec::new()),
            },
            wire::SSH_AGENTC_ADD_IDENTITY => match self.add(payload).await {
                Ok(()) => (wire::SSH_AGENT_SUCCESS, Vec::new()),
                Err(_) => (wire::SSH_AGENT_FAILURE, Vec::new()),
            },
            wire::SSH_AGENTC_REMOVE_IDENTITY => {
                let mut cursor = Cursor::new(payload);
                match cursor.read_string() {
                    Ok(key_blob) => match self.remove(key_blob).await {
                        Ok(()) => (wire::SSH_AGENT_SUCCESS, Vec::new()),
                        Err(_) => (wire::SSH_AGENT_FAILURE, Vec::new()),
                    },
                    Err(_) => (wire::SSH_AGENT_FAILURE, Vec::new()),
                }
            }
            wire::SSH_AGENTC_REMOVE_ALL_IDENTITIES => {
                let _ = self.remove_all().await;
                (wire::SSH_AGENT_FAILURE, Vec::new())
            }
            wire::SSH_AGENTC_EXTENSION => (wire::SSH_AGENT_EXTENSION_FAILURE, Vec::new()),
            _ => (wire::SSH_AGENT_FAILURE, Vec::new()),
        }
    }
}

/// Maps `flags` to an RSA hash variant (per §4.I) before signing; any
/// other key type ignores `flags` entirely and signs with its one
/// algorithm.
fn sign_with(key_pair: &KeyPair, data: &[u8], flags: u32) -> Result<Vec<u8>, CoreError> {
    let signed = match (key_pair, desired_rsa_hash(flags)) {
        (KeyPair::RSA { key, .. }, Some(hash)) => {
            KeyPair::RSA { key: key.clone(), hash }.sign_detached(data)
        }
        _ => key_pair.sign_detached(data),
    };
    signed
        .map(|sig| sig.as_ref().to_vec())
        .map_err(|e| CoreError::ProtocolError(format!("signing failed: {e}")))
}

fn desired_rsa_hash(flags: u32) -> Option<SignatureHash> {
    if flags & wire::SSH_AGENT_RSA_SHA2_512 != 0 {
        Some(SignatureHash::SHA2_512)
    } else if flags & wire::SSH_AGENT_RSA_SHA2_256 != 0 {
        Some(SignatureHash::SHA2_256)
    } else {
        None
    }
}

fn encode_identities(keys: &[(Vec<u8>, String)]) -> Vec<u8> {
    let mut buf = Vec::new();
    #[allow(clippy::cast_possible_truncation)]
    wire::put_u32(&mut buf, keys.len() as u32);
    for (blob, comment) in keys {
        wire::put_string(&mut buf, blob);
        wire::put_string(&mut buf, comment.as_bytes());
    }
    buf
}

fn encode_signature(signature: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    wire::put_string(&mut buf, signature);
    buf
}

fn decode_sign_request(payload: &[u8]) -> Result<(Vec<u8>, Vec<u8>, u32), String> {
    let mut cursor = Cursor::new(payload);
    let key_blob = cursor.read_string()?.to_vec();
    let data = cursor.read_string()?.to_vec();
    let flags = cursor.read_u32()?;
    Ok((key_blob, data, flags))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_sign_request_reads_key_data_then_flags() {
        let mut buf = Vec::new();
        wire::put_string(&mut buf, b"keyblob");
        wire::put_string(&mut buf, b"signthis");
        wire::put_u32(&mut buf, wire::SSH_AGENT_RSA_SHA2_512);
        let (key, data, flags) = decode_sign_request(&buf).expect("decode");
        assert_eq!(key, b"keyblob");
        assert_eq!(data, b"signthis");
        assert_eq!(flags, wire::SSH_AGENT_RSA_SHA2_512);
    }

    #[test]
    fn desired_rsa_hash_prefers_sha2_512_over_sha2_256() {
        let flags = wire::SSH_AGENT_RSA_SHA2_256 | wire::SSH_AGENT_RSA_SHA2_512;
        assert_eq!(desired_rsa_hash(flags), Some(SignatureHash::SHA2_512));
    }

    #[test]
    fn desired_rsa_hash_is_none_without_a_recognised_flag() {
        assert_eq!(desired_rsa_hash(0), None);
    }

    #[test]
    fn encode_identities_round_trips_through_a_cursor() {
        let keys = vec![(b"blob1".to_vec(), "comment1".to_string())];
        let encoded = encode_identities(&keys);
        let mut cursor = Cursor::new(&encoded);
        let count = cursor.read_u32().expect("count");
        assert_eq!(count, 1);
        assert_eq!(cursor.read_string().expect("blob"), b"blob1");
        assert_eq!(cursor.read_string().expect("comment"), b"comment1");
    }
}
