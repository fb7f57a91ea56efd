use serde::{Deserialize, Serialize};

/// Vault item kinds the daemon can see. Unknown kinds round-trip as `Other`
/// so a newer bridge can add item types without breaking deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VaultItemType {
    Login,
    SecureNote,
    Card,
    Identity,
    SshKey,
    #[serde(other)]
    Other,
}

/// The SSH-specific fields of a vault item, present only when
/// `VaultItem::item_type == VaultItemType::SshKey`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshKeyFields {
    pub private_key_pem: String,
    #[serde(default)]
    pub public_key_authorised: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// A projection of a vault item: the fields the daemon reads, plus the raw
/// envelope so pass-through operations (`CreateItem`/`UpdateItem`) don't need
/// to model every item schema the vault supports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: VaultItemType,
    #[serde(default, rename = "sshKey")]
    pub ssh_key: Option<SshKeyFields>,
    /// The rest of the bridge's JSON representation, preserved verbatim.
    #[serde(flatten)]
    pub raw: serde_json::Map<String, serde_json::Value>,
}

impl VaultItem {
    /// `true` iff this item is an SSH key with key material attached.
    #[must_use]
    pub fn is_ssh_key(&self) -> bool {
        self.item_type == VaultItemType::SshKey && self.ssh_key.is_some()
    }
}

/// Lock state reported by the vault bridge's status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultStatus {
    Locked,
    Unlocked,
    Unauthenticated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_item_type_round_trips_as_other() {
        let v: VaultItemType = serde_json::from_str("\"folder\"").expect("parses");
        assert_eq!(v, VaultItemType::Other);
    }

    #[test]
    fn ssh_key_item_without_ssh_key_field_is_not_materialisable() {
        let item = VaultItem {
            id: "1".into(),
            name: "n".into(),
            item_type: VaultItemType::SshKey,
            ssh_key: None,
            raw: serde_json::Map::new(),
        };
        assert!(!item.is_ssh_key());
    }

    #[test]
    fn login_item_is_never_ssh_key() {
        let item = VaultItem {
            id: "1".into(),
            name: "n".into(),
            item_type: VaultItemType::Login,
            ssh_key: Some(SshKeyFields {
                private_key_pem: "x".into(),
                public_key_authorised: None,
                fingerprint: None,
            }),
            raw: serde_json::Map::new(),
        };
        assert!(!item.is_ssh_key());
    }
}
