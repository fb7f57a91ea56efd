//! Rich-IPC wire types (spec §3, §6). Newline-delimited JSON, both
//! directions, over the framed transport in `crate::transport`.

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// 16 cryptographically random bytes, hex-encoded — must match on every
/// response in a request/response exchange.
#[must_use]
pub fn new_cookie() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename = "keyring_request")]
pub struct PromptRequest {
    pub cookie: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub description: String,
    pub password_new: bool,
    pub confirm_only: bool,
}

impl PromptRequest {
    #[must_use]
    pub fn new(cookie: String, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            cookie,
            title: title.into(),
            message: message.into(),
            description: String::new(),
            password_new: false,
            confirm_only: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptOutcome {
    Ok,
    Cancelled,
    Confirmed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename = "keyring_response")]
pub struct PromptResponse {
    #[serde(rename = "id")]
    pub cookie: String,
    pub result: PromptOutcome,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename = "keyring_result")]
pub struct UnlockResult {
    #[serde(rename = "id")]
    pub cookie: String,
    pub success: bool,
    #[serde(default)]
    pub error: String,
    pub retry: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_is_32_hex_chars() {
        let cookie = new_cookie();
        assert_eq!(cookie.len(), 32);
        assert!(cookie.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn two_cookies_are_not_equal() {
        assert_ne!(new_cookie(), new_cookie());
    }

    #[test]
    fn request_serializes_with_expected_shape() {
        let req = PromptRequest::new("abc123".to_string(), "Unlock", "Enter password");
        let json = serde_json::to_value(&req).expect("serialize");
        assert_eq!(json["type"], "keyring_request");
        assert_eq!(json["cookie"], "abc123");
        assert_eq!(json["title"], "Unlock");
    }

    #[test]
    fn response_deserializes_with_cookie_aliased_from_id() {
        let raw = r#"{"type":"keyring_response","id":"c1","result":"ok","password":"hunter2"}"#;
        let resp: PromptResponse = serde_json::from_str(raw).expect("deserialize");
        assert_eq!(resp.cookie, "c1");
        assert_eq!(resp.result, PromptOutcome::Ok);
        assert_eq!(resp.password.as_deref(), Some("hunter2"));
    }
}
