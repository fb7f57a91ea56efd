use thiserror::Error;

/// The daemon-wide error taxonomy (spec §7). Pure domain errors — no
/// `anyhow`, `std::fs`, or `std::process` imports. Call sites wrap these
/// with `.context(...)` as they cross into `anyhow::Result`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("vault is locked")]
    VaultLocked,

    #[error("user cancelled the request")]
    UserCancelled,

    #[error("maximum password retries exceeded")]
    MaxRetriesExceeded,

    #[error("no secure prompt available; pass --allow-insecure-prompts to enable an insecure fallback")]
    NoSecurePromptAvailable,

    #[error("vault bridge is not available")]
    BridgeUnavailable,

    #[error("vault bridge exited")]
    BridgeExited,

    /// `debug_body` is never rendered via `Display`/`Error` — only through
    /// the originating client's `debug_details()` accessor, gated on the
    /// debug toggle, and only after redaction.
    #[error("vault bridge returned HTTP {status} for {path}")]
    ApiError {
        status: u16,
        path: String,
        debug_body: String,
    },

    #[error("could not parse SSH key: {0}")]
    InvalidKey(String),

    #[error("SSH agent socket directory is not secure: {0}")]
    InsecureSocketDir(String),

    #[error("SSH agent socket already in use")]
    SocketExists,

    #[error("path exists and is not a socket")]
    NotSocket,

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("prompt cookie mismatch")]
    CookieMismatch,

    #[error("operation timed out")]
    Timeout,
}

impl CoreError {
    /// The (already-redacted) response body behind an `ApiError`, for
    /// callers that have the debug toggle on. `Display`/`to_string()`
    /// never exposes this; it is reached only through this accessor.
    #[must_use]
    pub fn debug_details(&self) -> Option<&str> {
        match self {
            Self::ApiError { debug_body, .. } => Some(debug_body),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_details_exposes_the_body_only_for_api_errors() {
        let err = CoreError::ApiError {
            status: 400,
            path: "/unlock".to_string(),
            debug_body: "redacted-body".to_string(),
        };
        assert_eq!(err.debug_details(), Some("redacted-body"));
        assert_eq!(CoreError::VaultLocked.debug_details(), None);
    }

    #[test]
    fn api_error_display_never_contains_body() {
        let err = CoreError::ApiError {
            status: 400,
            path: "/unlock".to_string(),
            debug_body: r#"{"password":"hunter2"}"#.to_string(),
        };
        let rendered = err.to_string();
        assert!(!rendered.contains("password"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("400"));
        assert!(rendered.contains("/unlock"));
    }

    #[test]
    fn no_secure_prompt_message_mentions_insecure_flag() {
        let msg = CoreError::NoSecurePromptAvailable.to_string();
        assert!(msg.contains("allow-insecure-prompts"));
    }
}
