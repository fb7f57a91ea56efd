use std::fmt;

/// An opaque session token returned by the vault bridge after a successful
/// unlock. Has the sensitivity of a master credential for the session's
/// lifetime: never logged, zeroed on drop.
///
/// Stored as `Vec<u8>` rather than `String` so dropping can zero the buffer
/// in safe code (no `unsafe` needed to get a mutable byte view).
#[derive(Clone)]
pub struct SessionToken(Vec<u8>);

impl SessionToken {
    #[must_use]
    pub fn new(raw: String) -> Self {
        Self(raw.into_bytes())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.as_str().to_string()
    }
}

impl Drop for SessionToken {
    fn drop(&mut self) {
        // Overwrite the buffer before it's freed so a heap scrape after drop
        // doesn't find the plaintext token.
        for b in &mut self.0 {
            *b = 0;
        }
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionToken").field(&"[redacted]").finish()
    }
}

impl PartialEq for SessionToken {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SessionToken {}
