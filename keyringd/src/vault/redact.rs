//! HTTP body redaction for debug logging (spec §4.E). Table-driven:
//! any JSON object field whose name case-insensitively matches one of
//! a fixed set is replaced with `[redacted]`; the whole rendered body
//! is then capped at 512 bytes with a truncation marker.
//!
//! Grounded structurally on `cli/src/domain/config.rs`'s
//! validator-plus-table-driven-test style, applied here to a redaction
//! table instead of a config schema.

use serde_json::Value;

const SENSITIVE_FIELD_NAMES: [&str; 6] =
    ["password", "raw", "token", "session", "authorization", "key"];

const MAX_DEBUG_BODY_BYTES: usize = 512;
const TRUNCATION_MARKER: &str = "...[truncated]";

/// Redact sensitive fields from a JSON (or best-effort non-JSON) body
/// and truncate the result for safe inclusion in debug logs.
#[must_use]
pub fn redact_json(body: &[u8]) -> String {
    let rendered = match serde_json::from_slice::<Value>(body) {
        Ok(value) => {
            let mut value = value;
            redact_value(&mut value);
            serde_json::to_string(&value).unwrap_or_default()
        }
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    };
    truncate(&rendered)
}

fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if is_sensitive_field(key) {
                    *entry = Value::String("[redacted]".to_string());
                } else {
                    redact_value(entry);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                redact_value(item);
            }
        }
        _ => {}
    }
}

fn is_sensitive_field(name: &str) -> bool {
    SENSITIVE_FIELD_NAMES
        .iter()
        .any(|candidate| name.eq_ignore_ascii_case(candidate))
}

fn truncate(rendered: &str) -> String {
    if rendered.len() <= MAX_DEBUG_BODY_BYTES {
        return rendered.to_string();
    }
    let mut end = MAX_DEBUG_BODY_BYTES.saturating_sub(TRUNCATION_MARKER.len());
    while !rendered.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{TRUNCATION_MARKER}", &rendered[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_a_password_field_case_insensitively() {
        let body = br#"{"Password":"hunter2","status":"unlocked"}"#;
        let out = redact_json(body);
        assert!(!out.contains("hunter2"));
        assert!(out.contains("unlocked"));
        assert!(out.contains("[redacted]"));
    }

    #[test]
    fn redacts_nested_sensitive_fields() {
        let body = br#"{"outer":{"token":"abc123"}}"#;
        let out = redact_json(body);
        assert!(!out.contains("abc123"));
    }

    #[test]
    fn redacts_fields_inside_arrays() {
        let body = br#"[{"session":"s1"},{"session":"s2"}]"#;
        let out = redact_json(body);
        assert!(!out.contains("s1"));
        assert!(!out.contains("s2"));
    }

    #[test]
    fn leaves_non_sensitive_fields_untouched() {
        let body = br#"{"status":"locked","attempts":3}"#;
        let out = redact_json(body);
        assert!(out.contains("locked"));
        assert!(out.contains('3'));
    }

    #[test]
    fn truncates_long_bodies_with_a_marker() {
        let long_value = "x".repeat(1000);
        let body = format!(r#"{{"status":"{long_value}"}}"#);
        let out = redact_json(body.as_bytes());
        assert!(out.len() <= MAX_DEBUG_BODY_BYTES);
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn falls_back_to_lossy_text_for_non_json_bodies() {
        let out = redact_json(b"not json at all");
        assert_eq!(out, "not json at all");
    }
}
