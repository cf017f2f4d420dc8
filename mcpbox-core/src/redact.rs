//! Redaction and truncation helpers for audit output

use serde_json::Value;

/// Cap applied to stored results and stdout (10 KiB).
pub const RESULT_CAP_BYTES: usize = 10 * 1024;

/// Placeholder written in place of a sensitive value.
pub const REDACTED: &str = "[REDACTED]";

/// Argument keys whose values are masked before logging.
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "token",
    "secret",
    "password",
    "passwd",
    "api_key",
    "apikey",
    "authorization",
    "credential",
    "private_key",
];

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS.iter().any(|f| lower.contains(f))
}

/// Recursively mask values under sensitive keys.
pub fn redact_args(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if is_sensitive_key(key) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), redact_args(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_args).collect()),
        other => other.clone(),
    }
}

/// Truncate a string to `cap` bytes on a char boundary, appending a marker
/// when anything was dropped.
pub fn truncate_output(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… [truncated]", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sensitive_keys_are_masked() {
        let args = json!({
            "city": "Berlin",
            "api_key": "sk-12345",
            "nested": {"refresh_token": "abc", "count": 3},
            "list": [{"password": "hunter2"}]
        });
        let redacted = redact_args(&args);
        assert_eq!(redacted["city"], "Berlin");
        assert_eq!(redacted["api_key"], REDACTED);
        assert_eq!(redacted["nested"]["refresh_token"], REDACTED);
        assert_eq!(redacted["nested"]["count"], 3);
        assert_eq!(redacted["list"][0]["password"], REDACTED);
    }

    #[test]
    fn key_matching_is_case_insensitive() {
        let redacted = redact_args(&json!({"Authorization": "Bearer x"}));
        assert_eq!(redacted["Authorization"], REDACTED);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo".repeat(10);
        let out = truncate_output(&text, 7);
        assert!(out.ends_with("[truncated]"));
        // Never panics on multi-byte boundaries
        truncate_output(&text, 1);
    }

    #[test]
    fn short_output_is_unchanged() {
        assert_eq!(truncate_output("ok", RESULT_CAP_BYTES), "ok");
    }
}
