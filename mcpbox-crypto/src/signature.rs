//! Export-file signatures: HMAC-SHA256 over canonical JSON
//!
//! The canonical form sorts object keys and uses no whitespace, so the
//! signature survives any serialisation-order difference between exporter
//! and importer. `signature` and `exported_at` are excluded from the signed
//! payload: the former for obvious reasons, the latter so a re-imported
//! file round-trips.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Fields excluded from the signed payload.
const UNSIGNED_FIELDS: &[&str] = &["signature", "exported_at"];

/// Serialise a JSON value canonically: object keys sorted, compact
/// separators.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serialises"));
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

fn signed_payload(data: &Value) -> Value {
    match data {
        Value::Object(map) => {
            let filtered: serde_json::Map<String, Value> = map
                .iter()
                .filter(|(k, _)| !UNSIGNED_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(filtered)
        }
        other => other.clone(),
    }
}

/// Compute the hex HMAC-SHA256 signature for an export document.
pub fn sign_export(key: &[u8], data: &Value) -> String {
    let canonical = canonical_json(&signed_payload(data));
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify the `signature` field of an export document in constant time.
pub fn verify_export_signature(key: &[u8], data: &Value) -> Result<(), CryptoError> {
    let provided = data
        .get("signature")
        .and_then(Value::as_str)
        .ok_or(CryptoError::InvalidSignature)?;
    let provided_bytes = hex::decode(provided).map_err(|_| CryptoError::InvalidSignature)?;

    let canonical = canonical_json(&signed_payload(data));
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(canonical.as_bytes());
    mac.verify_slice(&provided_bytes)
        .map_err(|_| CryptoError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys_compactly() {
        let value = json!({"b": 1, "a": {"z": true, "y": [1, 2]}});
        assert_eq!(canonical_json(&value), r#"{"a":{"y":[1,2],"z":true},"b":1}"#);
    }

    #[test]
    fn sign_then_verify() {
        let key = b"0123456789abcdef0123456789abcdef";
        let mut doc = json!({
            "version": "1.0",
            "exported_at": "2025-01-01T00:00:00Z",
            "servers": [{"name": "weather", "tools": []}],
        });
        let sig = sign_export(key, &doc);
        doc["signature"] = json!(sig);
        assert!(verify_export_signature(key, &doc).is_ok());
    }

    #[test]
    fn exported_at_does_not_affect_signature() {
        let key = b"k";
        let a = json!({"version": "1.0", "exported_at": "2025-01-01T00:00:00Z", "servers": []});
        let b = json!({"version": "1.0", "exported_at": "2026-06-06T06:06:06Z", "servers": []});
        assert_eq!(sign_export(key, &a), sign_export(key, &b));
    }

    #[test]
    fn tampered_document_fails_verification() {
        let key = b"k";
        let mut doc = json!({"version": "1.0", "servers": [{"name": "a"}]});
        let sig = sign_export(key, &doc);
        doc["signature"] = json!(sig);
        doc["servers"][0]["name"] = json!("b");
        assert!(verify_export_signature(key, &doc).is_err());
    }

    #[test]
    fn missing_signature_fails_verification() {
        assert!(verify_export_signature(b"k", &json!({"version": "1.0"})).is_err());
    }
}
