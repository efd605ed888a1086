//! BLAKE3 content fingerprints.
//!
//! Structured inputs are serialized with JCS (RFC 8785) first so the
//! fingerprint does not depend on map ordering or whitespace.

use anyhow::{Context, Result};
use serde::Serialize;

/// Hex BLAKE3 digest of a text body.
#[must_use]
pub fn fingerprint_text(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let json_value = serde_json::to_value(value).context("Failed to serialize value to JSON")?;
    serde_json_canonicalizer::to_vec(&json_value).context("Failed to canonicalize JSON using JCS")
}

/// Hex BLAKE3 digest of the canonical JSON form of `value`.
pub fn fingerprint_json<T: Serialize>(value: &T) -> Result<String> {
    let canonical = canonical_bytes(value)?;
    Ok(blake3::hash(&canonical).to_hex().to_string())
}

/// `value` as canonical JSON text, for machine-readable CLI output.
pub fn emit_jcs<T: Serialize>(value: &T) -> Result<String> {
    String::from_utf8(canonical_bytes(value)?).context("JCS output contained invalid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_fingerprint_is_stable() {
        assert_eq!(fingerprint_text("abc"), fingerprint_text("abc"));
        assert_ne!(fingerprint_text("abc"), fingerprint_text("abd"));
        assert_eq!(fingerprint_text("").len(), 64);
    }

    #[test]
    fn test_json_fingerprint_ignores_key_order() {
        let a = json!({"stage": "draft", "inputs": ["x", "y"], "model": "m"});
        let b = json!({"model": "m", "inputs": ["x", "y"], "stage": "draft"});
        assert_eq!(fingerprint_json(&a).unwrap(), fingerprint_json(&b).unwrap());

        let c = json!({"model": "m", "inputs": ["y", "x"], "stage": "draft"});
        assert_ne!(fingerprint_json(&a).unwrap(), fingerprint_json(&c).unwrap());
    }

    #[test]
    fn test_emit_jcs_sorts_keys() {
        let value = json!({"stage": "draft", "attempts": 2});
        assert_eq!(emit_jcs(&value).unwrap(), r#"{"attempts":2,"stage":"draft"}"#);
    }
}
