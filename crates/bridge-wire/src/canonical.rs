//! Byte-stable JSON serialization for command signing. The signature must
//! cover exactly the bytes that go on the wire, so signer and verifier can
//! never disagree after a reparse/re-serialize round trip.
//!
//! `serde_json` is built here with the `preserve_order` feature so that a
//! [`serde_json::Map`] keeps insertion order rather than sorting keys. The
//! command envelope is built field-by-field in a fixed order
//! (`type, tool, args, request_id, timestamp`), with no whitespace, so the
//! signed string is byte-identical across implementations for the same
//! logical input.

use serde_json::Value;

/// Serializes `value` to the most compact JSON form: no whitespace, and
/// whatever key order the `Value` itself holds (insertion order, thanks to
/// `preserve_order`). Callers that need a specific field order must build
/// their `Value::Object` in that order (see [`crate::payloads::CommandEnvelope`]).
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(value).expect("Value serializes to JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    #[test]
    fn preserves_insertion_order_not_alpha_order() {
        let mut map = Map::new();
        map.insert("type".to_string(), json!("device.command"));
        map.insert("tool".to_string(), json!("read"));
        map.insert("args".to_string(), json!({}));
        map.insert("request_id".to_string(), json!("abc123"));
        map.insert("timestamp".to_string(), json!(1_700_000_000));
        let v = Value::Object(map);
        assert_eq!(
            canonical_json(&v),
            r#"{"type":"device.command","tool":"read","args":{},"request_id":"abc123","timestamp":1700000000}"#
        );
    }

    #[test]
    fn no_whitespace() {
        let v = json!({"a": 1, "b": [1, 2, 3]});
        let s = canonical_json(&v);
        assert!(!s.contains(' '));
        assert!(!s.contains('\n'));
    }
}
