//! Canonical JSON form used for Ed25519 signing (spec §6).
//!
//! The canonical form sorts object keys lexicographically at every level and
//! drops the `sig` field before serializing. Only
//! `{ts, origin, topic, payload, sessionId?, kid?}` participates.

use serde::Serialize;
use serde_json::{Map, Value};

/// Recursively sort all object keys so the resulting JSON text is a
/// deterministic function of the value, independent of field declaration
/// order or a serializer's hash-map iteration order.
pub fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Build the canonical signing bytes for an envelope-shaped value.
///
/// `envelope` must serialize to a JSON object; `sig` is stripped if present
/// and the remaining keys are sorted recursively, then re-serialized as
/// compact UTF-8 JSON.
pub fn canonical_bytes<T: Serialize>(envelope: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut value = serde_json::to_value(envelope)?;
    if let Value::Object(map) = &mut value {
        map.remove("sig");
    }
    let sorted = sort_keys(&value);
    serde_json::to_vec(&sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_nested_keys() {
        let v = json!({"b": 1, "a": {"z": 1, "y": 2}});
        let sorted = sort_keys(&v);
        assert_eq!(sorted.to_string(), r#"{"a":{"y":2,"z":1},"b":1}"#);
    }

    #[test]
    fn strips_sig_before_canonicalizing() {
        let v = json!({"sig": "deadbeef", "ts": "2026-01-01T00:00:00Z", "a": 1});
        let bytes = canonical_bytes(&v).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("sig"));
        assert_eq!(text, r#"{"a":1,"ts":"2026-01-01T00:00:00Z"}"#);
    }

    #[test]
    fn deterministic_regardless_of_field_order() {
        let a = json!({"z": 1, "a": 2});
        let b = json!({"a": 2, "z": 1});
        assert_eq!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
    }
}
