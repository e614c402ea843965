//! Canonical, order-independent tool call signatures.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize `value` with object keys sorted at every depth; arrays keep their order.
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
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Signature of a tool call: name plus a digest of the canonical argument tree.
pub fn signature(name: &str, args: &serde_json::Map<String, Value>) -> String {
    let canonical = canonical_json(&Value::Object(args.clone()));
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{name}:{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn nested_key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b": {"y": 1, "x": [1, {"k": 2, "j": 3}]}, "a": "s"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": "s", "b": {"x": [1, {"j": 3, "k": 2}], "y": 1}}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(signature("t", &map(a)), signature("t", &map(b)));
    }

    #[test]
    fn array_order_and_name_matter() {
        let a = map(json!({"ids": [1, 2]}));
        let b = map(json!({"ids": [2, 1]}));
        assert_ne!(signature("t", &a), signature("t", &b));
        assert_ne!(signature("t", &a), signature("u", &a));
    }

    #[test]
    fn canonical_form_escapes_keys() {
        let value = json!({"quote\"key": "v"});
        assert_eq!(canonical_json(&value), r#"{"quote\"key":"v"}"#);
    }
}
