use serde_json::Value;
use sha3::{Digest, Keccak256};

/// Render a JSON value in canonical form: object keys sorted recursively,
/// no insignificant whitespace.
///
/// Two values that compare equal always produce byte-identical output, on
/// every host. This is the input to every consensus-visible hash.
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// keccak-256 over the canonical string form of `value`.
pub fn keccak_value(value: &Value) -> [u8; 32] {
    keccak_bytes(canonical_string(value).as_bytes())
}

/// keccak-256 over raw bytes.
pub fn keccak_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        // serde_json's Display for Number is exact for integers; floats never
        // appear in consensus state.
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json handles JSON string escaping.
            out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serialization is infallible"));
                out.push(':');
                write_value(out, &map[*key]);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_recursively() {
        let v = json!({"b": 1, "a": {"z": true, "m": [{"y": 2, "x": 1}]}});
        assert_eq!(
            canonical_string(&v),
            r#"{"a":{"m":[{"x":1,"y":2}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn key_order_does_not_change_hash() {
        let a = json!({"left": "0x01", "right": "0x02"});
        let b = json!({"right": "0x02", "left": "0x01"});
        assert_eq!(keccak_value(&a), keccak_value(&b));
    }

    #[test]
    fn escapes_strings() {
        let v = json!({"msg": "a\"b\n"});
        assert_eq!(canonical_string(&v), r#"{"msg":"a\"b\n"}"#);
    }
}
