//! Canonical byte form: compact JSON with lexicographically sorted keys.
//!
//! This is the unique byte representation hashed by the provenance ledger and
//! stored for opaque record mappings. Separators are exactly `,` and `:`,
//! object keys sort bytewise, and arrays keep their order. The encoding is
//! total on null, booleans, numbers, strings, arrays, and nested mappings.

use serde::Serialize;
use serde_json::Value;

/// Render a JSON value in canonical form.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(&mut out, value);
    out
}

/// Canonical form of any serializable value.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    Ok(canonical_bytes(&serde_json::to_value(value)?))
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_scalar(out, *key);
                out.push(b':');
                write_value(out, &map[key.as_str()]);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item);
            }
            out.push(b']');
        }
        scalar => write_scalar(out, scalar),
    }
}

fn write_scalar<T: Serialize>(out: &mut Vec<u8>, value: &T) {
    // serde_json handles string escaping and number formatting; writing to a
    // Vec cannot fail.
    serde_json::to_writer(&mut *out, value).expect("scalar serialization should not fail");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sort_recursively() {
        let value = json!({"b": {"z": 1, "a": [2, 1]}, "a": null});
        let bytes = canonical_bytes(&value);
        assert_eq!(bytes, br#"{"a":null,"b":{"a":[2,1],"z":1}}"#);
    }

    #[test]
    fn arrays_keep_order() {
        let value = json!(["c", "a", "b"]);
        assert_eq!(canonical_bytes(&value), br#"["c","a","b"]"#);
    }

    #[test]
    fn strings_are_escaped() {
        let value = json!({"k": "line\nbreak \"q\""});
        assert_eq!(
            canonical_bytes(&value),
            br#"{"k":"line\nbreak \"q\""}"#.to_vec()
        );
    }

    #[test]
    fn integers_stay_integers() {
        let value = json!({"n": 42, "neg": -7});
        assert_eq!(canonical_bytes(&value), br#"{"n":42,"neg":-7}"#);
    }

    #[test]
    fn serializable_structs_round_through_value() {
        #[derive(serde::Serialize)]
        struct Probe {
            z: u8,
            a: &'static str,
        }
        let bytes = canonical_json(&Probe { z: 1, a: "x" }).unwrap();
        assert_eq!(bytes, br#"{"a":"x","z":1}"#);
    }
}
