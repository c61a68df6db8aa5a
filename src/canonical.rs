//! canonical — stable JSON form for store records.
//!
//! Object keys are emitted in byte order at every nesting level, arrays keep
//! their order, no insignificant whitespace. Two logically equal payloads give
//! byte-identical strings regardless of the key order they were built with,
//! which is what makes snapshot diffs meaningful.

use serde::Serialize;
use serde_json::Value;

/// Canonical string of any serializable payload.
pub fn canonicalize<T: Serialize + ?Sized>(payload: &T) -> serde_json::Result<String> {
    let v = serde_json::to_value(payload)?;
    Ok(canonical_string(&v))
}

/// Canonical string of an already-built JSON value.
pub fn canonical_string(v: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, v);
    out
}

fn write_value(out: &mut String, v: &Value) {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_scalar(out, &Value::String(k.clone()));
                out.push(':');
                write_value(out, &map[k.as_str()]);
            }
            out.push('}');
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
        other => write_scalar(out, other),
    }
}

// Строки/числа/bool/null сериализует сам serde_json (экранирование, формат чисел).
fn write_scalar(out: &mut String, v: &Value) {
    out.push_str(&v.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_keys_are_sorted() {
        let v = json!({"b": {"z": 1, "a": [3, {"y": null, "x": "q"}]}, "a": true});
        assert_eq!(
            canonical_string(&v),
            r#"{"a":true,"b":{"a":[3,{"x":"q","y":null}],"z":1}}"#
        );
    }

    #[test]
    fn strings_are_escaped() {
        let v = json!({"k": "line\n\"quoted\""});
        assert_eq!(canonical_string(&v), r#"{"k":"line\n\"quoted\""}"#);
    }
}
