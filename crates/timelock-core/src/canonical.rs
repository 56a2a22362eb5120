//! Canonical JSON used as the block hash preimage.
//!
//! Keys are sorted at every level, items are separated by `", "` and keys by
//! `": "`, and every non-ASCII or control character is written as a lowercase
//! `\uXXXX` escape. The output is byte-identical to
//! `json.dumps(value, sort_keys=True)`, so ledgers written by other
//! implementations hash to the same digests.

use serde_json::Value;
use std::fmt::Write;

/// Render `value` canonically into a fresh string.
pub fn to_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

pub fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        // Floats render in shortest round-trip form, e.g. `1700000000.0`.
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => write_str(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_str(out, key);
                out.push_str(": ");
                write_value(out, &map[key.as_str()]);
            }
            out.push('}');
        }
    }
}

pub fn write_str(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{unit:04x}");
                }
            }
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_and_uses_spaced_separators() {
        let v = json!({"b": 1, "a": [true, null, "x"], "c": {"z": 0, "y": -2}});
        assert_eq!(
            to_string(&v),
            r#"{"a": [true, null, "x"], "b": 1, "c": {"y": -2, "z": 0}}"#
        );
    }

    #[test]
    fn escapes_like_ensure_ascii() {
        let v = json!("böb \"q\" \\ \n\t\u{7f} 😀");
        assert_eq!(
            to_string(&v),
            r#""b\u00f6b \"q\" \\ \n\t\u007f \ud83d\ude00""#
        );
    }

    #[test]
    fn floats_keep_fraction() {
        assert_eq!(to_string(&json!(1_700_000_000.0_f64)), "1700000000.0");
        assert_eq!(to_string(&json!(1_700_000_000.5_f64)), "1700000000.5");
        assert_eq!(to_string(&json!(42u64)), "42");
    }

    #[test]
    fn empty_containers() {
        assert_eq!(to_string(&json!({"t": [], "o": {}})), r#"{"o": {}, "t": []}"#);
    }
}
