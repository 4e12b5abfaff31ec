//! Deterministic canonical JSON (spec.md §4.1, C1).
//!
//! Every hash and every signature in the system is computed over the
//! byte string this module produces. The contract is byte-equality,
//! not structural equality: `canonicalize(a) == canonicalize(b)` must
//! hold whenever `a` and `b` are the same logical value with object
//! keys reordered at any depth.

use munin_error::{Error, MuninResult};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// A JSON value restricted to what the canonical encoder can produce
/// deterministic bytes for. `Object` is keyed by a `BTreeMap`, which
/// orders by byte value — equivalent to code-point order for valid
/// UTF-8 — so insertion order never leaks into the encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<JsonValue>),
    Object(BTreeMap<String, JsonValue>),
}

impl JsonValue {
    pub fn object(fields: impl IntoIterator<Item = (String, JsonValue)>) -> Self {
        JsonValue::Object(fields.into_iter().collect())
    }

    pub fn string(s: impl Into<String>) -> Self {
        JsonValue::String(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsonValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        match self {
            JsonValue::Object(m) => m.get(key),
            _ => None,
        }
    }
}

/// Converts a parsed `serde_json::Value` (e.g. an HTTP request body)
/// into our restricted sum type. Rejects non-finite numbers, the one
/// way an otherwise-valid JSON document can fail to canonicalize.
impl TryFrom<serde_json::Value> for JsonValue {
    type Error = Error;

    fn try_from(v: serde_json::Value) -> MuninResult<Self> {
        Ok(match v {
            serde_json::Value::Null => JsonValue::Null,
            serde_json::Value::Bool(b) => JsonValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    if !f.is_finite() {
                        return Err(Error::Encoding(
                            "non-finite numbers cannot be canonicalized".into(),
                        ));
                    }
                }
                JsonValue::Number(n)
            }
            serde_json::Value::String(s) => JsonValue::String(s),
            serde_json::Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(JsonValue::try_from(item)?);
                }
                JsonValue::Array(out)
            }
            serde_json::Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k, JsonValue::try_from(v)?);
                }
                JsonValue::Object(out)
            }
        })
    }
}

/// The inverse of `TryFrom<serde_json::Value>`, for handing a stored
/// value back out through an ordinary `serde_json`-based wire layer
/// (e.g. embedding an audit payload in an HTTP response body). This
/// is not a re-canonicalization: the byte string used for hashing is
/// always `canonical_payload`, never this round trip.
impl From<JsonValue> for serde_json::Value {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => serde_json::Value::Null,
            JsonValue::Bool(b) => serde_json::Value::Bool(b),
            JsonValue::Number(n) => serde_json::Value::Number(n),
            JsonValue::String(s) => serde_json::Value::String(s),
            JsonValue::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            JsonValue::Object(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

/// Encodes `value` as canonical UTF-8 JSON: object keys sorted at
/// every depth, no insignificant whitespace, minimal string escaping,
/// numbers in their shortest round-trip form, array order preserved.
pub fn canonicalize(value: &JsonValue) -> MuninResult<String> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

/// Convenience for the common case of hashing/signing a canonicalized
/// payload: canonical bytes, ready for SHA-256 or Ed25519 input.
pub fn canonicalize_bytes(value: &JsonValue) -> MuninResult<Vec<u8>> {
    Ok(canonicalize(value)?.into_bytes())
}

fn write_value(value: &JsonValue, out: &mut String) -> MuninResult<()> {
    match value {
        JsonValue::Null => out.push_str("null"),
        JsonValue::Bool(true) => out.push_str("true"),
        JsonValue::Bool(false) => out.push_str("false"),
        JsonValue::Number(n) => write_number(n, out)?,
        JsonValue::String(s) => write_string(s, out),
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        JsonValue::Object(map) => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(k, out);
                out.push(':');
                write_value(v, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_number(n: &serde_json::Number, out: &mut String) -> MuninResult<()> {
    if let Some(f) = n.as_f64() {
        if !f.is_finite() {
            return Err(Error::Encoding(
                "non-finite numbers cannot be canonicalized".into(),
            ));
        }
    }
    // serde_json::Number's own Display is already the shortest
    // round-trip form (itoa for integers, ryu for floats); we rely on
    // it rather than reimplementing float formatting.
    write!(out, "{n}").map_err(|e| Error::Encoding(e.to_string()))
}

/// RFC 8259 §7 minimal escaping: the two mandatory escapes (`"`,
/// `\`), control characters below 0x20, and nothing else — notably
/// `/` is left unescaped, and non-ASCII UTF-8 bytes pass through
/// untouched rather than being `\u`-escaped.
fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canon_of(v: serde_json::Value) -> String {
        let jv = JsonValue::try_from(v).unwrap();
        canonicalize(&jv).unwrap()
    }

    #[test]
    fn sorts_keys_at_every_depth() {
        let a = canon_of(json!({"b": 2, "a": 1, "c": 3}));
        let b = canon_of(json!({"c": 3, "a": 1, "b": 2}));
        assert_eq!(a, b);
        assert_eq!(a, r#"{"a":1,"b":2,"c":3}"#);
    }

    #[test]
    fn sorts_nested_object_keys() {
        let a = canon_of(json!({"b": 2, "a": 1, "c": {"y": 1, "x": 2}}));
        assert_eq!(a, r#"{"a":1,"b":2,"c":{"x":2,"y":1}}"#);
    }

    #[test]
    fn preserves_array_order() {
        let a = canon_of(json!({"a": [3, 1, 2]}));
        assert_eq!(a, r#"{"a":[3,1,2]}"#);
    }

    #[test]
    fn reordering_top_level_keys_is_byte_identical() {
        let a = canon_of(json!({"z": true, "a": null, "m": "x"}));
        let b = canon_of(json!({"m": "x", "z": true, "a": null}));
        assert_eq!(a, b);
    }

    #[test]
    fn escapes_control_characters_minimally() {
        let a = canon_of(json!({"s": "a\nb\"c\\d/e"}));
        assert_eq!(a, r#"{"s":"a\nb\"c\\d/e"}"#);
    }

    #[test]
    fn idempotent_round_trip_through_serde_json() {
        let original = json!({"b": 2, "a": 1});
        let once = canon_of(original.clone());
        let reparsed: serde_json::Value = serde_json::from_str(&once).unwrap();
        let jv: JsonValue = reparsed.try_into().unwrap();
        let twice = canonicalize(&jv).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_non_finite_numbers() {
        let huge = f64::INFINITY;
        let n = serde_json::Number::from_f64(huge);
        assert!(n.is_none(), "serde_json itself refuses to build this number");
    }
}
