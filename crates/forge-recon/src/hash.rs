//! Canonical content fingerprinting for source entities.
//!
//! The digest covers `(kind, label, attributes)` after canonicalization, so a
//! source store that re-serializes equivalent JSON (different key order,
//! `1.0` vs `1`, composed vs decomposed Unicode) keeps producing the same hash.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

const HASH_DOMAIN: &[u8] = b"forge.entity.v1";
const MAX_DEPTH: usize = 64;
// Largest magnitude at which every integer is exactly representable as f64.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// SHA-256 digest of an entity's canonical content, as lowercase hex.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix("sha256:").unwrap_or(trimmed);
        if trimmed.len() != 64 || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("'{s}' is not a 64-character hex sha256 digest"));
        }
        Ok(ContentHash(trimmed.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for ContentHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CanonicalError(String);

/// Parses the raw attribute payload stored in the source. A missing, blank or
/// `null` payload is an empty attribute set; anything other than a JSON
/// object is malformed.
pub fn parse_attributes(raw: Option<&str>) -> Result<Map<String, Value>, CanonicalError> {
    let text = match raw.map(str::trim) {
        None | Some("") => return Ok(Map::new()),
        Some(text) => text,
    };
    let value: Value =
        serde_json::from_str(text).map_err(|err| CanonicalError(format!("invalid JSON: {err}")))?;
    match canonicalize(&value)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(CanonicalError(format!(
            "attributes must be a JSON object, found {}",
            json_type_name(&other)
        ))),
    }
}

/// Returns the canonical form of `value`: keys sorted, keys and strings NFC
/// normalized, integral floats collapsed to integers.
pub fn canonicalize(value: &Value) -> Result<Value, CanonicalError> {
    canonical_value(value, 0)
}

/// Equality under canonicalization; values that cannot be canonicalized fall
/// back to structural equality.
pub fn canonical_eq(a: &Value, b: &Value) -> bool {
    match (canonicalize(a), canonicalize(b)) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => a == b,
    }
}

/// Fingerprints `(kind, label, attributes)`. Each part is length-prefixed so
/// field boundaries cannot alias.
pub fn content_hash(
    kind: &str,
    label: &str,
    attributes: &Map<String, Value>,
) -> Result<ContentHash, CanonicalError> {
    let canonical = canonicalize(&Value::Object(attributes.clone()))?;
    let attrs = serde_json::to_vec(&canonical)
        .map_err(|err| CanonicalError(format!("serializing canonical attributes: {err}")))?;
    let kind = normalize_text(kind);
    let label = normalize_text(label);

    let mut hasher = Sha256::new();
    hasher.update(HASH_DOMAIN);
    for part in [kind.as_bytes(), label.as_bytes(), attrs.as_slice()] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

fn canonical_value(value: &Value, depth: usize) -> Result<Value, CanonicalError> {
    if depth > MAX_DEPTH {
        return Err(CanonicalError(format!(
            "nesting deeper than {MAX_DEPTH} levels"
        )));
    }
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<(String, Value)> = Vec::with_capacity(map.len());
            for (key, val) in map {
                pairs.push((normalize_text(key), canonical_value(val, depth + 1)?));
            }
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Map::new();
            for (key, val) in pairs {
                if out.contains_key(&key) {
                    return Err(CanonicalError(format!(
                        "keys collide after normalization: '{key}'"
                    )));
                }
                out.insert(key, val);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| canonical_value(item, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::String(s) => Ok(Value::String(normalize_text(s))),
        Value::Number(n) => Ok(Value::Number(canonical_number(n))),
        Value::Bool(_) | Value::Null => Ok(value.clone()),
    }
}

fn canonical_number(n: &Number) -> Number {
    if n.is_i64() || n.is_u64() {
        return n.clone();
    }
    match n.as_f64() {
        Some(f) if f == 0.0 => Number::from(0),
        Some(f) if f.fract() == 0.0 && f.abs() <= MAX_EXACT_INTEGER => Number::from(f as i64),
        Some(f) => Number::from_f64(f).unwrap_or_else(|| n.clone()),
        None => n.clone(),
    }
}

fn normalize_text(s: &str) -> String {
    s.nfc().collect()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test attributes must be an object"),
        }
    }

    #[test]
    fn key_order_does_not_change_the_hash() {
        let a = parse_attributes(Some(r#"{"role":"scientist","lab":{"x":1,"y":[1,2]}}"#)).unwrap();
        let b = parse_attributes(Some(r#"{"lab":{"y":[1,2],"x":1},"role":"scientist"}"#)).unwrap();
        assert_eq!(
            content_hash("person", "Dr. Smith", &a).unwrap(),
            content_hash("person", "Dr. Smith", &b).unwrap()
        );
    }

    #[test]
    fn numeric_formatting_is_normalized() {
        let a = parse_attributes(Some(r#"{"age": 42, "score": 0.5, "zero": -0.0}"#)).unwrap();
        let b = parse_attributes(Some(r#"{"age": 42.0, "score": 5e-1, "zero": 0}"#)).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            content_hash("k", "l", &a).unwrap(),
            content_hash("k", "l", &b).unwrap()
        );
    }

    #[test]
    fn unicode_composition_is_normalized() {
        let composed = attrs(json!({"name": "Caf\u{e9}"}));
        let decomposed = attrs(json!({"name": "Cafe\u{301}"}));
        assert_eq!(
            content_hash("place", "Caf\u{e9}", &composed).unwrap(),
            content_hash("place", "Cafe\u{301}", &decomposed).unwrap()
        );
    }

    #[test]
    fn any_field_change_changes_the_hash() {
        let base = attrs(json!({"role": "scientist"}));
        let h = content_hash("person", "Dr. Smith", &base).unwrap();
        let changed_value = attrs(json!({"role": "engineer"}));
        let added_field = attrs(json!({"role": "scientist", "affiliation": "Lab7"}));
        let typed = attrs(json!({"role": "scientist", "n": "1"}));
        let untyped = attrs(json!({"role": "scientist", "n": 1}));
        assert_ne!(h, content_hash("person", "Dr. Smith", &changed_value).unwrap());
        assert_ne!(h, content_hash("person", "Dr. Smith", &added_field).unwrap());
        assert_ne!(h, content_hash("location", "Dr. Smith", &base).unwrap());
        assert_ne!(h, content_hash("person", "Dr. Smyth", &base).unwrap());
        assert_ne!(
            content_hash("p", "x", &typed).unwrap(),
            content_hash("p", "x", &untyped).unwrap()
        );
    }

    #[test]
    fn kind_and_label_boundaries_do_not_alias() {
        let empty = Map::new();
        assert_ne!(
            content_hash("ab", "c", &empty).unwrap(),
            content_hash("a", "bc", &empty).unwrap()
        );
    }

    #[test]
    fn blank_and_null_payloads_are_empty_objects() {
        assert!(parse_attributes(None).unwrap().is_empty());
        assert!(parse_attributes(Some("  ")).unwrap().is_empty());
        assert!(parse_attributes(Some("null")).unwrap().is_empty());
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(parse_attributes(Some("{not json")).is_err());
        assert!(parse_attributes(Some("[1,2,3]")).is_err());
        assert!(parse_attributes(Some("\"text\"")).is_err());
        let colliding = format!(r#"{{"Caf{}":1,"Cafe{}":2}}"#, '\u{e9}', '\u{301}');
        let err = parse_attributes(Some(&colliding)).unwrap_err();
        assert!(err.to_string().contains("collide"));
    }

    #[test]
    fn content_hash_parses_with_optional_prefix() {
        let h = content_hash("k", "l", &Map::new()).unwrap();
        let prefixed: ContentHash = format!("sha256:{}", h.as_str().to_uppercase())
            .parse()
            .unwrap();
        assert_eq!(prefixed, h);
        assert_eq!(h.short().len(), 12);
        assert!("abc".parse::<ContentHash>().is_err());
    }

    #[test]
    fn canonical_eq_ignores_representation() {
        assert!(canonical_eq(&json!(1.0), &json!(1)));
        assert!(canonical_eq(&json!({"b": 1, "a": 2}), &json!({"a": 2, "b": 1})));
        assert!(!canonical_eq(&json!([1, 2]), &json!([2, 1])));
    }
}
