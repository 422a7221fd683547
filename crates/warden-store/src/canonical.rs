//! Canonical JSON serialization and hashing.
//!
//! Approval decisions are anchored to SHA-256 hashes of a tool's
//! `[name, description, schema]` triple and of the server instructions.
//! Canonicalization makes those hashes stable against representational noise
//! a server controls (key order, duplicate `required` entries, a trailing
//! newline) while staying sensitive to everything else, including numeric
//! literal form (`1` and `1.0` hash differently) and ANSI escape bytes.
//!
//! Hashing always runs on the raw, unsanitized text: a server cannot dodge
//! drift detection by toggling escape sequences that the sanitizer would
//! later remove.

use sha2::{Digest, Sha256};

use warden_types::errors::WardenError;

use crate::model::ToolSpec;

/// Sentinel stored in place of a hash when a server declared no instructions
/// at approval time. Distinct from the hash of the empty string.
pub const ABSENT_INSTRUCTIONS: &str = "absent";

/// Serialize a JSON value canonically.
///
/// Object keys are sorted lexicographically at every depth; array element
/// order is preserved; numbers keep their literal form; no insignificant
/// whitespace. Semantically identical documents (modulo key order) always
/// produce identical bytes.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(true) => out.push_str("true"),
        serde_json::Value::Bool(false) => out.push_str("false"),
        // serde_json's own Display keeps the literal form: integers print
        // without a fraction, floats keep one. That distinction must survive.
        serde_json::Value::Number(n) => out.push_str(&n.to_string()),
        serde_json::Value::String(s) => write_json_string(s, out),
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    // serde_json's string serialization is already minimal and cannot fail
    // for a &str.
    out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
}

/// Normalize a tool input schema prior to hashing or comparison.
///
/// The schema must be a JSON object (anything else is a malformed schema and
/// an error). Normalization rewrites every `required` key whose value is an
/// array of strings into a sorted, deduplicated array; all other arrays keep
/// their declared order.
pub fn normalize_schema(schema: &serde_json::Value) -> Result<serde_json::Value, WardenError> {
    if !schema.is_object() {
        return Err(WardenError::Canonical(format!(
            "input schema must be a JSON object, got {}",
            type_name(schema)
        )));
    }
    Ok(normalize_value(schema, false))
}

fn normalize_value(value: &serde_json::Value, in_required: bool) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, val) in map {
                out.insert(key.clone(), normalize_value(val, key == "required"));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            let mut normalized: Vec<serde_json::Value> =
                items.iter().map(|v| normalize_value(v, false)).collect();
            if in_required && normalized.iter().all(|v| v.is_string()) {
                normalized.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
                normalized.dedup();
            }
            serde_json::Value::Array(normalized)
        }
        other => other.clone(),
    }
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Strip at most one trailing newline, the only whitespace the
/// canonicalization forgives in text fields.
fn strip_trailing_newline(text: &str) -> &str {
    text.strip_suffix('\n').unwrap_or(text)
}

/// Hash a tool definition: SHA-256 over the canonical serialization of the
/// `[name, description, normalized_schema]` triple, lowercase hex.
pub fn hash_tool(spec: &ToolSpec) -> Result<String, WardenError> {
    let schema = normalize_schema(&spec.input_schema)?;
    let triple = serde_json::Value::Array(vec![
        serde_json::Value::String(spec.name.clone()),
        serde_json::Value::String(strip_trailing_newline(&spec.description).to_string()),
        schema,
    ]);
    Ok(sha256_hex(canonical_json(&triple).as_bytes()))
}

/// Hash server instructions, or return the sentinel when the server declared
/// none. `None` and `Some("")` hash differently by construction.
pub fn hash_instructions(instructions: Option<&str>) -> String {
    match instructions {
        None => ABSENT_INSTRUCTIONS.to_string(),
        Some(text) => sha256_hex(strip_trailing_newline(text).as_bytes()),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, description: &str, schema: serde_json::Value) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: schema,
        }
    }

    #[test]
    fn canonical_json_sorts_keys_at_every_depth() {
        let value = json!({"z": 1, "a": {"y": 2, "b": 3}});
        assert_eq!(canonical_json(&value), r#"{"a":{"b":3,"y":2},"z":1}"#);
    }

    #[test]
    fn canonical_json_preserves_array_order() {
        let value = json!({"enum": ["c", "a", "b"]});
        assert_eq!(canonical_json(&value), r#"{"enum":["c","a","b"]}"#);
    }

    #[test]
    fn canonical_json_keeps_numeric_literal_form() {
        let int_form: serde_json::Value = serde_json::from_str(r#"{"n": 1}"#).unwrap();
        let float_form: serde_json::Value = serde_json::from_str(r#"{"n": 1.0}"#).unwrap();
        assert_ne!(canonical_json(&int_form), canonical_json(&float_form));
    }

    #[test]
    fn normalize_schema_sorts_and_dedupes_required() {
        let schema = json!({
            "type": "object",
            "properties": {"b": {"type": "string"}, "a": {"type": "string"}},
            "required": ["b", "a", "b"]
        });
        let normalized = normalize_schema(&schema).unwrap();
        assert_eq!(normalized["required"], json!(["a", "b"]));
        // properties values keep their own content untouched
        assert_eq!(normalized["properties"]["a"], json!({"type": "string"}));
    }

    #[test]
    fn normalize_schema_rejects_non_objects() {
        assert!(normalize_schema(&json!("not a schema")).is_err());
        assert!(normalize_schema(&json!([1, 2])).is_err());
        assert!(normalize_schema(&json!(null)).is_err());
    }

    #[test]
    fn tool_hash_invariant_under_key_order_and_required_order() {
        let a = tool(
            "echo",
            "Echo input",
            json!({"type": "object", "properties": {"x": {"type": "string"}}, "required": ["x", "y"]}),
        );
        let b = tool(
            "echo",
            "Echo input",
            json!({"required": ["y", "x"], "properties": {"x": {"type": "string"}}, "type": "object"}),
        );
        assert_eq!(hash_tool(&a).unwrap(), hash_tool(&b).unwrap());
    }

    #[test]
    fn tool_hash_changes_with_description() {
        let base = tool("echo", "Echo input", json!({"type": "object"}));
        let changed = tool("echo", "Echo input twice", json!({"type": "object"}));
        assert_ne!(hash_tool(&base).unwrap(), hash_tool(&changed).unwrap());
    }

    #[test]
    fn tool_hash_changes_with_any_schema_field() {
        let base = tool(
            "echo",
            "Echo input",
            json!({"type": "object", "properties": {"x": {"type": "string"}}}),
        );
        let changed = tool(
            "echo",
            "Echo input",
            json!({"type": "object", "properties": {"x": {"type": "number"}}}),
        );
        assert_ne!(hash_tool(&base).unwrap(), hash_tool(&changed).unwrap());
    }

    #[test]
    fn tool_hash_forgives_exactly_one_trailing_newline() {
        let a = tool("echo", "Echo input", json!({"type": "object"}));
        let b = tool("echo", "Echo input\n", json!({"type": "object"}));
        let c = tool("echo", "Echo input\n\n", json!({"type": "object"}));
        assert_eq!(hash_tool(&a).unwrap(), hash_tool(&b).unwrap());
        assert_ne!(hash_tool(&a).unwrap(), hash_tool(&c).unwrap());
    }

    #[test]
    fn ansi_escapes_change_the_hash() {
        // Hashing runs pre-sanitization: an escape byte the sanitizer would
        // strip still counts as drift.
        let clean = tool("echo", "Echo input", json!({"type": "object"}));
        let hostile = tool("echo", "Echo input\x1b[31m", json!({"type": "object"}));
        assert_ne!(hash_tool(&clean).unwrap(), hash_tool(&hostile).unwrap());
    }

    #[test]
    fn instruction_hash_distinguishes_absent_from_empty() {
        let absent = hash_instructions(None);
        let empty = hash_instructions(Some(""));
        assert_eq!(absent, ABSENT_INSTRUCTIONS);
        assert_ne!(absent, empty);
    }

    #[test]
    fn instruction_hash_strips_one_trailing_newline() {
        assert_eq!(hash_instructions(Some("Hi")), hash_instructions(Some("Hi\n")));
        assert_ne!(
            hash_instructions(Some("Hi")),
            hash_instructions(Some("Hi\n\n"))
        );
        assert_ne!(hash_instructions(Some("Hi")), hash_instructions(Some("Hi!")));
    }

    #[test]
    fn hashes_are_lowercase_hex() {
        let digest = hash_instructions(Some("Hi"));
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
