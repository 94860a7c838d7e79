//! Response body checks: required keys, the shallow type map and the
//! recursive schema.
//!
//! Checks return human-readable issues; the executor decides the verdict.

use core_types::{DeepSchema, JsonType};
use serde_json::Value;
use std::collections::BTreeMap;

/// Deepest nesting level the recursive schema walks into.
pub const MAX_SCHEMA_DEPTH: usize = 6;

/// Number of leading array items checked against `items`.
pub const MAX_ARRAY_ITEMS: usize = 10;

const MAX_REPORTED_ISSUES: usize = 3;

/// Required top-level keys absent from `body`. A non-object body is missing
/// every key.
pub fn missing_keys(required: &[String], body: &Value) -> Vec<String> {
    match body.as_object() {
        Some(object) => required
            .iter()
            .filter(|key| !object.contains_key(key.as_str()))
            .cloned()
            .collect(),
        None => required.to_vec(),
    }
}

/// Checks presence and type of each top-level key in `schema`.
pub fn check_shallow(schema: &BTreeMap<String, JsonType>, body: &Value) -> Vec<String> {
    let Some(object) = body.as_object() else {
        return vec![format!(
            "body: expected object, got {}",
            JsonType::name_of(body)
        )];
    };

    let mut issues = Vec::new();
    for (key, expected) in schema {
        match object.get(key) {
            None => issues.push(format!("missing {}", key)),
            Some(value) if !expected.matches(value) => issues.push(format!(
                "{}: expected {}, got {}",
                key,
                expected,
                JsonType::name_of(value)
            )),
            Some(_) => {}
        }
    }
    issues
}

/// Walks `body` against a recursive schema, reporting issues with
/// `$.a.b[0]` style paths.
pub fn check_deep(schema: &DeepSchema, body: &Value) -> Vec<String> {
    let mut issues = Vec::new();
    walk(schema, body, "$", 0, &mut issues);
    issues
}

fn walk(schema: &DeepSchema, value: &Value, path: &str, depth: usize, issues: &mut Vec<String>) {
    if depth > MAX_SCHEMA_DEPTH {
        return;
    }

    match schema {
        DeepSchema::Object {
            required,
            properties,
        } => {
            let Some(object) = value.as_object() else {
                issues.push(mismatch(path, "object", value));
                return;
            };
            for key in required {
                if !object.contains_key(key.as_str()) {
                    issues.push(format!("missing {}.{}", path, key));
                }
            }
            for (key, child) in properties {
                if let Some(field) = object.get(key) {
                    walk(child, field, &format!("{}.{}", path, key), depth + 1, issues);
                }
            }
        }
        DeepSchema::Array { items } => {
            let Some(array) = value.as_array() else {
                issues.push(mismatch(path, "array", value));
                return;
            };
            if let Some(items) = items {
                for (index, item) in array.iter().take(MAX_ARRAY_ITEMS).enumerate() {
                    walk(items, item, &format!("{}[{}]", path, index), depth + 1, issues);
                }
            }
        }
        leaf => {
            if let Some(expected) = leaf.leaf_type() {
                if !expected.matches(value) {
                    issues.push(mismatch(path, expected.as_str(), value));
                }
            }
        }
    }
}

fn mismatch(path: &str, expected: &str, value: &Value) -> String {
    format!("{}: expected {}, got {}", path, expected, JsonType::name_of(value))
}

/// `prefix: i1; i2; i3; …` with at most three issues listed.
pub fn format_issues(prefix: &str, issues: &[String]) -> String {
    let shown = issues
        .iter()
        .take(MAX_REPORTED_ISSUES)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("; ");
    if issues.len() > MAX_REPORTED_ISSUES {
        format!("{}: {}; …", prefix, shown)
    } else {
        format!("{}: {}", prefix, shown)
    }
}
