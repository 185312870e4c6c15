//! Dotted-path handling: validation, ancestor chains and the flatten /
//! unflatten pair that maps nested mappings onto leaf keys.
//!
//! A path is a non-empty sequence of non-empty elements joined by `.`. The
//! same functions are used for user paths (`a.b.c`) and for full backend
//! keys (`v:.a.b.c`), so the ancestor chain of a lock key naturally ends at
//! the tree prefix itself.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Separator between path elements.
pub const SEPARATOR: char = '.';

/// Checks that `key` is a valid dotted path.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidPath(
            "key or a part of it may not be empty".into(),
        ));
    }
    if key.starts_with(SEPARATOR) || key.ends_with(SEPARATOR) {
        return Err(Error::InvalidPath(format!(
            "key may not start or end with a dot: {}",
            key
        )));
    }
    if key.contains("..") {
        return Err(Error::InvalidPath(format!(
            "key may not contain successive dots: {}",
            key
        )));
    }
    Ok(())
}

/// Checks that a single path element is valid.
pub fn validate_element(elem: &str) -> Result<()> {
    if elem.is_empty() {
        return Err(Error::InvalidPath("path elements may not be empty".into()));
    }
    if elem.contains(SEPARATOR) {
        return Err(Error::InvalidPath(format!(
            "path elements may not contain a dot: {}",
            elem
        )));
    }
    Ok(())
}

/// Returns `key` followed by all of its ancestors, deepest first.
///
/// The chain stops once no separator is left, so the chain of a full
/// backend key ends at the bare tree prefix:
/// `l:.a.b` yields `["l:.a.b", "l:.a", "l:"]`.
pub fn key_hierarchy(key: &str) -> Vec<String> {
    let mut keys = vec![key.to_string()];
    let mut rest = key;
    while let Some(idx) = rest.rfind(SEPARATOR) {
        rest = &rest[..idx];
        keys.push(rest.to_string());
    }
    keys
}

/// Flattens `nested` into `(dotted_leaf, scalar)` pairs by depth-first
/// traversal. Empty sub-mappings yield nothing.
pub fn flatten<'a>(nested: &'a Map<String, Value>, prefix: &str) -> Vec<(String, &'a Value)> {
    let mut leaves = Vec::new();
    collect_leaves(nested, prefix, &mut leaves);
    leaves
}

fn collect_leaves<'a>(
    nested: &'a Map<String, Value>,
    prefix: &str,
    leaves: &mut Vec<(String, &'a Value)>,
) {
    for (key, value) in nested {
        let leaf_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}{}{}", prefix, SEPARATOR, key)
        };
        match value {
            Value::Object(map) => collect_leaves(map, &leaf_key, leaves),
            _ => leaves.push((leaf_key, value)),
        }
    }
}

/// Writes `value` at the dotted location `key` inside `nested`, creating
/// intermediate mappings as needed.
///
/// A non-mapping value met along the way is overwritten with a fresh
/// mapping. Subtree reassembly feeds keys in backend scan order, which may
/// interleave a shallow scalar with deeper descendants; the last write wins.
pub fn unflatten(nested: &mut Map<String, Value>, key: &str, value: Value) {
    let mut parts: Vec<&str> = key.split(SEPARATOR).collect();
    let last = match parts.pop() {
        Some(last) => last,
        None => return,
    };
    let mut curr = nested;
    for part in parts {
        let slot = curr
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        curr = match slot {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
    }
    curr.insert(last.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Map<String, Value> {
        match json!({
            "a": {
                "b": 2,
                "c": {
                    "d": 9,
                    "e": {
                        "f": 42,
                    }
                }
            },
            "g": 3
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn flatten_extracts_leaves() {
        assert!(flatten(&Map::new(), "").is_empty());

        let nested = sample();
        let mut leaves: Vec<(String, Value)> = flatten(&nested, "")
            .into_iter()
            .map(|(k, v)| (k, v.clone()))
            .collect();
        leaves.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            leaves,
            vec![
                ("a.b".to_string(), json!(2)),
                ("a.c.d".to_string(), json!(9)),
                ("a.c.e.f".to_string(), json!(42)),
                ("g".to_string(), json!(3)),
            ]
        );
    }

    #[test]
    fn flatten_skips_empty_mappings() {
        let nested = match json!({"a": {}, "b": 1}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let leaves = flatten(&nested, "pre");
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].0, "pre.b");
    }

    #[test]
    fn unflatten_rebuilds_nested() {
        let mut nested = Map::new();
        unflatten(&mut nested, "a.c.e.f", json!(42));
        unflatten(&mut nested, "a.c.d", json!(9));
        unflatten(&mut nested, "a.b", json!(2));
        unflatten(&mut nested, "g", json!(3));
        assert_eq!(Value::Object(nested), Value::Object(sample()));
    }

    #[test]
    fn unflatten_overwrites_scalars_on_the_way() {
        let mut nested = Map::new();
        unflatten(&mut nested, "a.c.e", json!(2));
        unflatten(&mut nested, "a.c.e.f", json!({"deep": "nested"}));
        assert_eq!(nested["a"]["c"]["e"]["f"]["deep"], json!("nested"));
    }

    #[test]
    fn validate_key_rejects_malformed_paths() {
        assert!(validate_key("").is_err());
        assert!(validate_key(".a").is_err());
        assert!(validate_key("a.").is_err());
        assert!(validate_key("a..b").is_err());
        assert!(validate_key("a.b").is_ok());
    }

    #[test]
    fn validate_element_rejects_dots() {
        assert!(validate_element("").is_err());
        assert!(validate_element("a.b").is_err());
        assert!(validate_element("ab").is_ok());
    }

    #[test]
    fn hierarchy_is_deepest_first() {
        assert_eq!(key_hierarchy("a.b.c"), vec!["a.b.c", "a.b", "a"]);
        assert_eq!(key_hierarchy("a"), vec!["a"]);
        assert_eq!(key_hierarchy("l:.a.b"), vec!["l:.a.b", "l:.a", "l:"]);
        assert_eq!(key_hierarchy("l:"), vec!["l:"]);
    }
}
