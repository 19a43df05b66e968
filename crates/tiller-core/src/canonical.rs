// Canonical JSON, checksums, and structural diffs
//
// Canonical form: JSON with object keys emitted in sorted order at every
// nesting level. Checksums are SHA-256 hex over that form, so two
// definitions that differ only in key order hash identically.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

/// Rebuild a value with object keys in sorted order at every level
pub fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let mut out = Map::with_capacity(map.len());
            for (key, nested) in sorted {
                out.insert(key.clone(), sort_keys(nested));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Serialize to the canonical string form
pub fn to_canonical_json(value: &Value) -> String {
    serde_json::to_string(&sort_keys(value)).unwrap_or_else(|_| "null".to_string())
}

/// SHA-256 hex digest over the canonical form
pub fn checksum(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(to_canonical_json(value).as_bytes());
    hex::encode(hasher.finalize())
}

/// Truncated payload fingerprint (first 16 hex chars of the checksum)
pub fn payload_fingerprint(value: &Value) -> String {
    let mut digest = checksum(value);
    digest.truncate(16);
    digest
}

/// Structural diff between two definitions.
///
/// With no prior definition the whole new value is reported as added.
/// Otherwise the result classifies dotted paths into `added`, `removed`,
/// and `modified` (the latter as `{old, new}` pairs), recursing through
/// objects and equal-length arrays. Arrays whose length changed are
/// reported as a single modified path.
pub fn diff(old: Option<&Value>, new: &Value) -> Value {
    let Some(old) = old else {
        return json!({ "added": new.clone() });
    };

    let mut added = Map::new();
    let mut removed = Map::new();
    let mut modified = Map::new();
    walk(old, new, "", &mut added, &mut removed, &mut modified);

    json!({
        "added": Value::Object(added),
        "removed": Value::Object(removed),
        "modified": Value::Object(modified),
    })
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

fn walk(
    old: &Value,
    new: &Value,
    path: &str,
    added: &mut Map<String, Value>,
    removed: &mut Map<String, Value>,
    modified: &mut Map<String, Value>,
) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, new_value) in new_map {
                match old_map.get(key) {
                    None => {
                        added.insert(join(path, key), new_value.clone());
                    }
                    Some(old_value) => {
                        walk(old_value, new_value, &join(path, key), added, removed, modified);
                    }
                }
            }
            for (key, old_value) in old_map {
                if !new_map.contains_key(key) {
                    removed.insert(join(path, key), old_value.clone());
                }
            }
        }
        (Value::Array(old_items), Value::Array(new_items))
            if old_items.len() == new_items.len() =>
        {
            for (index, (old_item, new_item)) in old_items.iter().zip(new_items).enumerate() {
                walk(
                    old_item,
                    new_item,
                    &join(path, &index.to_string()),
                    added,
                    removed,
                    modified,
                );
            }
        }
        _ => {
            if old != new {
                modified.insert(
                    path.to_string(),
                    json!({ "old": old.clone(), "new": new.clone() }),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_order_does_not_affect_canonical_form() {
        let a = json!({"b": 1, "a": {"d": 2, "c": 3}});
        let b = json!({"a": {"c": 3, "d": 2}, "b": 1});
        assert_eq!(to_canonical_json(&a), to_canonical_json(&b));
        assert_eq!(checksum(&a), checksum(&b));
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let a = json!({"name": "w", "tasks": []});
        let b = json!({"name": "w2", "tasks": []});
        assert_ne!(checksum(&a), checksum(&b));
    }

    #[test]
    fn test_fingerprint_is_sixteen_hex_chars() {
        let fp = payload_fingerprint(&json!({"k": "v"}));
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_diff_without_prior_reports_everything_added() {
        let new = json!({"name": "w"});
        let d = diff(None, &new);
        assert_eq!(d["added"], new);
    }

    #[test]
    fn test_diff_classifies_added_removed_modified() {
        let old = json!({"name": "w", "timeout": 5, "legacy": true});
        let new = json!({"name": "w2", "timeout": 5, "owner": "ops"});
        let d = diff(Some(&old), &new);

        assert_eq!(d["added"]["owner"], json!("ops"));
        assert_eq!(d["removed"]["legacy"], json!(true));
        assert_eq!(d["modified"]["name"], json!({"old": "w", "new": "w2"}));
        assert!(d["modified"].get("timeout").is_none());
    }

    #[test]
    fn test_diff_recurses_into_task_arrays() {
        let old = json!({"tasks": [{"name": "fetch"}, {"name": "old"}]});
        let new = json!({"tasks": [{"name": "fetch"}, {"name": "new"}]});
        let d = diff(Some(&old), &new);
        assert_eq!(
            d["modified"]["tasks.1.name"],
            json!({"old": "old", "new": "new"})
        );
    }

    #[test]
    fn test_diff_length_changed_array_is_one_entry() {
        let old = json!({"tasks": [1, 2]});
        let new = json!({"tasks": [1, 2, 3]});
        let d = diff(Some(&old), &new);
        assert_eq!(
            d["modified"]["tasks"],
            json!({"old": [1, 2], "new": [1, 2, 3]})
        );
    }

    #[test]
    fn test_diff_of_identical_values_is_empty() {
        let v = json!({"a": [1, {"b": 2}]});
        let d = diff(Some(&v), &v);
        assert_eq!(d["added"], json!({}));
        assert_eq!(d["removed"], json!({}));
        assert_eq!(d["modified"], json!({}));
    }
}
