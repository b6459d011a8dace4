//! Deep-merge semantics for state patches.
//!
//! A patch is applied to a base JSON object key by key: nested objects
//! recurse, a `null` leaf deletes the destination key, and everything else
//! (including arrays) overwrites. Arrays are never concatenated. See the
//! `update_state` entry of the Session Store's contract for the full
//! semantics this implements.
//!
//! # Examples
//!
//! ```
//! use datacat_common::deep_merge;
//! use serde_json::json;
//!
//! let base = json!({"window_state": {"open": ["w1"], "active": "w1"}, "memory": {"footprint_mb": 50}});
//! let patch = json!({"window_state": {"open": ["w1", "w2"]}});
//! let merged = deep_merge(&base, &patch);
//! assert_eq!(
//!     merged,
//!     json!({"window_state": {"open": ["w1", "w2"], "active": "w1"}, "memory": {"footprint_mb": 50}})
//! );
//!
//! let patch2 = json!({"window_state": {"active": null}});
//! let merged2 = deep_merge(&merged, &patch2);
//! assert_eq!(
//!     merged2,
//!     json!({"window_state": {"open": ["w1", "w2"]}, "memory": {"footprint_mb": 50}})
//! );
//! ```

use serde_json::{Map, Value};

/// Merge `patch` onto `base`, returning the result. Neither argument is
/// mutated in place; callers that want to update in place should assign the
/// result back.
pub fn deep_merge(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            let mut result = base_map.clone();
            merge_object(&mut result, patch_map);
            Value::Object(result)
        }
        // A patch that isn't an object (or a base that isn't) simply
        // replaces the base wholesale; this only arises for malformed
        // top-level state, since the Store enforces an object-shaped tree.
        _ => patch.clone(),
    }
}

fn merge_object(base: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, patch_value) in patch {
        match patch_value {
            Value::Null => {
                base.remove(key);
            }
            Value::Object(patch_child) => match base.get_mut(key) {
                Some(Value::Object(base_child)) => merge_object(base_child, patch_child),
                _ => {
                    base.insert(key.clone(), Value::Object(patch_child.clone()));
                }
            },
            other => {
                base.insert(key.clone(), other.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merges_nested_objects() {
        let base = json!({"a": 1, "b": {"x": 10}});
        let patch = json!({"b": {"y": 20}, "c": 3});
        assert_eq!(deep_merge(&base, &patch), json!({"a": 1, "b": {"x": 10, "y": 20}, "c": 3}));
    }

    #[test]
    fn null_leaf_deletes_key() {
        let base = json!({"a": 1, "b": 2});
        let patch = json!({"a": null});
        assert_eq!(deep_merge(&base, &patch), json!({"b": 2}));
    }

    #[test]
    fn arrays_overwrite_never_concatenate() {
        let base = json!({"tags": ["a", "b"]});
        let patch = json!({"tags": ["c"]});
        assert_eq!(deep_merge(&base, &patch), json!({"tags": ["c"]}));
    }

    #[test]
    fn keys_not_in_patch_are_preserved() {
        let base = json!({"a": 1, "b": {"c": 2, "d": 3}});
        let patch = json!({"b": {"c": 99}});
        let merged = deep_merge(&base, &patch);
        assert_eq!(merged["a"], json!(1));
        assert_eq!(merged["b"]["d"], json!(3));
    }

    #[test]
    fn applying_a_patch_twice_is_idempotent() {
        let base = json!({"window_state": {"open": ["w1"], "active": "w1"}});
        let patch = json!({"window_state": {"open": ["w1", "w2"]}});
        let once = deep_merge(&base, &patch);
        let twice = deep_merge(&once, &patch);
        assert_eq!(once, twice);
    }

    #[test]
    fn end_to_end_scenario_from_spec() {
        let initial = json!({
            "window_state": {"open": ["w1"], "active": "w1"},
            "memory": {"footprint_mb": 50},
        });
        let after_patch1 = deep_merge(&initial, &json!({"window_state": {"open": ["w1", "w2"]}}));
        assert_eq!(
            after_patch1,
            json!({
                "window_state": {"open": ["w1", "w2"], "active": "w1"},
                "memory": {"footprint_mb": 50},
            })
        );
        let after_patch2 = deep_merge(&after_patch1, &json!({"window_state": {"active": null}}));
        assert_eq!(
            after_patch2,
            json!({
                "window_state": {"open": ["w1", "w2"]},
                "memory": {"footprint_mb": 50},
            })
        );
    }
}
