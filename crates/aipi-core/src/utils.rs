//! Small helpers shared across the crate.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;

/// Default length of ids produced by [`create_id`].
pub const DEFAULT_ID_LENGTH: usize = 8;

/// Random alphanumeric id of the given length.
///
/// Used for resource ids and by adapters that mint their own chat and run
/// ids. Not suitable for anything security-sensitive.
pub fn create_id(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Deep-merge `patch` into `base`.
///
/// - objects merge key by key, recursively
/// - arrays and scalars in `patch` replace the value in `base` wholesale
/// - `null` in `patch` is skipped, leaving the base value untouched
pub fn merge_objects(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                if patch_value.is_null() {
                    continue;
                }
                let nested = patch_value.is_object()
                    && base_map.get(key).is_some_and(Value::is_object);
                if !nested {
                    base_map.insert(key.clone(), patch_value.clone());
                } else if let Some(existing) = base_map.get_mut(key) {
                    merge_objects(existing, patch_value);
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// Owned variant of [`merge_objects`].
pub fn merged(mut base: Value, patch: &Value) -> Value {
    merge_objects(&mut base, patch);
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_id_has_requested_length_and_charset() {
        let id = create_id(DEFAULT_ID_LENGTH);
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(create_id(16), create_id(16));
    }

    #[test]
    fn merge_recurses_into_objects() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "b": "keep"});
        merge_objects(&mut base, &json!({"a": {"y": 3, "z": 4}}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 3, "z": 4}, "b": "keep"}));
    }

    #[test]
    fn merge_replaces_arrays() {
        let base = json!({"list": [1, 2, 3]});
        let out = merged(base, &json!({"list": [9]}));
        assert_eq!(out, json!({"list": [9]}));
    }

    #[test]
    fn merge_skips_null_values() {
        let base = json!({"a": 1, "b": 2});
        let out = merged(base, &json!({"a": null, "b": 5}));
        assert_eq!(out, json!({"a": 1, "b": 5}));
    }

    #[test]
    fn merge_into_non_object_replaces() {
        let out = merged(Value::Null, &json!({"a": 1}));
        assert_eq!(out, json!({"a": 1}));
    }
}
