//! JSON merge patches
//!
//! Updates are sent as a three-way merge patch: fields changed or added
//! relative to the live object are set, fields present in the previously
//! applied object but dropped from the wanted one are removed. Fields only
//! the server knows about are left alone.

use serde_json::{Map, Value as JsonValue};

/// Merge patch turning `live` into `wanted`
///
/// `original` is the object as last applied, `None` when there is no record
/// of it. Lists are replaced as a whole.
pub fn three_way_merge_patch(
    original: Option<&JsonValue>,
    wanted: &JsonValue,
    live: &JsonValue,
) -> JsonValue {
    match (wanted, live) {
        (JsonValue::Object(wanted), JsonValue::Object(live)) => JsonValue::Object(object_patch(
            original.and_then(JsonValue::as_object),
            wanted,
            live,
        )),
        _ => wanted.clone(),
    }
}

fn object_patch(
    original: Option<&Map<String, JsonValue>>,
    wanted: &Map<String, JsonValue>,
    live: &Map<String, JsonValue>,
) -> Map<String, JsonValue> {
    let mut patch = Map::new();
    for (key, want) in wanted {
        match (live.get(key), want) {
            (Some(JsonValue::Object(have)), JsonValue::Object(want)) => {
                let original = original
                    .and_then(|o| o.get(key))
                    .and_then(JsonValue::as_object);
                let nested = object_patch(original, want, have);
                if !nested.is_empty() {
                    patch.insert(key.clone(), JsonValue::Object(nested));
                }
            }
            (Some(have), want) if have == want => {}
            (None, JsonValue::Null) => {}
            _ => {
                patch.insert(key.clone(), want.clone());
            }
        }
    }
    if let Some(original) = original {
        for key in original.keys() {
            if !wanted.contains_key(key) && live.contains_key(key) {
                patch.insert(key.clone(), JsonValue::Null);
            }
        }
    }
    patch
}

/// Whether applying `patch` changes nothing
pub fn is_empty_patch(patch: &JsonValue) -> bool {
    patch.as_object().is_some_and(Map::is_empty)
}

/// Apply an RFC 7386 merge patch in place
pub fn apply_merge_patch(target: &mut JsonValue, patch: &JsonValue) {
    let JsonValue::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = JsonValue::Object(Map::new());
    }
    if let JsonValue::Object(map) = target {
        for (key, value) in patch {
            if value.is_null() {
                map.remove(key);
            } else {
                apply_merge_patch(map.entry(key.clone()).or_insert(JsonValue::Null), value);
            }
        }
    }
}

/// `live` with `wanted` merged in, the object the cluster would hold after
/// an update
pub fn merged(original: Option<&JsonValue>, wanted: &JsonValue, live: &JsonValue) -> JsonValue {
    let patch = three_way_merge_patch(original, wanted, live);
    let mut result = live.clone();
    apply_merge_patch(&mut result, &patch);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unchanged_object_gives_empty_patch() {
        let wanted = json!({ "metadata": { "name": "a" }, "data": { "k": "v" } });
        let live = json!({
            "metadata": { "name": "a", "uid": "42" },
            "data": { "k": "v" }
        });
        let patch = three_way_merge_patch(Some(&wanted), &wanted, &live);
        assert!(is_empty_patch(&patch));
    }

    #[test]
    fn test_removed_field_is_nulled() {
        let original = json!({ "data": { "a": "1", "b": "2" } });
        let wanted = json!({ "data": { "a": "1" } });
        let live = json!({ "data": { "a": "1", "b": "2", "c": "server" } });
        let patch = three_way_merge_patch(Some(&original), &wanted, &live);
        assert_eq!(patch, json!({ "data": { "b": null } }));

        let result = merged(Some(&original), &wanted, &live);
        assert_eq!(result, json!({ "data": { "a": "1", "c": "server" } }));
    }

    #[test]
    fn test_without_original_nothing_is_removed() {
        let wanted = json!({ "spec": { "replicas": 3 } });
        let live = json!({ "spec": { "replicas": 1, "paused": false } });
        let patch = three_way_merge_patch(None, &wanted, &live);
        assert_eq!(patch, json!({ "spec": { "replicas": 3 } }));
    }

    #[test]
    fn test_lists_are_replaced() {
        let wanted = json!({ "ports": [{ "port": 80 }] });
        let live = json!({ "ports": [{ "port": 80 }, { "port": 443 }] });
        let mut target = live.clone();
        apply_merge_patch(&mut target, &three_way_merge_patch(None, &wanted, &live));
        assert_eq!(target, wanted);
    }
}
