//! Attribute sorting and sanitization
//!
//! The collector emits attribute arrays in whatever order its pipeline
//! produced them, and retried exports can repeat keys. Normalization makes
//! two payloads carrying the same information structurally equal so the
//! merge layer and the fixture matcher can compare them byte-wise.

use serde_json::{Map, Value};

/// Normalize a payload in place: every attribute-shaped array (an array
/// whose elements are all objects with a string `key` field — resource,
/// scope, datapoint and log-record `attributes`, and `kvlistValue.values`)
/// is sorted by key with duplicate keys collapsed to the last value.
pub fn normalize(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for v in map.values_mut() {
                normalize(v);
            }
        }
        Value::Array(elements) => {
            for e in elements.iter_mut() {
                normalize(e);
            }
            if is_attribute_shaped(elements) {
                collapse_and_sort_by_key(elements);
            }
        }
        _ => {}
    }
}

/// Deterministic serialization: object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&canonical(value)).unwrap_or_default()
}

/// Canonical serialization with 2-space indentation, for fixture files.
pub fn canonical_pretty(value: &Value) -> String {
    serde_json::to_string_pretty(&canonical(value)).unwrap_or_default()
}

/// Clone with object keys sorted recursively. Relies on serde_json's
/// preserve_order map keeping insertion order.
pub fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonical(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(elements) => Value::Array(elements.iter().map(canonical).collect()),
        _ => value.clone(),
    }
}

fn is_attribute_shaped(elements: &[Value]) -> bool {
    !elements.is_empty()
        && elements
            .iter()
            .all(|e| e.get("key").map(Value::is_string).unwrap_or(false))
}

fn collapse_and_sort_by_key(elements: &mut Vec<Value>) {
    // Last occurrence of a key wins, then sort for stable comparisons.
    let drained = std::mem::take(elements);
    let mut by_key: Vec<(String, Value)> = Vec::with_capacity(drained.len());
    for element in drained {
        let key = element
            .get("key")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if let Some(slot) = by_key.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = element;
        } else {
            by_key.push((key, element));
        }
    }
    by_key.sort_by(|(a, _), (b, _)| a.cmp(b));
    *elements = by_key.into_iter().map(|(_, e)| e).collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_sorts_attributes_by_key() {
        let mut value = json!({
            "attributes": [
                {"key": "b", "value": {"stringValue": "2"}},
                {"key": "a", "value": {"stringValue": "1"}},
            ]
        });
        normalize(&mut value);
        let keys: Vec<&str> = value["attributes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["key"].as_str().unwrap())
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_normalize_duplicate_key_last_wins() {
        let mut value = json!({
            "attributes": [
                {"key": "a", "value": {"stringValue": "old"}},
                {"key": "a", "value": {"stringValue": "new"}},
            ]
        });
        normalize(&mut value);
        let attrs = value["attributes"].as_array().unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0]["value"]["stringValue"], "new");
    }

    #[test]
    fn test_normalize_sorts_kvlist_values() {
        let mut value = json!({
            "key": "otel.entity.id",
            "value": {"kvlistValue": {"values": [
                {"key": "k8s.pod.name", "value": {"stringValue": "p"}},
                {"key": "k8s.namespace.name", "value": {"stringValue": "n"}},
            ]}}
        });
        normalize(&mut value);
        let values = value["value"]["kvlistValue"]["values"].as_array().unwrap();
        assert_eq!(values[0]["key"], "k8s.namespace.name");
        assert_eq!(values[1]["key"], "k8s.pod.name");
    }

    #[test]
    fn test_normalize_leaves_unkeyed_arrays_alone() {
        let mut value = json!({"dataPoints": [{"asInt": "2"}, {"asInt": "1"}]});
        let before = value.clone();
        normalize(&mut value);
        assert_eq!(value, before);
    }

    #[test]
    fn test_normalize_recurses_into_nested_structures() {
        let mut value = json!({
            "resourceMetrics": [{
                "resource": {"attributes": [
                    {"key": "z", "value": {"stringValue": "1"}},
                    {"key": "a", "value": {"stringValue": "2"}},
                ]}
            }]
        });
        normalize(&mut value);
        let attrs = value["resourceMetrics"][0]["resource"]["attributes"]
            .as_array()
            .unwrap();
        assert_eq!(attrs[0]["key"], "a");
        assert_eq!(attrs[1]["key"], "z");
    }

    #[test]
    fn test_canonical_json_sorts_object_keys() {
        let value = json!({"b": 1, "a": {"d": 2, "c": 3}});
        assert_eq!(canonical_json(&value), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn test_canonical_json_is_order_insensitive() {
        let one = json!({"x": 1, "y": [{"b": 2, "a": 3}]});
        let two = json!({"y": [{"a": 3, "b": 2}], "x": 1});
        assert_eq!(canonical_json(&one), canonical_json(&two));
    }

    #[test]
    fn test_canonical_pretty_ends_with_closing_brace() {
        let rendered = canonical_pretty(&json!({"a": 1}));
        assert!(rendered.starts_with('{'));
        assert!(rendered.contains("\"a\": 1"));
    }
}
