//! Accessors over OTLP-shaped JSON
//!
//! Attributes live as `[{"key": ..., "value": {"stringValue": ...}}]`
//! arrays on resources, scopes, datapoints and log records. These helpers
//! look keys up, unwrap the `AnyValue` wrapper, and flatten log bodies.

use std::collections::BTreeMap;

use serde_json::Value;

use super::merge::MergeError;

/// Wrapped value of `key` in `node["attributes"]`
pub fn attribute_value<'a>(node: &'a Value, key: &str) -> Option<&'a Value> {
    node.get("attributes")?
        .as_array()?
        .iter()
        .find(|a| a.get("key").and_then(Value::as_str) == Some(key))
        .and_then(|a| a.get("value"))
}

/// `stringValue` of `key` in `node["attributes"]`
pub fn attribute_string<'a>(node: &'a Value, key: &str) -> Option<&'a str> {
    attribute_value(node, key)?.get("stringValue")?.as_str()
}

/// Unwrap an OTLP `AnyValue` wrapper to a plain JSON scalar.
///
/// `intValue` arrives as a decimal string in OTLP JSON and is parsed back
/// to a number; unknown wrappers return None.
pub fn scalar_value(value: &Value) -> Option<Value> {
    if let Some(s) = value.get("stringValue") {
        return Some(s.clone());
    }
    if let Some(b) = value.get("boolValue") {
        return Some(b.clone());
    }
    if let Some(i) = value.get("intValue") {
        return match i {
            Value::String(s) => s.parse::<i64>().ok().map(Value::from),
            Value::Number(_) => Some(i.clone()),
            _ => None,
        };
    }
    if let Some(d) = value.get("doubleValue") {
        return Some(d.clone());
    }
    None
}

/// Scalar rendered as a plain string (booleans as "true"/"false")
pub fn scalar_to_string(value: &Value) -> String {
    match scalar_value(value) {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Check that `node["attributes"]` carries `key` with the expected scalar.
///
/// A boolean expectation also matches its string rendering: the mock feed
/// carries `boolValue` while ClickHouse maps store `"true"`.
pub fn has_attribute(node: &Value, key: &str, expected: &Value) -> bool {
    let Some(wrapped) = attribute_value(node, key) else {
        return false;
    };
    let Some(actual) = scalar_value(wrapped) else {
        return false;
    };
    if actual == *expected {
        return true;
    }
    match (expected, &actual) {
        (Value::Bool(b), Value::String(s)) => s == if *b { "true" } else { "false" },
        (Value::String(s), Value::Bool(b)) => s == if *b { "true" } else { "false" },
        _ => false,
    }
}

/// A `kvlistValue` attribute flattened into a string map
pub fn kvlist_map(node: &Value, key: &str) -> Option<BTreeMap<String, String>> {
    let values = attribute_value(node, key)?
        .get("kvlistValue")?
        .get("values")?
        .as_array()?;
    let mut map = BTreeMap::new();
    for pair in values {
        let k = pair.get("key")?.as_str()?.to_string();
        let v = pair
            .get("value")
            .map(scalar_to_string)
            .unwrap_or_default();
        map.insert(k, v);
    }
    Some(map)
}

/// All attributes of a node as a key -> string map
pub fn attr_map(node: &Value) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Some(attrs) = node.get("attributes").and_then(Value::as_array) {
        for attr in attrs {
            if let (Some(key), Some(value)) =
                (attr.get("key").and_then(Value::as_str), attr.get("value"))
            {
                map.insert(key.to_string(), scalar_to_string(value));
            }
        }
    }
    map
}

/// Numeric value of a metric datapoint (`asDouble` or `asInt`)
pub fn datapoint_value(datapoint: &Value) -> Option<f64> {
    if let Some(d) = datapoint.get("asDouble").and_then(Value::as_f64) {
        return Some(d);
    }
    match datapoint.get("asInt") {
        Some(Value::String(s)) => s.parse::<f64>().ok(),
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    }
}

/// All `body.stringValue` strings of a logs payload
pub fn log_bodies(payload: &Value) -> Vec<String> {
    let mut bodies = Vec::new();
    for resource_log in array(payload, "resourceLogs") {
        for scope_log in array(resource_log, "scopeLogs") {
            for record in array(scope_log, "logRecords") {
                if let Some(body) = record
                    .get("body")
                    .and_then(|b| b.get("stringValue"))
                    .and_then(Value::as_str)
                {
                    bodies.push(body.to_string());
                }
            }
        }
    }
    bodies
}

/// Per-payload log bodies of a JSON-Lines body (one payload per line)
pub fn log_bodies_per_line(content: &str) -> Result<Vec<Vec<String>>, MergeError> {
    Ok(payloads_per_line(content)?
        .iter()
        .map(log_bodies)
        .collect())
}

/// Per-payload `resourceLogs` entries of a JSON-Lines body
pub fn resource_logs_per_line(content: &str) -> Result<Vec<Vec<Value>>, MergeError> {
    Ok(payloads_per_line(content)?
        .into_iter()
        .map(|payload| array_owned(payload, "resourceLogs"))
        .collect())
}

fn payloads_per_line(content: &str) -> Result<Vec<Value>, MergeError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line.trim()).map_err(|e| MergeError::Parse {
                line: idx + 1,
                source: e,
            })
        })
        .collect()
}

fn array<'a>(node: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    node.get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter())
        .unwrap_or_default()
}

fn array_owned(mut node: Value, key: &str) -> Vec<Value> {
    match node.get_mut(key).map(Value::take) {
        Some(Value::Array(elements)) => elements,
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Value {
        json!({
            "attributes": [
                {"key": "otel.entity.event.type", "value": {"stringValue": "entity_state"}},
                {"key": "otel.entity.event_as_log", "value": {"boolValue": true}},
                {"key": "count", "value": {"intValue": "3"}},
                {"key": "otel.entity.id", "value": {"kvlistValue": {"values": [
                    {"key": "k8s.pod.name", "value": {"stringValue": "test-pod"}},
                    {"key": "k8s.namespace.name", "value": {"stringValue": "default"}},
                ]}}},
            ]
        })
    }

    #[test]
    fn test_attribute_string_found() {
        assert_eq!(
            attribute_string(&record(), "otel.entity.event.type"),
            Some("entity_state")
        );
    }

    #[test]
    fn test_attribute_string_missing() {
        assert_eq!(attribute_string(&record(), "nope"), None);
    }

    #[test]
    fn test_scalar_value_int_string() {
        let value = json!({"intValue": "42"});
        assert_eq!(scalar_value(&value), Some(json!(42)));
    }

    #[test]
    fn test_scalar_value_double() {
        let value = json!({"doubleValue": 1.5});
        assert_eq!(scalar_value(&value), Some(json!(1.5)));
    }

    #[test]
    fn test_has_attribute_exact() {
        assert!(has_attribute(
            &record(),
            "otel.entity.event.type",
            &json!("entity_state")
        ));
        assert!(!has_attribute(
            &record(),
            "otel.entity.event.type",
            &json!("entity_relationship_state")
        ));
    }

    #[test]
    fn test_has_attribute_bool_matches_string_form() {
        // The same flag arrives as boolValue from the mock feed and as
        // the string "true" from ClickHouse maps.
        assert!(has_attribute(
            &record(),
            "otel.entity.event_as_log",
            &json!(true)
        ));
        assert!(has_attribute(
            &record(),
            "otel.entity.event_as_log",
            &json!("true")
        ));
        assert!(!has_attribute(
            &record(),
            "otel.entity.event_as_log",
            &json!(false)
        ));
    }

    #[test]
    fn test_kvlist_map() {
        let map = kvlist_map(&record(), "otel.entity.id").unwrap();
        assert_eq!(map.get("k8s.pod.name").map(String::as_str), Some("test-pod"));
        assert_eq!(
            map.get("k8s.namespace.name").map(String::as_str),
            Some("default")
        );
    }

    #[test]
    fn test_kvlist_map_on_scalar_attribute() {
        assert!(kvlist_map(&record(), "otel.entity.event.type").is_none());
    }

    #[test]
    fn test_attr_map_renders_scalars() {
        let map = attr_map(&record());
        assert_eq!(
            map.get("otel.entity.event.type").map(String::as_str),
            Some("entity_state")
        );
        assert_eq!(
            map.get("otel.entity.event_as_log").map(String::as_str),
            Some("true")
        );
        assert_eq!(map.get("count").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_datapoint_value_variants() {
        assert_eq!(datapoint_value(&json!({"asDouble": 2.5})), Some(2.5));
        assert_eq!(datapoint_value(&json!({"asInt": "7"})), Some(7.0));
        assert_eq!(datapoint_value(&json!({"asInt": 7})), Some(7.0));
        assert_eq!(datapoint_value(&json!({})), None);
    }

    #[test]
    fn test_log_bodies_flattens_all_records() {
        let payload = json!({
            "resourceLogs": [{
                "scopeLogs": [
                    {"logRecords": [
                        {"body": {"stringValue": "one"}},
                        {"body": {"stringValue": "two"}},
                    ]},
                    {"logRecords": [{"body": {"stringValue": "three"}}]},
                ]
            }]
        });
        assert_eq!(log_bodies(&payload), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_log_bodies_per_line() {
        let line = json!({
            "resourceLogs": [{
                "scopeLogs": [{"logRecords": [{"body": {"stringValue": "a"}}]}]
            }]
        })
        .to_string();
        let bodies = log_bodies_per_line(&format!("{line}\n{line}")).unwrap();
        assert_eq!(bodies, vec![vec!["a".to_string()], vec!["a".to_string()]]);
    }

    #[test]
    fn test_resource_logs_per_line() {
        let line = json!({"resourceLogs": [{"resource": {}}, {"resource": {}}]}).to_string();
        let resources = resource_logs_per_line(&line).unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].len(), 2);
    }
}
