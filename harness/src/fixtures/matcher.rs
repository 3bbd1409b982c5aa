//! Expected-case matching over OTLP-shaped payloads

use std::collections::BTreeMap;

use serde_json::Value;

use super::{AttrExpectation, EventSpec, ExpectedCase};
use crate::otlp::attrs::{attribute_value, scalar_value};

/// Scalar equality with the bool/string bridge: ClickHouse attribute maps
/// store booleans as "true"/"false" strings while fixtures may carry
/// either form.
fn scalars_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (expected, actual) {
        (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => {
            s == if *b { "true" } else { "false" }
        }
        _ => false,
    }
}

/// Check attribute requirements against a node carrying `attributes`
pub fn attributes_match(node: &Value, expected: &[AttrExpectation]) -> bool {
    expected.iter().all(|requirement| {
        let Some(wrapped) = attribute_value(node, &requirement.key) else {
            return false;
        };
        match &requirement.value {
            None => true,
            Some(expected_value) => scalar_value(wrapped)
                .map(|actual| scalars_equal(&actual, expected_value))
                .unwrap_or(false),
        }
    })
}

/// Check expected `{key, value?}` pairs against a kvlist attribute value.
/// Pairs without a value only require the key to be present.
pub fn kv_pairs_match(actual_wrapped: &Value, expected_pairs: &[Value]) -> bool {
    if expected_pairs.is_empty() {
        return true;
    }
    let Some(values) = actual_wrapped
        .get("kvlistValue")
        .and_then(|k| k.get("values"))
        .and_then(Value::as_array)
    else {
        return false;
    };

    let mut actual: BTreeMap<&str, Value> = BTreeMap::new();
    for pair in values {
        if let (Some(key), Some(value)) = (
            pair.get("key").and_then(Value::as_str),
            pair.get("value").and_then(scalar_value),
        ) {
            actual.insert(key, value);
        }
    }

    expected_pairs.iter().all(|pair| {
        let Some(key) = pair.get("key").and_then(Value::as_str) else {
            return false;
        };
        match actual.get(key) {
            None => false,
            Some(actual_value) => pair
                .get("value")
                .map(|expected_value| scalars_equal(actual_value, expected_value))
                .unwrap_or(true),
        }
    })
}

/// Check one expected event against a log record.
///
/// An expected empty list marks the attribute as optional: it may be
/// missing entirely or carry any value.
pub fn log_record_matches(record: &Value, event: &EventSpec) -> bool {
    for (key, expected) in event {
        if matches!(expected, Value::Array(pairs) if pairs.is_empty()) {
            continue;
        }
        let Some(actual) = attribute_value(record, key) else {
            return false;
        };
        let matched = match expected {
            Value::Array(pairs) => kv_pairs_match(actual, pairs),
            scalar => scalar_value(actual)
                .map(|actual| scalars_equal(&actual, scalar))
                .unwrap_or(false),
        };
        if !matched {
            return false;
        }
    }
    true
}

/// Whether an expected event exists somewhere in the payloads, inside a
/// resource and scope satisfying the case's attribute requirements
pub fn event_found(payloads: &[Value], case: &ExpectedCase, event: &EventSpec) -> bool {
    for payload in payloads {
        for resource_log in payload
            .get("resourceLogs")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let resource = resource_log.get("resource").cloned().unwrap_or_default();
            if !attributes_match(&resource, &case.resource_attributes) {
                continue;
            }
            for scope_log in resource_log
                .get("scopeLogs")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                let scope = scope_log.get("scope").cloned().unwrap_or_default();
                if !attributes_match(&scope, &case.scope_attributes) {
                    continue;
                }
                for record in scope_log
                    .get("logRecords")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    if log_record_matches(record, event) {
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Expected events of the case not present in the payloads
pub fn missing_events<'a>(payloads: &[Value], case: &'a ExpectedCase) -> Vec<&'a EventSpec> {
    case.events
        .iter()
        .filter(|event| !event_found(payloads, case, event))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "resourceLogs": [{
                "resource": {"attributes": [
                    {"key": "sw.k8s.cluster.uid", "value": {"stringValue": "uid-1"}},
                ]},
                "scopeLogs": [{
                    "scope": {"attributes": [
                        {"key": "otel.entity.event_as_log", "value": {"stringValue": "true"}},
                    ]},
                    "logRecords": [{
                        "timeUnixNano": "1",
                        "attributes": [
                            {"key": "otel.entity.event.type", "value": {"stringValue": "entity_state"}},
                            {"key": "otel.entity.type", "value": {"stringValue": "KubernetesPod"}},
                            {"key": "otel.entity.id", "value": {"kvlistValue": {"values": [
                                {"key": "k8s.namespace.name", "value": {"stringValue": "test-namespace"}},
                                {"key": "k8s.pod.name", "value": {"stringValue": "test-pod"}},
                            ]}}},
                        ]
                    }]
                }]
            }]
        })
    }

    fn case() -> ExpectedCase {
        serde_json::from_value(json!({
            "resource_attributes": [],
            "scope_attributes": [{"key": "otel.entity.event_as_log", "value": "true"}],
            "events": [{
                "otel.entity.event.type": "entity_state",
                "otel.entity.type": "KubernetesPod",
                "otel.entity.id": [
                    {"key": "k8s.namespace.name", "value": "test-namespace"},
                    {"key": "k8s.pod.name", "value": "test-pod"},
                ],
                "otel.entity.attributes": []
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_event_found_in_matching_scope() {
        assert!(missing_events(&[payload()], &case()).is_empty());
    }

    #[test]
    fn test_event_missing_when_pod_differs() {
        let mut case = case();
        case.events[0].insert(
            "otel.entity.id".to_string(),
            json!([{"key": "k8s.pod.name", "value": "other-pod"}]),
        );
        assert_eq!(missing_events(&[payload()], &case).len(), 1);
    }

    #[test]
    fn test_scope_requirement_gates_matching() {
        let mut case = case();
        case.scope_attributes = vec![AttrExpectation {
            key: "nonexistent".to_string(),
            value: None,
        }];
        assert_eq!(missing_events(&[payload()], &case).len(), 1);
    }

    #[test]
    fn test_key_only_pair_requires_presence() {
        let mut case = case();
        // Digest values are too brittle to pin; presence is enough.
        case.events[0].insert(
            "otel.entity.id".to_string(),
            json!([{"key": "k8s.pod.name"}]),
        );
        assert!(missing_events(&[payload()], &case).is_empty());

        case.events[0].insert(
            "otel.entity.id".to_string(),
            json!([{"key": "oci.manifest.digest"}]),
        );
        assert_eq!(missing_events(&[payload()], &case).len(), 1);
    }

    #[test]
    fn test_empty_expected_list_is_optional() {
        // "otel.entity.attributes" is absent from the record entirely.
        assert!(missing_events(&[payload()], &case()).is_empty());
    }

    #[test]
    fn test_scalar_mismatch_fails() {
        let mut case = case();
        case.events[0].insert(
            "otel.entity.event.type".to_string(),
            json!("entity_relationship_state"),
        );
        assert_eq!(missing_events(&[payload()], &case).len(), 1);
    }

    #[test]
    fn test_bool_string_bridge() {
        let record = json!({"attributes": [
            {"key": "flag", "value": {"boolValue": true}},
        ]});
        assert!(attributes_match(
            &record,
            &[AttrExpectation {
                key: "flag".to_string(),
                value: Some(json!("true")),
            }]
        ));
    }

    #[test]
    fn test_kv_pairs_match_rejects_non_kvlist() {
        let scalar = json!({"stringValue": "x"});
        assert!(!kv_pairs_match(&scalar, &[json!({"key": "a"})]));
        // Empty expectations match anything, including scalars.
        assert!(kv_pairs_match(&scalar, &[]));
    }
}
