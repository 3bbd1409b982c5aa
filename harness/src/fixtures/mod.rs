//! Expected-case fixtures
//!
//! Entity state event expectations are checked-in JSON files: resource and
//! scope attribute requirements plus a list of expected events. The
//! matcher checks them against OTLP-shaped payloads; the generator
//! rebuilds them from a healthy cluster.

pub mod generate;
pub mod matcher;

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One attribute requirement: key must be present; when `value` is set it
/// must match exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttrExpectation {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Expected event: attribute name -> expected value. Scalar values match
/// exactly, lists match kvlist attributes pair-wise, an empty list marks
/// the attribute as don't-care.
pub type EventSpec = Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExpectedCase {
    #[serde(default)]
    pub resource_attributes: Vec<AttrExpectation>,
    #[serde(default)]
    pub scope_attributes: Vec<AttrExpectation>,
    #[serde(default)]
    pub events: Vec<EventSpec>,
}

/// Load every `*.json` case in a directory, sorted by file name
pub fn load_cases(dir: &Path) -> Result<Vec<(String, ExpectedCase)>> {
    let mut entries: Vec<String> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read fixture directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".json"))
        .collect();
    entries.sort();

    let mut cases = Vec::with_capacity(entries.len());
    for name in entries {
        let path = dir.join(&name);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let case: ExpectedCase = serde_json::from_str(&content)
            .with_context(|| format!("Invalid fixture {}", path.display()))?;
        cases.push((name, case));
    }
    Ok(cases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_case_deserializes_fixture_schema() {
        let raw = json!({
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
        });
        let case: ExpectedCase = serde_json::from_value(raw).unwrap();
        assert!(case.resource_attributes.is_empty());
        assert_eq!(case.scope_attributes[0].key, "otel.entity.event_as_log");
        assert_eq!(case.events.len(), 1);
        assert_eq!(case.events[0]["otel.entity.type"], "KubernetesPod");
    }

    #[test]
    fn test_attr_expectation_key_only() {
        let attr: AttrExpectation =
            serde_json::from_value(json!({"key": "sw.k8s.cluster.uid"})).unwrap();
        assert_eq!(attr.key, "sw.k8s.cluster.uid");
        assert!(attr.value.is_none());
    }

    #[test]
    fn test_load_cases_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("entity_b.json"),
            r#"{"resource_attributes": [], "scope_attributes": [], "events": []}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("entity_a.json"),
            r#"{"events": []}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let cases = load_cases(dir.path()).unwrap();
        let names: Vec<&str> = cases.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["entity_a.json", "entity_b.json"]);
    }

    #[test]
    fn test_load_cases_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();
        assert!(load_cases(dir.path()).is_err());
    }
}
