//! Fixture generation from a healthy cluster
//!
//! Discovers every entity and relationship type present in ClickHouse and
//! rebuilds the expected-case files. Output must be deterministic across
//! rollouts: cluster-scoped identifiers are stripped, runtime-hashed
//! workload names are dropped, and events are deduplicated and sorted.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};

use crate::data::TelemetryStore;
use crate::data::clickhouse::rows::EntityEventRow;
use crate::kube::naming::{
    entity_filter_key, has_runtime_generated_hash, to_snake_case, workload_name,
};
use crate::otlp::{canonical_json, canonical_pretty, keys};

const TEST_PREFIX: &str = "test-";

/// Identity map keys never pinned by value in fixtures
const DIGEST_KEY: &str = "oci.manifest.digest";
const SCANNER_VERSION_KEY: &str = "scannerVersion";

/// The one CVE kept for deterministic vulnerability assertions (linked to
/// the python test image).
const PINNED_CVE: &str = "CVE-2023-5752";
const PINNED_IMAGE: &str = "index.docker.io/library/python";
const PINNED_FQDN: &str = "solarwinds.com";

pub struct GenerateSummary {
    pub entity_types: Vec<String>,
    pub relationship_types: Vec<String>,
    pub total_entities: usize,
    pub total_relationships: usize,
}

pub struct FixtureGenerator<'a> {
    store: &'a TelemetryStore,
    output_dir: PathBuf,
}

impl<'a> FixtureGenerator<'a> {
    pub fn new(store: &'a TelemetryStore, output_dir: PathBuf) -> Self {
        Self { store, output_dir }
    }

    /// Discover all types and regenerate every fixture file
    pub async fn generate_all(&self) -> Result<GenerateSummary> {
        let entity_types = self.store.distinct_entity_types().await?;
        tracing::info!(count = entity_types.len(), "Discovered entity types");

        let mut total_entities = 0;
        for entity_type in &entity_types {
            total_entities += self.generate_entity_file(entity_type).await?;
        }

        let relationship_types = self.store.distinct_relationship_types().await?;
        tracing::info!(
            count = relationship_types.len(),
            "Discovered relationship types"
        );

        let mut total_relationships = 0;
        for relationship_type in &relationship_types {
            total_relationships += self.generate_relationship_file(relationship_type).await?;
        }

        Ok(GenerateSummary {
            entity_types,
            relationship_types,
            total_entities,
            total_relationships,
        })
    }

    async fn generate_entity_file(&self, entity_type: &str) -> Result<usize> {
        let rows = self.store.fetch_entity_events_of_type(entity_type).await?;
        let events = build_entity_events(&rows, entity_type);
        let path = self
            .output_dir
            .join(format!("entity_{}.json", to_snake_case(entity_type)));
        write_case_file(&path, &events)?;
        tracing::info!(
            entity_type,
            events = events.len(),
            file = %path.display(),
            "Entity fixture written"
        );
        Ok(events.len())
    }

    async fn generate_relationship_file(&self, relationship_type: &str) -> Result<usize> {
        let rows = self
            .store
            .fetch_relationship_events_of_type(relationship_type)
            .await?;
        let events = build_relationship_events(&rows, relationship_type);
        let path = self.output_dir.join(format!(
            "relationship_{}.json",
            to_snake_case(relationship_type)
        ));
        write_case_file(&path, &events)?;
        tracing::info!(
            relationship_type,
            events = events.len(),
            file = %path.display(),
            "Relationship fixture written"
        );
        Ok(events.len())
    }
}

/// Build the deduplicated, filtered, sorted entity events of one type
pub fn build_entity_events(rows: &[EntityEventRow], entity_type: &str) -> Vec<Value> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut events = Vec::new();

    for row in rows {
        let entity_id = parse_entity_id(attr(&row.log_attributes, keys::ENTITY_ID));
        if !should_include_entity(&entity_id, entity_type) {
            continue;
        }

        let filtered = strip_cluster_uid(&entity_id);
        let identity = identity_key(&filtered);
        if !seen.insert(identity) {
            continue;
        }

        let attributes = extract_entity_attributes(&row.log_attributes, entity_type);
        events.push(json!({
            (keys::ENTITY_EVENT_TYPE): attr(&row.log_attributes, keys::ENTITY_EVENT_TYPE)
                .unwrap_or(keys::EVENT_TYPE_ENTITY_STATE),
            (keys::ENTITY_TYPE): entity_type,
            (keys::ENTITY_ID): entity_id_to_list(&filtered),
            (keys::ENTITY_ATTRIBUTES): attributes,
        }));
    }

    events.sort_by_key(|event| canonical_json(&event[keys::ENTITY_ID]));
    events
}

/// Build the deduplicated, filtered, sorted relationship events of one type
pub fn build_relationship_events(rows: &[EntityEventRow], relationship_type: &str) -> Vec<Value> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut events = Vec::new();

    for row in rows {
        let source_id = parse_entity_id(attr(&row.log_attributes, keys::RELATIONSHIP_SOURCE_ID));
        let dest_id = parse_entity_id(attr(&row.log_attributes, keys::RELATIONSHIP_DEST_ID));

        // Fall back to inference for legacy data without type fields.
        let source_type = attr(&row.log_attributes, keys::RELATIONSHIP_SOURCE_TYPE)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| infer_entity_type_from_id(&source_id));
        let dest_type = attr(&row.log_attributes, keys::RELATIONSHIP_DEST_TYPE)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| infer_entity_type_from_id(&dest_id));

        if !should_include_relationship(
            relationship_type,
            &source_type,
            &source_id,
            &dest_type,
            &dest_id,
        ) {
            continue;
        }

        let source_filtered = strip_cluster_uid(&source_id);
        let dest_filtered = strip_cluster_uid(&dest_id);
        let identity = format!(
            "{}|{}|{}|{}",
            source_type,
            identity_key(&source_filtered),
            dest_type,
            identity_key(&dest_filtered)
        );
        if !seen.insert(identity) {
            continue;
        }

        let attributes = extract_relationship_attributes(&row.log_attributes, relationship_type);

        let mut event = Map::new();
        event.insert(
            keys::ENTITY_EVENT_TYPE.to_string(),
            attr(&row.log_attributes, keys::ENTITY_EVENT_TYPE)
                .unwrap_or(keys::EVENT_TYPE_RELATIONSHIP_STATE)
                .into(),
        );
        event.insert(
            keys::RELATIONSHIP_TYPE.to_string(),
            relationship_type.into(),
        );
        event.insert(
            keys::RELATIONSHIP_SOURCE_ID.to_string(),
            entity_id_to_list(&source_filtered),
        );
        event.insert(
            keys::RELATIONSHIP_DEST_ID.to_string(),
            entity_id_to_list(&dest_filtered),
        );

        // The event generator does not emit entity types for
        // vulnerability findings.
        if relationship_type != "VulnerabilityFinding" {
            if !source_type.is_empty() {
                event.insert(
                    keys::RELATIONSHIP_SOURCE_TYPE.to_string(),
                    source_type.clone().into(),
                );
            }
            if !dest_type.is_empty() {
                event.insert(
                    keys::RELATIONSHIP_DEST_TYPE.to_string(),
                    dest_type.clone().into(),
                );
            }
        }
        if let Value::Array(ref pairs) = attributes {
            if !pairs.is_empty() {
                event.insert(keys::RELATIONSHIP_ATTRIBUTES.to_string(), attributes);
            }
        }

        events.push(Value::Object(event));
    }

    events.sort_by_key(|event| {
        (
            event
                .get(keys::RELATIONSHIP_SOURCE_TYPE)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            canonical_json(&event[keys::RELATIONSHIP_SOURCE_ID]),
            event
                .get(keys::RELATIONSHIP_DEST_TYPE)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            canonical_json(&event[keys::RELATIONSHIP_DEST_ID]),
        )
    });
    events
}

/// Whether an entity belongs in deterministic fixtures
pub fn should_include_entity(entity_id: &BTreeMap<String, String>, entity_type: &str) -> bool {
    match entity_type {
        "VulnerabilityDetail" => {
            return entity_id.get("vulnerability.id").map(String::as_str) == Some(PINNED_CVE);
        }
        "KubernetesContainerImage" => {
            return entity_id.get("container.image.name").map(String::as_str)
                == Some(PINNED_IMAGE);
        }
        "PublicNetworkLocation" => {
            return entity_id.get("sw.server.address.fqdn").map(String::as_str)
                == Some(PINNED_FQDN);
        }
        _ => {}
    }

    let Some(filter_key) = entity_filter_key(entity_type) else {
        return true;
    };
    let Some(name) = entity_id.get(&filter_key) else {
        return false;
    };
    if !name.starts_with(TEST_PREFIX) {
        return false;
    }
    !has_runtime_generated_hash(entity_id, entity_type)
}

fn should_include_relationship(
    relationship_type: &str,
    source_type: &str,
    source_id: &BTreeMap<String, String>,
    dest_type: &str,
    dest_id: &BTreeMap<String, String>,
) -> bool {
    // Endpoints behind a service include rollout-hashed pods.
    if relationship_type == "KubernetesServiceRoutesTo" {
        if matches!(dest_type, "KubernetesPod" | "KubernetesReplicaSet")
            && has_runtime_generated_hash(dest_id, dest_type)
        {
            return false;
        }
        if matches!(source_type, "KubernetesPod" | "KubernetesReplicaSet")
            && has_runtime_generated_hash(source_id, source_type)
        {
            return false;
        }
    }

    if relationship_type == "KubernetesResourceUsesImage"
        && source_id.get(keys::K8S_POD_NAME).map(String::as_str) != Some("test-pod")
    {
        return false;
    }

    if relationship_type == "VulnerabilityFinding" {
        // Findings have no workload names; pin the one deterministic CVE.
        let image = dest_id
            .get("container.image.name")
            .map(String::as_str)
            .unwrap_or_default();
        let cve = source_id
            .get("vulnerability.id")
            .map(String::as_str)
            .unwrap_or_default();
        image.to_lowercase().contains("python") && cve == PINNED_CVE
    } else {
        workload_name(source_id)
            .unwrap_or_default()
            .starts_with(TEST_PREFIX)
    }
}

/// Parse a serialized entity identity into a sorted string map
pub fn parse_entity_id(raw: Option<&str>) -> BTreeMap<String, String> {
    let Some(raw) = raw else {
        return BTreeMap::new();
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, rendered)
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// Infer an entity type from its identity keys (legacy data without the
/// type fields populated)
pub fn infer_entity_type_from_id(entity_id: &BTreeMap<String, String>) -> String {
    if entity_id.contains_key("vulnerability.id") {
        return "VulnerabilityDetail".to_string();
    }
    if entity_id.keys().any(|k| k.starts_with("container.image.")) {
        return "KubernetesContainerImage".to_string();
    }
    for key in entity_id.keys() {
        if key.starts_with("k8s.") && key.ends_with(".name") && key != keys::K8S_NAMESPACE_NAME {
            let workload = key
                .trim_start_matches("k8s.")
                .trim_end_matches(".name")
                .to_string();
            let mut chars = workload.chars();
            let capitalized = match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => continue,
            };
            return format!("Kubernetes{}", capitalized);
        }
    }
    String::new()
}

fn strip_cluster_uid(entity_id: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    entity_id
        .iter()
        .filter(|(key, _)| key.as_str() != keys::CLUSTER_UID)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Identity list for fixture output, sorted by key; brittle digest values
/// are kept key-only.
pub fn entity_id_to_list(entity_id: &BTreeMap<String, String>) -> Value {
    let list: Vec<Value> = entity_id
        .iter()
        .map(|(key, value)| {
            if key == DIGEST_KEY {
                json!({"key": key})
            } else {
                json!({"key": key, "value": value})
            }
        })
        .collect();
    Value::Array(list)
}

fn extract_entity_attributes(log_attributes: &[(String, String)], entity_type: &str) -> Value {
    let picked_keys: &[&str] = match entity_type {
        "VulnerabilityDetail" => &[
            "vulnerability.severity",
            "vulnerability.enumeration",
            "vulnerability.description",
            "vulnerability.score.base",
            "vulnerability.reference",
        ],
        "KubernetesContainerImage" => &["container.image.tags"],
        _ => return Value::Array(Vec::new()),
    };

    let Some(parsed) = parse_attr_json(log_attributes, keys::ENTITY_ATTRIBUTES) else {
        return Value::Array(Vec::new());
    };
    let list: Vec<Value> = picked_keys
        .iter()
        .filter_map(|key| {
            parsed
                .get(*key)
                .map(|value| json!({"key": key, "value": value}))
        })
        .collect();
    Value::Array(list)
}

fn extract_relationship_attributes(
    log_attributes: &[(String, String)],
    relationship_type: &str,
) -> Value {
    match relationship_type {
        "KubernetesResourceUsesImage" => {
            let Some(parsed) = parse_attr_json(log_attributes, keys::RELATIONSHIP_ATTRIBUTES)
            else {
                return Value::Array(Vec::new());
            };
            let list: Vec<Value> = parsed
                .get("imageTag")
                .map(|value| vec![json!({"key": "imageTag", "value": value})])
                .unwrap_or_default();
            Value::Array(list)
        }
        "VulnerabilityFinding" => {
            let Some(parsed) = parse_attr_json(log_attributes, keys::RELATIONSHIP_ATTRIBUTES)
            else {
                return Value::Array(Vec::new());
            };
            let mut keys: Vec<&String> = parsed.keys().collect();
            keys.sort();
            let list: Vec<Value> = keys
                .into_iter()
                .map(|key| {
                    // Scanner versions change on every image rebuild.
                    if key == SCANNER_VERSION_KEY {
                        json!({"key": key})
                    } else {
                        json!({"key": key, "value": parsed[key]})
                    }
                })
                .collect();
            Value::Array(list)
        }
        _ => Value::Array(Vec::new()),
    }
}

fn parse_attr_json(log_attributes: &[(String, String)], key: &str) -> Option<Map<String, Value>> {
    let raw = attr(log_attributes, key)?;
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn identity_key(entity_id: &BTreeMap<String, String>) -> String {
    entity_id
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn attr<'a>(map: &'a [(String, String)], key: &str) -> Option<&'a str> {
    map.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Fixture envelope shared by every generated file
pub fn case_envelope(events: Vec<Value>) -> Value {
    json!({
        "resource_attributes": [],
        "scope_attributes": [{
            "key": keys::ENTITY_EVENT_AS_LOG,
            "value": "true",
        }],
        "events": events,
    })
}

fn write_case_file(path: &Path, events: &[Value]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut rendered = canonical_pretty(&case_envelope(events.to_vec()));
    rendered.push('\n');
    std::fs::write(path, rendered).with_context(|| format!("Failed to write {}", path.display()))
}
