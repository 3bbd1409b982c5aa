//! Payload-line merging
//!
//! The mock feeds replay every export request the collector made as one
//! JSON payload per line, so the same resource shows up many times and in
//! no particular order. Merging folds all lines into a single document:
//! resource entries unify by resource identity, scopes by scope identity,
//! metrics by name, and unkeyed record arrays append with deduplication.
//! Merging the same content twice yields the same document.

use serde_json::{Map, Value};
use thiserror::Error;

use super::normalize::{canonical_json, normalize};

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Invalid JSON payload on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse a JSON-Lines body and fold every payload into one merged,
/// normalized document. Blank lines are skipped; a malformed line is an
/// error carrying its 1-based line number.
pub fn merge_payload_lines(content: &str) -> Result<Value, MergeError> {
    let mut merged = Value::Object(Map::new());
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut payload: Value = serde_json::from_str(line).map_err(|e| MergeError::Parse {
            line: idx + 1,
            source: e,
        })?;
        // Normalizing first makes element identities order-insensitive.
        normalize(&mut payload);
        merge_into(&mut merged, payload);
    }
    Ok(merged)
}

/// Merge `incoming` into `acc`. Objects merge key-wise recursively,
/// arrays merge by element identity (see `element_identity`), scalars
/// are replaced by the incoming value.
pub fn merge_into(acc: &mut Value, incoming: Value) {
    match (acc, incoming) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, value) in b {
                match a.get_mut(&key) {
                    Some(slot) => merge_field(&key, slot, value),
                    None => {
                        a.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn merge_field(key: &str, slot: &mut Value, incoming: Value) {
    match (slot, incoming) {
        (Value::Array(a), Value::Array(b)) => merge_array(key, a, b),
        (slot, incoming) => merge_into(slot, incoming),
    }
}

fn merge_array(key: &str, acc: &mut Vec<Value>, incoming: Vec<Value>) {
    for element in incoming {
        match element_identity(key, &element) {
            Some(id) => {
                let existing = acc
                    .iter_mut()
                    .find(|e| element_identity(key, e).as_deref() == Some(id.as_str()));
                match existing {
                    Some(slot) => merge_into(slot, element),
                    None => acc.push(element),
                }
            }
            None => {
                let fingerprint = canonical_json(&element);
                if !acc.iter().any(|e| canonical_json(e) == fingerprint) {
                    acc.push(element);
                }
            }
        }
    }
}

/// Identity of an array element, keyed by the field the array lives under.
///
/// Resource entries are identified by their resource (plus schema URL),
/// scope entries by their scope, metrics by name. Record arrays
/// (dataPoints, logRecords) have no identity and dedupe by canonical form.
fn element_identity(parent_key: &str, element: &Value) -> Option<String> {
    match parent_key {
        "resourceMetrics" | "resourceLogs" | "resourceSpans" => {
            let resource = canonical_json(element.get("resource")?);
            let schema_url = element
                .get("schemaUrl")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(format!("{schema_url}|{resource}"))
        }
        "scopeMetrics" | "scopeLogs" | "scopeSpans" => {
            Some(canonical_json(element.get("scope").unwrap_or(&Value::Null)))
        }
        "metrics" => element
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}
