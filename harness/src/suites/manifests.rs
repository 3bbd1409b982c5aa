//! Manifests suite
//!
//! The collector ships watched object manifests as log records whose body
//! is the raw JSON manifest. Creates a labeled/annotated pod, then checks
//! in ClickHouse that (1) its manifest arrived, (2) the resource carries
//! the label/annotation attributes, and (3) the manifest body itself kept
//! them unchanged.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::core::config::HarnessConfig;
use crate::data::TelemetryStore;
use crate::kube::kubectl::{self, TestPod};
use crate::otlp::attrs::{attribute_string, log_bodies};

use super::runner::poll_until;

const POD_NAME: &str = "dummy-pod";
const NAMESPACE: &str = "default";
const LABEL_KEY: &str = "test-label";
const LABEL_VALUE: &str = "test-value";
const ANNOTATION_KEY: &str = "test-annotation";
const ANNOTATION_VALUE: &str = "test-value";

/// Whether a log body is the manifest of the given object
pub fn is_manifest(raw: &str, kind: &str, name: &str, namespace: &str) -> bool {
    let Ok(parsed) = serde_json::from_str::<Value>(raw) else {
        return false;
    };
    parsed.get("kind").and_then(Value::as_str) == Some(kind)
        && parsed
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            == Some(name)
        && parsed
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            == Some(namespace)
}

fn all_bodies(payloads: &[Value]) -> Vec<String> {
    payloads.iter().flat_map(log_bodies).collect()
}

/// Resource node of the payload carrying the given object's manifest
pub fn find_resource_with_manifest<'a>(
    payloads: &'a [Value],
    kind: &str,
    name: &str,
    namespace: &str,
) -> Option<&'a Value> {
    for payload in payloads {
        for resource_log in payload
            .get("resourceLogs")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            for scope_log in resource_log
                .get("scopeLogs")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                for record in scope_log
                    .get("logRecords")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    let body = record
                        .get("body")
                        .and_then(|b| b.get("stringValue"))
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    if is_manifest(body, kind, name, namespace) {
                        return resource_log.get("resource");
                    }
                }
            }
        }
    }
    None
}

pub fn check_manifest_found(payloads: &[Value]) -> Result<(), String> {
    let found = all_bodies(payloads)
        .iter()
        .any(|body| is_manifest(body, "Pod", POD_NAME, NAMESPACE));
    if found {
        Ok(())
    } else {
        Err(format!(
            "manifest for Pod {POD_NAME} in namespace {NAMESPACE} not found"
        ))
    }
}

/// The resource enrichment lifts labels/annotations onto attributes
pub fn check_label_and_annotation_attributes(payloads: &[Value]) -> Result<(), String> {
    let Some(resource) = find_resource_with_manifest(payloads, "Pod", POD_NAME, NAMESPACE) else {
        return Err("resource carrying the pod manifest not found".to_string());
    };
    let label_key = format!("k8s.pod.labels.{LABEL_KEY}");
    let annotation_key = format!("k8s.pod.annotations.{ANNOTATION_KEY}");
    if attribute_string(resource, &label_key) != Some(LABEL_VALUE) {
        return Err(format!("resource attribute {label_key} missing or wrong"));
    }
    if attribute_string(resource, &annotation_key) != Some(ANNOTATION_VALUE) {
        return Err(format!(
            "resource attribute {annotation_key} missing or wrong"
        ));
    }
    Ok(())
}

/// The manifest body must keep metadata labels/annotations untouched
pub fn check_manifest_metadata_unchanged(payloads: &[Value]) -> Result<(), String> {
    for body in all_bodies(payloads) {
        if !is_manifest(&body, "Pod", POD_NAME, NAMESPACE) {
            continue;
        }
        let parsed: Value = serde_json::from_str(&body).map_err(|e| e.to_string())?;
        let metadata = parsed.get("metadata").cloned().unwrap_or_default();
        let label = metadata
            .get("labels")
            .and_then(|l| l.get(LABEL_KEY))
            .and_then(Value::as_str);
        let annotation = metadata
            .get("annotations")
            .and_then(|a| a.get(ANNOTATION_KEY))
            .and_then(Value::as_str);
        if label == Some(LABEL_VALUE) && annotation == Some(ANNOTATION_VALUE) {
            return Ok(());
        }
    }
    Err("expected labels and annotations not found in any pod manifest".to_string())
}

pub async fn run(config: &HarnessConfig) -> Result<()> {
    kubectl::run_pod(
        &TestPod::new(
            POD_NAME,
            NAMESPACE,
            "bash:alpine3.19",
            "while :; do sleep 5 ; done",
        )
        .with_label(LABEL_KEY, LABEL_VALUE)
        .with_annotation(ANNOTATION_KEY, ANNOTATION_VALUE),
    )
    .await
    .context("Failed to create manifest test pod")?;

    let store = TelemetryStore::new(&config.clickhouse);

    let checks: [(&str, fn(&[Value]) -> Result<(), String>); 3] = [
        ("manifest collection", check_manifest_found),
        (
            "manifest label/annotation attributes",
            check_label_and_annotation_attributes,
        ),
        (
            "manifest metadata unchanged",
            check_manifest_metadata_unchanged,
        ),
    ];

    let mut result = Ok(());
    for (what, check) in checks {
        let outcome = poll_until(&config.poll, what, || {
            let store = &store;
            async move {
                let payloads = store.fetch_logs(None).await.map_err(|e| e.to_string())?;
                check(&payloads)
            }
        })
        .await;
        if let Err(e) = outcome {
            result = Err(anyhow::anyhow!("{e}"));
            break;
        }
    }

    let teardown = kubectl::delete_pod(POD_NAME, NAMESPACE).await;
    result?;
    teardown?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest_body(labels: &Value, annotations: &Value) -> String {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": POD_NAME,
                "namespace": NAMESPACE,
                "labels": labels,
                "annotations": annotations,
            }
        })
        .to_string()
    }

    fn payload_with(body: &str, resource_attrs: &[(&str, &str)]) -> Value {
        let attrs: Vec<Value> = resource_attrs
            .iter()
            .map(|(k, v)| json!({"key": k, "value": {"stringValue": v}}))
            .collect();
        json!({
            "resourceLogs": [{
                "resource": {"attributes": attrs},
                "scopeLogs": [{"logRecords": [{"body": {"stringValue": body}}]}]
            }]
        })
    }

    #[test]
    fn test_is_manifest() {
        let body = manifest_body(&json!({}), &json!({}));
        assert!(is_manifest(&body, "Pod", POD_NAME, NAMESPACE));
        assert!(!is_manifest(&body, "Deployment", POD_NAME, NAMESPACE));
        assert!(!is_manifest(&body, "Pod", "other", NAMESPACE));
        assert!(!is_manifest("not-json", "Pod", POD_NAME, NAMESPACE));
        assert!(!is_manifest("42", "Pod", POD_NAME, NAMESPACE));
    }

    #[test]
    fn test_check_manifest_found() {
        let body = manifest_body(&json!({}), &json!({}));
        let payloads = vec![payload_with(&body, &[])];
        assert!(check_manifest_found(&payloads).is_ok());
        assert!(check_manifest_found(&[]).is_err());
    }

    #[test]
    fn test_label_and_annotation_attributes() {
        let body = manifest_body(&json!({}), &json!({}));
        let good = vec![payload_with(
            &body,
            &[
                ("k8s.pod.labels.test-label", "test-value"),
                ("k8s.pod.annotations.test-annotation", "test-value"),
            ],
        )];
        assert!(check_label_and_annotation_attributes(&good).is_ok());

        let bad = vec![payload_with(&body, &[])];
        assert!(check_label_and_annotation_attributes(&bad).is_err());
    }

    #[test]
    fn test_manifest_metadata_unchanged() {
        let good = manifest_body(
            &json!({"test-label": "test-value"}),
            &json!({"test-annotation": "test-value"}),
        );
        assert!(check_manifest_metadata_unchanged(&[payload_with(&good, &[])]).is_ok());

        let mutated = manifest_body(
            &json!({"test-label": "rewritten"}),
            &json!({"test-annotation": "test-value"}),
        );
        assert!(check_manifest_metadata_unchanged(&[payload_with(&mutated, &[])]).is_err());
    }
}
