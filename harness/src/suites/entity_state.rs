//! Entity state suite
//!
//! A pod with an explicitly named container is created through a manifest
//! override; the mock entity state feed must then carry an `entity_state`
//! event for that container, with its identity kvlist and a populated
//! container status.

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::core::config::HarnessConfig;
use crate::data::{Feed, MockEndpoint};
use crate::kube::kubectl;
use crate::otlp::attrs::{attribute_string, has_attribute, kvlist_map, resource_logs_per_line};
use crate::otlp::keys;

use super::runner::poll_until;

const POD_NAME: &str = "dummy-entitystateevents-pod";
const CONTAINER_NAME: &str = "dummy-container";
const NAMESPACE: &str = "default";
const CONTAINER_ENTITY: &str = "KubernetesContainer";

fn pod_manifest() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": POD_NAME},
        "spec": {
            "containers": [{"name": CONTAINER_NAME, "image": "alpine3.19"}]
        }
    })
}

/// Scan the feed for an entity_state event describing the test container.
///
/// Scopes carrying entity events must always set the event-as-log marker;
/// a scope without it is a collector bug, not a retryable miss, but inside
/// the polling loop both surface as a failed attempt.
pub fn entity_state_found(content: &str) -> Result<(), String> {
    let lines = resource_logs_per_line(content).map_err(|e| e.to_string())?;
    for resource_logs in &lines {
        for resource_log in resource_logs {
            for scope_log in resource_log
                .get("scopeLogs")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                let scope = scope_log.get("scope").cloned().unwrap_or_default();
                if !has_attribute(&scope, keys::ENTITY_EVENT_AS_LOG, &json!(true)) {
                    return Err(format!(
                        "scope attribute {} is not set",
                        keys::ENTITY_EVENT_AS_LOG
                    ));
                }

                for record in scope_log
                    .get("logRecords")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    if has_attribute(
                        record,
                        keys::ENTITY_EVENT_TYPE,
                        &json!(keys::EVENT_TYPE_RELATIONSHIP_STATE),
                    ) {
                        continue;
                    }
                    if !has_attribute(
                        record,
                        keys::ENTITY_EVENT_TYPE,
                        &json!(keys::EVENT_TYPE_ENTITY_STATE),
                    ) {
                        return Err(format!(
                            "attribute {} has an unexpected value",
                            keys::ENTITY_EVENT_TYPE
                        ));
                    }
                    if attribute_string(record, keys::ENTITY_TYPE) != Some(CONTAINER_ENTITY) {
                        continue;
                    }
                    if container_identity_matches(record) {
                        return Ok(());
                    }
                }
            }
        }
    }
    Err(format!(
        "no entity_state event for container {CONTAINER_NAME} of {POD_NAME} yet"
    ))
}

fn container_identity_matches(record: &Value) -> bool {
    let Some(id) = kvlist_map(record, keys::ENTITY_ID) else {
        return false;
    };
    if id.get(keys::K8S_POD_NAME).map(String::as_str) != Some(POD_NAME) {
        return false;
    }
    if id.get(keys::K8S_NAMESPACE_NAME).map(String::as_str) != Some(NAMESPACE) {
        tracing::debug!("Container has incorrect namespace set");
        return false;
    }
    if id.get(keys::K8S_CONTAINER_NAME).map(String::as_str) != Some(CONTAINER_NAME) {
        tracing::debug!("Container has unexpected name");
        return false;
    }

    // The status attribute lags container startup.
    let Some(attrs) = kvlist_map(record, keys::ENTITY_ATTRIBUTES) else {
        return false;
    };
    attrs
        .get(keys::CONTAINER_STATUS)
        .map(|status| !status.is_empty())
        .unwrap_or(false)
}

pub async fn run(config: &HarnessConfig) -> Result<()> {
    let overrides = pod_manifest().to_string();
    kubectl::run(&[
        "run",
        "multi-container-pod",
        "--overrides",
        overrides.as_str(),
        "--image",
        "bash:alpine3.19",
        "-n",
        NAMESPACE,
        "--",
        "-ec",
        "while :; do sleep 5 ; done",
    ])
    .await
    .context("Failed to create entity state test pod")?;

    let mock = MockEndpoint::new(&config.mock_endpoint);
    let result = poll_until(&config.poll, "entity state events", || {
        let mock = &mock;
        async move {
            let content = mock
                .fetch(Feed::EntityStateEvents)
                .await
                .map_err(|e| e.to_string())?;
            entity_state_found(&content)
        }
    })
    .await;

    // The manifest override names the pod, so delete by that name.
    let teardown = kubectl::delete_pod(POD_NAME, NAMESPACE).await;

    if let Err(e) = result {
        if let Ok(content) = mock.fetch(Feed::EntityStateEvents).await {
            let dump_path = "raw_bodies_dump.txt";
            if std::fs::write(dump_path, &content).is_ok() {
                tracing::error!(file = dump_path, "Entity state feed dumped");
            }
        }
        anyhow::bail!("{e}");
    }
    teardown?;
    Ok(())
}
