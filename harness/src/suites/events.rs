//! Events suite
//!
//! Creates a pod and waits for its `Started container` event to surface,
//! either on the mock events feed or in Loki (events are stored there as
//! logs with the `sw.k8s.log.type="event"` structured metadata).

use std::time::Duration;

use anyhow::{Context, Result};

use crate::core::config::HarnessConfig;
use crate::core::constants::{LOKI_EVENT_POLL_INTERVAL_SECS, LOKI_EVENT_TIMEOUT_SECS};
use crate::data::{Feed, LokiClient, MockEndpoint};
use crate::kube::kubectl::{self, TestPod};
use crate::otlp::attrs::log_bodies_per_line;

use super::runner::poll_until;

const POD_NAME: &str = "dummy-pod";
const NAMESPACE: &str = "default";

fn expected_event() -> String {
    format!("Started container {POD_NAME}")
}

/// The event message arrives as a complete log body.
pub fn event_found(content: &str, expected: &str) -> Result<(), String> {
    let bodies = log_bodies_per_line(content).map_err(|e| e.to_string())?;
    if bodies.iter().flatten().any(|body| body == expected) {
        Ok(())
    } else {
        Err(format!(
            "event {expected:?} not found in {} payload lines",
            bodies.len()
        ))
    }
}

pub async fn run(config: &HarnessConfig) -> Result<()> {
    kubectl::run_pod(
        &TestPod::new(
            POD_NAME,
            NAMESPACE,
            "bash:alpine3.19",
            "while :; do sleep 5 ; done",
        )
        .with_label("test-label", "test-value")
        .with_annotation("test-annotation", "test-value"),
    )
    .await
    .context("Failed to create event test pod")?;

    let result = if config.use_loki {
        tracing::info!("Using Loki-based event collection check");
        run_loki(config).await
    } else {
        tracing::info!("Using file-based event collection check");
        run_file(config).await
    };

    let teardown = kubectl::delete_pod(POD_NAME, NAMESPACE).await;
    result?;
    teardown?;
    Ok(())
}

async fn run_file(config: &HarnessConfig) -> Result<()> {
    let mock = MockEndpoint::new(&config.mock_endpoint);
    let expected = expected_event();
    poll_until(&config.poll, "event collection", || {
        let mock = &mock;
        let expected = &expected;
        async move {
            let content = mock.fetch(Feed::Events).await.map_err(|e| e.to_string())?;
            event_found(&content, expected)
        }
    })
    .await
    .map_err(|e| anyhow::anyhow!("{e}"))
}

async fn run_loki(config: &HarnessConfig) -> Result<()> {
    let client = LokiClient::new(&config.loki_base_url);
    let expected = expected_event();

    // The event log type is structured metadata, not an index label.
    let query = format!(
        "{{k8s_namespace_name=\"{NAMESPACE}\"}} | sw_k8s_log_type=\"event\" |= \"{POD_NAME}\""
    );
    tracing::debug!(query, "Querying Loki for events");

    let matched = client
        .wait_for_log_match(
            &query,
            &expected,
            Duration::from_secs(LOKI_EVENT_TIMEOUT_SECS),
            Duration::from_secs(LOKI_EVENT_POLL_INTERVAL_SECS),
        )
        .await;

    match matched {
        Ok(line) => {
            tracing::info!(line, "Found event in Loki");
            Ok(())
        }
        Err(e) => {
            // Dump what Loki does have to make the failure debuggable.
            let debug_query =
                format!("{{k8s_namespace_name=\"{NAMESPACE}\"}} | sw_k8s_log_type=\"event\"");
            if let Ok(events) = client.query_recent_logs(&debug_query, "5m", 10).await {
                tracing::error!(
                    count = events.len(),
                    "Events in namespace {NAMESPACE} over the last 5m"
                );
                for (_, line) in events.iter().take(5) {
                    tracing::error!(line = %line.chars().take(200).collect::<String>());
                }
            }
            let mention_query = format!("{{k8s_namespace_name=\"{NAMESPACE}\"}} |= \"{POD_NAME}\"");
            if let Ok(logs) = client.query_recent_logs(&mention_query, "5m", 10).await {
                tracing::error!(
                    count = logs.len(),
                    "Logs mentioning {POD_NAME} over the last 5m"
                );
            }
            Err(anyhow::anyhow!("{e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_found_exact_match() {
        let content = json!({
            "resourceLogs": [{
                "scopeLogs": [{"logRecords": [
                    {"body": {"stringValue": "Started container dummy-pod"}},
                ]}]
            }]
        })
        .to_string();
        assert!(event_found(&content, "Started container dummy-pod").is_ok());
        assert!(event_found(&content, "Started container other-pod").is_err());
    }

    #[test]
    fn test_expected_event_names_the_pod() {
        assert_eq!(expected_event(), "Started container dummy-pod");
    }
}
