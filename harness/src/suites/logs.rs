//! Logs suite
//!
//! Creates a pod that prints a marker line in a loop and waits for that
//! exact line to come back through the collector on the mock logs feed.

use anyhow::{Context, Result};
use serde_json::json;

use crate::core::config::HarnessConfig;
use crate::data::{Feed, MockEndpoint};
use crate::kube::kubectl::{self, TestPod};
use crate::otlp::attrs::log_bodies_per_line;

use super::runner::poll_until;

const POD_NAME: &str = "dummy-logging-pod";
const NAMESPACE: &str = "default";
const TEST_LOG: &str = "!!testlog!!";

/// The marker arrives as a complete log body with its trailing newline.
pub fn log_marker_found(content: &str) -> Result<(), String> {
    let needle = format!("{TEST_LOG}\n");
    let bodies = log_bodies_per_line(content).map_err(|e| e.to_string())?;
    if bodies.iter().flatten().any(|body| *body == needle) {
        Ok(())
    } else {
        Err(format!(
            "marker {TEST_LOG:?} not found in {} payload lines",
            bodies.len()
        ))
    }
}

pub async fn run(config: &HarnessConfig) -> Result<()> {
    let script = format!("while :; do echo '{TEST_LOG}'; sleep 5 ; done");
    kubectl::run_pod(&TestPod::new(
        POD_NAME,
        NAMESPACE,
        "bash:alpine3.16",
        &script,
    ))
    .await
    .context("Failed to create logging test pod")?;

    let mock = MockEndpoint::new(&config.mock_endpoint);
    let result = poll_until(&config.poll, "test log collection", || {
        let mock = &mock;
        async move {
            let content = mock.fetch(Feed::Logs).await.map_err(|e| e.to_string())?;
            log_marker_found(&content)
        }
    })
    .await;

    let teardown = kubectl::delete_pod(POD_NAME, NAMESPACE).await;

    if let Err(e) = result {
        if let Ok(content) = MockEndpoint::new(&config.mock_endpoint)
            .fetch(Feed::Logs)
            .await
        {
            let dump = log_bodies_per_line(&content).unwrap_or_default();
            tracing::error!(bodies = %json!(dump), "Sent logs at failure");
        }
        anyhow::bail!("{e}");
    }
    teardown?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_line(bodies: &[&str]) -> String {
        let records: Vec<serde_json::Value> = bodies
            .iter()
            .map(|body| json!({"body": {"stringValue": body}}))
            .collect();
        json!({
            "resourceLogs": [{
                "scopeLogs": [{"logRecords": records}]
            }]
        })
        .to_string()
    }

    #[test]
    fn test_marker_found_exact_body() {
        let content = feed_line(&["other\n", "!!testlog!!\n"]);
        assert!(log_marker_found(&content).is_ok());
    }

    #[test]
    fn test_marker_requires_trailing_newline() {
        // A truncated body without the newline is not a full marker line.
        let content = feed_line(&["!!testlog!!"]);
        assert!(log_marker_found(&content).is_err());
    }

    #[test]
    fn test_marker_not_matched_inside_larger_body() {
        let content = feed_line(&["prefix !!testlog!!\n suffix"]);
        assert!(log_marker_found(&content).is_err());
    }

    #[test]
    fn test_empty_feed_is_not_found() {
        assert!(log_marker_found("").is_err());
    }
}
