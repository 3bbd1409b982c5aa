//! Prometheus federation fixture trimming
//!
//! Downloads a federation snapshot from a live cluster and trims it to
//! the minimum series set the mocked Prometheus needs: one node, the
//! collector's own workloads, and their namespace. Node names and sample
//! timestamps are rewritten so the fixture stays stable.

use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;

/// Metrics requested from the federation endpoint
pub const FEDERATE_MATCHES: &[&str] = &[
    "container_cpu_usage_seconds_total",
    "container_spec_cpu_quota",
    "container_spec_cpu_period",
    "container_memory_working_set_bytes",
    "container_spec_memory_limit_bytes",
    "container_cpu_cfs_throttled_periods_total",
    "container_cpu_cfs_periods_total",
    "container_fs_reads_total",
    "container_fs_writes_total",
    "container_fs_reads_bytes_total",
    "container_fs_writes_bytes_total",
    "container_fs_usage_bytes",
    "container_network_receive_bytes_total",
    "container_network_transmit_bytes_total",
    "container_network_receive_packets_total",
    "container_network_transmit_packets_total",
    "container_network_receive_packets_dropped_total",
    "container_network_transmit_packets_dropped_total",
    "kube_deployment_created",
    "kube_daemonset_created",
    "kube_namespace_created",
    "kube_node_info",
    "kube_node_created",
    "kube_node_status_capacity",
    "kube_node_status_condition",
    "kube_pod_created",
    "kube_pod_info",
    "kube_pod_owner",
    "kube_pod_completion_time",
    "kube_pod_status_phase",
    "kube_pod_status_ready",
    "kube_pod_status_reason",
    "kube_pod_start_time",
    "{__name__=~\"kube_pod_container_.*\"}",
    "kube_namespace_status_phase",
    "kube_deployment_labels",
    "kube_deployment_spec_replicas",
    "kube_deployment_spec_paused",
    "kube_deployment_status_replicas",
    "kube_deployment_status_replicas_ready",
    "kube_deployment_status_replicas_available",
    "kube_deployment_status_replicas_updated",
    "kube_deployment_status_replicas_unavailable",
    "kube_deployment_status_condition",
    "kube_replicaset_owner",
    "kube_replicaset_created",
    "kube_statefulset_labels",
    "kube_statefulset_replicas",
    "kube_statefulset_status_replicas_ready",
    "kube_statefulset_status_replicas_current",
    "kube_statefulset_status_replicas_updated",
    "kube_statefulset_created",
    "kube_daemonset_labels",
    "kube_daemonset_status_current_number_scheduled",
    "kube_daemonset_status_desired_number_scheduled",
    "kube_daemonset_status_updated_number_scheduled",
    "kube_daemonset_status_number_available",
    "kube_daemonset_status_number_misscheduled",
    "kube_daemonset_status_number_ready",
    "kube_daemonset_status_number_unavailable",
    "kube_resourcequota",
    "kube_node_status_allocatable",
    "kube_node_spec_unschedulable",
    "apiserver_request_total",
];

/// What to keep and how to normalize it
pub struct TrimSettings {
    /// Name prefix of the collector's metrics pod (also matches its
    /// deployment/replicaset series)
    pub collector_pod: String,
    /// The collector's logs daemonset
    pub collector_daemonset: String,
    pub namespace: String,
    /// All sample timestamps are rewritten to this value
    pub fixed_timestamp_ms: u64,
}

impl Default for TrimSettings {
    fn default() -> Self {
        Self {
            collector_pod: "swi-k8s-otel-collector-swo-k8s-collector-metrics".to_string(),
            collector_daemonset: "swi-k8s-otel-collector-swo-k8s-collector-logs".to_string(),
            namespace: "prometheus-system".to_string(),
            fixed_timestamp_ms: 1675856675021,
        }
    }
}

/// Federation URL for an endpoint (host:port or full URL)
pub fn federation_url(endpoint: &str) -> String {
    let base = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.trim_end_matches('/').to_string()
    } else {
        format!("http://{endpoint}")
    };
    let query: Vec<String> = FEDERATE_MATCHES
        .iter()
        .map(|m| format!("match%5B%5D={}", urlencode(m)))
        .collect();
    format!("{base}/federate?{}", query.join("&"))
}

fn urlencode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len() * 3);
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

/// Node name of the collector pod's series
pub fn extract_node(lines: &[&str], settings: &TrimSettings) -> Option<String> {
    let node_re = Regex::new(r#"node="([^"]+)""#).expect("static regex");
    lines
        .iter()
        .find(|line| {
            line.contains(&format!("pod=\"{}", settings.collector_pod))
                && line.contains(&format!("namespace=\"{}\"", settings.namespace))
        })
        .and_then(|line| node_re.captures(line))
        .map(|captures| captures[1].to_string())
}

/// Whether a federation line belongs in the trimmed fixture
pub fn keep_line(line: &str, node: &str, settings: &TrimSettings) -> bool {
    if line.starts_with('#') {
        return true;
    }
    let node_match = line.contains(&format!("node=\"{node}\""));
    let namespace_match = line.contains(&format!("namespace=\"{}\"", settings.namespace));

    let cgroup_root = line.contains("id=\"/kubepods/burstable\"")
        || line.contains("id=\"/kubepods\"")
        || line.contains("id=\"/\"");
    if cgroup_root && node_match {
        return true;
    }
    if line.starts_with("kube_node_") && node_match {
        return true;
    }

    let collector_series = line.contains(&format!("pod=\"{}", settings.collector_pod))
        || line.contains(&format!("deployment=\"{}\"", settings.collector_pod))
        || line.contains(&format!("replicaset=\"{}", settings.collector_pod))
        || line.contains(&format!("daemonset=\"{}\"", settings.collector_daemonset));
    if collector_series && namespace_match {
        return true;
    }

    line.starts_with("kube_namespace_") && namespace_match
}

/// Normalize node/instance labels and the trailing sample timestamp
pub fn rewrite_line(line: &str, settings: &TrimSettings) -> String {
    let mut result = line.to_string();
    for label in ["node", "instance"] {
        let re = Regex::new(&format!(r#"{label}="([^"]+)""#)).expect("static regex");
        if let Some(captures) = re.captures(&result) {
            let value = captures[1].to_string();
            result = result.replace(&value, "test-node");
        }
    }
    let ts_re = Regex::new(r"(\d+)$").expect("static regex");
    ts_re
        .replace(&result, settings.fixed_timestamp_ms.to_string())
        .into_owned()
}

/// Trim a downloaded federation body into fixture content
pub fn trim_response(body: &str, settings: &TrimSettings) -> Result<String> {
    let lines: Vec<&str> = body.lines().collect();
    let Some(node) = extract_node(&lines, settings) else {
        bail!(
            "No series for pod prefix '{}' in namespace '{}' found in the federation response",
            settings.collector_pod,
            settings.namespace
        );
    };
    tracing::info!(node, "Trimming federation response");

    let mut output = String::new();
    for line in lines {
        if keep_line(line, &node, settings) {
            output.push_str(&rewrite_line(line, settings));
            output.push('\n');
        }
    }
    Ok(output)
}

/// Tool entry: download, trim, write the wiremock fixture file
pub async fn run(endpoint: &str, output: &Path, settings: &TrimSettings) -> Result<()> {
    let url = federation_url(endpoint);
    tracing::info!(endpoint, "Downloading federation snapshot");

    let response = reqwest::get(&url).await.context("Federation request failed")?;
    if !response.status().is_success() {
        bail!("Federation request failed: {}", response.status());
    }
    let body = response.text().await?;

    let trimmed = trim_response(&body, settings)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(output, &trimmed)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    tracing::info!(
        file = %output.display(),
        lines = trimmed.lines().count(),
        "Fixture written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TrimSettings {
        TrimSettings {
            collector_pod: "collector-metrics".to_string(),
            collector_daemonset: "collector-logs".to_string(),
            namespace: "monitoring".to_string(),
            fixed_timestamp_ms: 1675856675021,
        }
    }

    #[test]
    fn test_federation_url_encodes_matches() {
        let url = federation_url("prometheus:9090");
        assert!(url.starts_with("http://prometheus:9090/federate?"));
        assert!(url.contains("match%5B%5D=container_cpu_usage_seconds_total"));
        // The selector expression is fully encoded
        assert!(url.contains("%7B__name__%3D~%22kube_pod_container_"));
    }

    #[test]
    fn test_extract_node() {
        let lines = vec![
            r#"kube_pod_info{pod="other",namespace="monitoring",node="node-b"} 1 1675850000000"#,
            r#"kube_pod_info{pod="collector-metrics-abc",namespace="monitoring",node="node-a"} 1 1675850000000"#,
        ];
        assert_eq!(extract_node(&lines, &settings()).as_deref(), Some("node-a"));
    }

    #[test]
    fn test_extract_node_absent() {
        let lines = vec![r#"kube_pod_info{pod="x",namespace="other"} 1 1"#];
        assert_eq!(extract_node(&lines, &settings()), None);
    }

    #[test]
    fn test_keep_line_rules() {
        let s = settings();
        assert!(keep_line("# TYPE kube_pod_info gauge", "node-a", &s));
        assert!(keep_line(
            r#"container_cpu_usage_seconds_total{id="/kubepods",node="node-a"} 1 1"#,
            "node-a",
            &s
        ));
        assert!(!keep_line(
            r#"container_cpu_usage_seconds_total{id="/kubepods",node="node-b"} 1 1"#,
            "node-a",
            &s
        ));
        assert!(keep_line(
            r#"kube_node_status_capacity{node="node-a"} 1 1"#,
            "node-a",
            &s
        ));
        assert!(keep_line(
            r#"kube_pod_info{pod="collector-metrics-abc",namespace="monitoring"} 1 1"#,
            "node-a",
            &s
        ));
        assert!(keep_line(
            r#"kube_daemonset_created{daemonset="collector-logs",namespace="monitoring"} 1 1"#,
            "node-a",
            &s
        ));
        assert!(keep_line(
            r#"kube_namespace_created{namespace="monitoring"} 1 1"#,
            "node-a",
            &s
        ));
        assert!(!keep_line(
            r#"kube_pod_info{pod="unrelated",namespace="monitoring"} 1 1"#,
            "node-a",
            &s
        ));
    }

    #[test]
    fn test_rewrite_line_normalizes_node_and_timestamp() {
        let line = r#"kube_node_info{node="node-a",instance="10.0.0.5:9100"} 1 1675850001234"#;
        let rewritten = rewrite_line(line, &settings());
        assert!(rewritten.contains(r#"node="test-node""#));
        assert!(rewritten.contains(r#"instance="test-node""#));
        assert!(rewritten.ends_with("1675856675021"));
    }

    #[test]
    fn test_trim_response_end_to_end() {
        let body = concat!(
            "# TYPE kube_pod_info gauge\n",
            r#"kube_pod_info{pod="collector-metrics-abc",namespace="monitoring",node="node-a"} 1 1675850000111"#,
            "\n",
            r#"kube_pod_info{pod="unrelated",namespace="monitoring",node="node-a"} 1 1675850000111"#,
            "\n",
            r#"kube_node_info{node="node-a"} 1 1675850000111"#,
            "\n",
        );
        let trimmed = trim_response(body, &settings()).unwrap();
        assert!(trimmed.contains("# TYPE kube_pod_info gauge"));
        assert!(trimmed.contains(r#"pod="collector-metrics-abc""#));
        assert!(!trimmed.contains("unrelated"));
        assert!(trimmed.contains(r#"kube_node_info{node="test-node"}"#));
        assert!(!trimmed.contains("1675850000111"));
    }

    #[test]
    fn test_trim_response_without_collector_pod_fails() {
        let body = r#"kube_pod_info{pod="x",namespace="other",node="n"} 1 1"#;
        assert!(trim_response(body, &settings()).is_err());
    }
}
