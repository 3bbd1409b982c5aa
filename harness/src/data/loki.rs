//! Loki log store client
//!
//! Newer test clusters ship collector logs and Kubernetes events into
//! Loki instead of flat mock files. The client wraps the HTTP query API:
//! readiness, label listing, range queries and pattern polling.

use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;

use crate::utils::time::now_unix_nanos;

#[derive(Error, Debug)]
pub enum LokiError {
    #[error("Request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response from {url}: {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Invalid duration '{0}': expected <number><ms|s|m|h|d>")]
    InvalidDuration(String),

    #[error("Timed out after {timeout_secs}s waiting for '{pattern}' (last state: {last_state})")]
    Timeout {
        pattern: String,
        timeout_secs: u64,
        last_state: String,
    },
}

/// A returned log line with its nanosecond timestamp
pub type LogEntry = (u64, String);

pub struct LokiClient {
    base_url: String,
    http: reqwest::Client,
}

impl LokiClient {
    /// Create a client for the given base URL (trailing slash tolerated)
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Readiness probe: GET /ready is 200
    pub async fn is_ready(&self) -> bool {
        let url = format!("{}/ready", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Loki readiness probe failed");
                false
            }
        }
    }

    /// All known label names
    pub async fn labels(&self) -> Result<Vec<String>, LokiError> {
        let url = format!("{}/loki/api/v1/labels", self.base_url);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(LokiError::Status {
                url,
                status: response.status(),
            });
        }
        let body: Value = response.json().await?;
        Ok(body
            .get("data")
            .and_then(Value::as_array)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Range query over an explicit nanosecond window
    pub async fn query_range(
        &self,
        query: &str,
        start_ns: u64,
        end_ns: u64,
        limit: u32,
    ) -> Result<Vec<LogEntry>, LokiError> {
        let url = format!("{}/loki/api/v1/query_range", self.base_url);
        let start = start_ns.to_string();
        let end = end_ns.to_string();
        let limit = limit.to_string();
        let response = self
            .http
            .get(&url)
            .query(&[
                ("query", query),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(LokiError::Status {
                url,
                status: response.status(),
            });
        }
        let body: Value = response.json().await?;
        Ok(parse_streams(&body))
    }

    /// Range query over the trailing `duration` window (e.g. "5m")
    pub async fn query_recent_logs(
        &self,
        query: &str,
        duration: &str,
        limit: u32,
    ) -> Result<Vec<LogEntry>, LokiError> {
        let end_ns = now_unix_nanos();
        let window = parse_duration_to_ns(duration)?;
        let start_ns = end_ns.saturating_sub(window);
        self.query_range(query, start_ns, end_ns, limit).await
    }

    /// Convenience search by resource filters over the trailing window
    pub async fn search_logs_by_attributes(
        &self,
        namespace: Option<&str>,
        pod: Option<&str>,
        container: Option<&str>,
        text_filter: Option<&str>,
        duration: &str,
        limit: u32,
    ) -> Result<Vec<LogEntry>, LokiError> {
        let query = build_logql(namespace, pod, container, text_filter);
        self.query_recent_logs(&query, duration, limit).await
    }

    /// Number of log lines matching the query in the trailing window
    pub async fn count_logs_matching(
        &self,
        query: &str,
        duration: &str,
    ) -> Result<usize, LokiError> {
        Ok(self.query_recent_logs(query, duration, 5000).await?.len())
    }

    /// Poll until some line returned by the query contains `pattern`.
    ///
    /// Query errors inside the loop are logged and retried like misses;
    /// the timeout error carries the last observed state.
    pub async fn wait_for_log_match(
        &self,
        query: &str,
        pattern: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<String, LokiError> {
        let started = Instant::now();
        let mut last_state = "no matching lines yet".to_string();

        loop {
            match self.query_recent_logs(query, "5m", 1000).await {
                Ok(entries) => {
                    if let Some((_, line)) =
                        entries.iter().find(|(_, line)| line.contains(pattern))
                    {
                        return Ok(line.clone());
                    }
                    last_state = format!("{} lines without the pattern", entries.len());
                }
                Err(e) => {
                    tracing::warn!(error = %e, query, "Loki query failed, retrying");
                    last_state = e.to_string();
                }
            }

            if started.elapsed() >= timeout {
                return Err(LokiError::Timeout {
                    pattern: pattern.to_string(),
                    timeout_secs: timeout.as_secs(),
                    last_state,
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

/// Flatten a streams response into (timestamp, line) pairs
fn parse_streams(body: &Value) -> Vec<LogEntry> {
    let mut entries = Vec::new();
    let streams = body
        .get("data")
        .and_then(|d| d.get("result"))
        .and_then(Value::as_array);
    for stream in streams.into_iter().flatten() {
        for value in stream
            .get("values")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let ts = value
                .get(0)
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<u64>().ok());
            let line = value.get(1).and_then(Value::as_str);
            if let (Some(ts), Some(line)) = (ts, line) {
                entries.push((ts, line.to_string()));
            }
        }
    }
    entries
}

/// Parse a duration like "100ms", "10s", "5m", "2h" or "1d" to nanoseconds
pub fn parse_duration_to_ns(duration: &str) -> Result<u64, LokiError> {
    let invalid = || LokiError::InvalidDuration(duration.to_string());

    let (digits, unit) = duration
        .find(|c: char| !c.is_ascii_digit())
        .map(|idx| duration.split_at(idx))
        .ok_or_else(invalid)?;
    let amount: u64 = digits.parse().map_err(|_| invalid())?;
    let factor: u64 = match unit {
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 3_600 * 1_000_000_000,
        "d" => 86_400 * 1_000_000_000,
        _ => return Err(invalid()),
    };
    Ok(amount * factor)
}

/// Build a LogQL query from optional resource filters.
///
/// Index labels select the namespace/pod/container streams; the free-text
/// filter narrows by line content.
pub fn build_logql(
    namespace: Option<&str>,
    pod: Option<&str>,
    container: Option<&str>,
    text_filter: Option<&str>,
) -> String {
    let mut selectors = Vec::new();
    if let Some(namespace) = namespace {
        selectors.push(format!("k8s_namespace_name=\"{}\"", namespace));
    }
    if let Some(pod) = pod {
        selectors.push(format!("k8s_pod_name=\"{}\"", pod));
    }
    if let Some(container) = container {
        selectors.push(format!("k8s_container_name=\"{}\"", container));
    }

    let mut query = if selectors.is_empty() {
        // An empty matcher set is invalid LogQL; match any namespace.
        "{k8s_namespace_name=~\".+\"}".to_string()
    } else {
        format!("{{{}}}", selectors.join(", "))
    };
    if let Some(text) = text_filter {
        query.push_str(&format!(" |= \"{}\"", text));
    }
    query
}
