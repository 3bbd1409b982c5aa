//! Mock telemetry endpoint client
//!
//! The test cluster runs a mock receiver that records every export the
//! collector makes and serves the accumulated payloads as JSON-Lines
//! files over HTTP (one file per feed).

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MockEndpointError {
    #[error("Request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response from {url}: {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

/// Feeds the mock receiver exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Metrics,
    Logs,
    Events,
    EntityStateEvents,
}

impl Feed {
    pub fn file_name(&self) -> &'static str {
        match self {
            Feed::Metrics => "metrics.json",
            Feed::Logs => "logs.json",
            Feed::Events => "events.json",
            Feed::EntityStateEvents => "entitystateevents.json",
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

pub struct MockEndpoint {
    endpoint: String,
    http: reqwest::Client,
}

impl MockEndpoint {
    /// Create a client for the given host:port endpoint
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn feed_url(&self, feed: Feed) -> String {
        format!("http://{}/{}", self.endpoint, feed.file_name())
    }

    /// Download the raw JSON-Lines body of a feed
    pub async fn fetch(&self, feed: Feed) -> Result<String, MockEndpointError> {
        let url = self.feed_url(feed);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(MockEndpointError::Status {
                url,
                status: response.status(),
            });
        }
        Ok(response.text().await?)
    }
}
