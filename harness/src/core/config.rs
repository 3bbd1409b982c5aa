use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use super::cli::CliConfig;
use super::constants::{
    CLICKHOUSE_DATABASE, CLICKHOUSE_USER, DEFAULT_CLICKHOUSE_ENDPOINT, DEFAULT_FIXTURES_DIR,
    DEFAULT_LOKI_ENDPOINT, DEFAULT_MOCK_ENDPOINT, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_POLL_TIMEOUT_SECS, DEFAULT_PROMETHEUS_ENDPOINT, ENV_CI, ENV_CLICKHOUSE_ENDPOINT,
    ENV_GITHUB_REPOSITORY, ENV_GITHUB_TOKEN, ENV_LOKI_ENDPOINT, ENV_MOCK_ENDPOINT,
    ENV_PROMETHEUS_ENDPOINT, ENV_USE_LOKI, ENV_WRITE_ACTUAL, ENTITY_STATE_FIXTURES_SUBDIR,
    EXPECTED_METRIC_NAMES_FILE,
};

/// ClickHouse connection settings
#[derive(Debug, Clone)]
pub struct ClickhouseConfig {
    /// HTTP endpoint as host:port
    pub endpoint: String,
    pub database: String,
    pub user: String,
}

impl ClickhouseConfig {
    /// Full URL for the HTTP interface
    pub fn url(&self) -> String {
        format!("http://{}", self.endpoint)
    }
}

/// Polling behavior for suite assertions
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS),
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

/// GitHub access for the image bump tooling
#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub token: String,
    /// owner/name
    pub repository: String,
}

/// Resolved harness configuration (CLI over environment over defaults)
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub mock_endpoint: String,
    pub clickhouse: ClickhouseConfig,
    pub loki_base_url: String,
    pub prometheus_endpoint: String,
    pub fixtures_dir: PathBuf,
    pub poll: PollConfig,
    pub use_loki: bool,
    pub write_actual: bool,
    pub ci: bool,
}

impl HarnessConfig {
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let mock_endpoint = resolve(
            cli.mock_endpoint.clone(),
            ENV_MOCK_ENDPOINT,
            DEFAULT_MOCK_ENDPOINT,
        );
        let clickhouse_endpoint = resolve(
            cli.clickhouse_endpoint.clone(),
            ENV_CLICKHOUSE_ENDPOINT,
            DEFAULT_CLICKHOUSE_ENDPOINT,
        );
        let loki_base_url = resolve(
            cli.loki_endpoint.clone(),
            ENV_LOKI_ENDPOINT,
            DEFAULT_LOKI_ENDPOINT,
        )
        .trim_end_matches('/')
        .to_string();
        let prometheus_endpoint = resolve(
            cli.prometheus_endpoint.clone(),
            ENV_PROMETHEUS_ENDPOINT,
            DEFAULT_PROMETHEUS_ENDPOINT,
        );

        let poll = PollConfig {
            timeout: Duration::from_secs(cli.timeout_secs.unwrap_or(DEFAULT_POLL_TIMEOUT_SECS)),
            interval: Duration::from_secs(cli.interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS)),
        };

        Ok(Self {
            mock_endpoint,
            clickhouse: ClickhouseConfig {
                endpoint: clickhouse_endpoint,
                database: CLICKHOUSE_DATABASE.to_string(),
                user: CLICKHOUSE_USER.to_string(),
            },
            loki_base_url,
            prometheus_endpoint,
            fixtures_dir: cli
                .fixtures_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FIXTURES_DIR)),
            poll,
            use_loki: cli.use_loki.unwrap_or_else(|| env_flag(ENV_USE_LOKI)),
            write_actual: cli
                .write_actual
                .unwrap_or_else(|| env_flag(ENV_WRITE_ACTUAL)),
            ci: env_flag(ENV_CI),
        })
    }

    /// Checked-in expected metric names file
    pub fn expected_metric_names_file(&self) -> PathBuf {
        self.fixtures_dir.join(EXPECTED_METRIC_NAMES_FILE)
    }

    /// Checked-in entity state event cases
    pub fn entity_state_fixtures_dir(&self) -> PathBuf {
        self.fixtures_dir.join(ENTITY_STATE_FIXTURES_SUBDIR)
    }

    /// GitHub access, required by the image bump tooling
    pub fn github(&self) -> Result<GithubConfig> {
        let token = std::env::var(ENV_GITHUB_TOKEN)
            .with_context(|| format!("{} environment variable is required", ENV_GITHUB_TOKEN))?;
        let repository = std::env::var(ENV_GITHUB_REPOSITORY).with_context(|| {
            format!(
                "{} environment variable is required (owner/name)",
                ENV_GITHUB_REPOSITORY
            )
        })?;
        if repository.split('/').count() != 2 {
            anyhow::bail!(
                "{} must be set as owner/name, got '{}'",
                ENV_GITHUB_REPOSITORY,
                repository
            );
        }
        Ok(GithubConfig { token, repository })
    }
}

fn resolve(cli_value: Option<String>, env_name: &str, default: &str) -> String {
    cli_value
        .or_else(|| std::env::var(env_name).ok())
        .unwrap_or_else(|| default.to_string())
}

/// Truthy environment flag: "true" (any case) or "1"
fn env_flag(env_name: &str) -> bool {
    std::env::var(env_name)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_cli() -> CliConfig {
        CliConfig {
            mock_endpoint: Some("mock:1".to_string()),
            clickhouse_endpoint: Some("ch:2".to_string()),
            loki_endpoint: Some("http://loki:3/".to_string()),
            prometheus_endpoint: Some("prom:4".to_string()),
            fixtures_dir: Some(PathBuf::from("/tmp/fixtures")),
            timeout_secs: Some(5),
            interval_secs: Some(1),
            use_loki: Some(true),
            write_actual: Some(false),
        }
    }

    #[test]
    fn test_cli_values_win() {
        let config = HarnessConfig::load(&full_cli()).unwrap();
        assert_eq!(config.mock_endpoint, "mock:1");
        assert_eq!(config.clickhouse.endpoint, "ch:2");
        assert_eq!(config.prometheus_endpoint, "prom:4");
        assert_eq!(config.poll.timeout, Duration::from_secs(5));
        assert_eq!(config.poll.interval, Duration::from_secs(1));
        assert!(config.use_loki);
        assert!(!config.write_actual);
    }

    #[test]
    fn test_loki_trailing_slash_trimmed() {
        let config = HarnessConfig::load(&full_cli()).unwrap();
        assert_eq!(config.loki_base_url, "http://loki:3");
    }

    #[test]
    fn test_clickhouse_url() {
        let config = HarnessConfig::load(&full_cli()).unwrap();
        assert_eq!(config.clickhouse.url(), "http://ch:2");
        assert_eq!(config.clickhouse.database, "otel");
    }

    #[test]
    fn test_fixture_paths() {
        let config = HarnessConfig::load(&full_cli()).unwrap();
        assert_eq!(
            config.expected_metric_names_file(),
            PathBuf::from("/tmp/fixtures/expected_metric_names.txt")
        );
        assert_eq!(
            config.entity_state_fixtures_dir(),
            PathBuf::from("/tmp/fixtures/expected_entitystateevents")
        );
    }
}
