use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::constants::{
    ENV_CLICKHOUSE_ENDPOINT, ENV_LOKI_ENDPOINT, ENV_MOCK_ENDPOINT, ENV_PROMETHEUS_ENDPOINT,
    ENV_USE_LOKI, ENV_WRITE_ACTUAL,
};
use crate::suites::SuiteKind;

#[derive(Parser)]
#[command(name = "collector-harness")]
#[command(version, about = "Verification harness for the k8s telemetry collector", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Mock telemetry endpoint (host:port) serving the collector's JSON feeds
    #[arg(long, global = true, env = ENV_MOCK_ENDPOINT)]
    pub mock_endpoint: Option<String>,

    /// ClickHouse HTTP endpoint (host:port)
    #[arg(long, global = true, env = ENV_CLICKHOUSE_ENDPOINT)]
    pub clickhouse_endpoint: Option<String>,

    /// Loki base URL
    #[arg(long, global = true, env = ENV_LOKI_ENDPOINT)]
    pub loki_endpoint: Option<String>,

    /// Prometheus (or federation mock) endpoint (host:port)
    #[arg(long, global = true, env = ENV_PROMETHEUS_ENDPOINT)]
    pub prometheus_endpoint: Option<String>,

    /// Directory with expected fixtures
    #[arg(long, global = true)]
    pub fixtures_dir: Option<PathBuf>,

    /// Polling deadline for suite assertions, in seconds
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Sleep between polling attempts, in seconds
    #[arg(long, global = true)]
    pub interval_secs: Option<u64>,

    /// Query events from Loki instead of the mock endpoint feed
    #[arg(long, global = true, env = ENV_USE_LOKI)]
    pub use_loki: Option<bool>,

    /// Overwrite expected fixtures with the observed output
    #[arg(long, global = true, env = ENV_WRITE_ACTUAL)]
    pub write_actual: Option<bool>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Run a verification suite against the test cluster
    Suite {
        /// Suite to run; falls back to the TEST_SUITE environment variable
        #[arg(value_parser = parse_suite)]
        suite: Option<SuiteKind>,
    },
    /// Maintenance tooling
    Tool {
        #[command(subcommand)]
        command: ToolCommands,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum ToolCommands {
    /// Capture the current merged mock-endpoint output as the expected fixture
    SetExpected {
        /// Output file (defaults to <fixtures-dir>/expected_output.json)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Regenerate entity state event fixtures from ClickHouse
    GenerateFixtures {
        /// Output directory (defaults to <fixtures-dir>/expected_entitystateevents)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Bump Docker image tags in the Helm chart and open a pull request
    UpdateImages {
        /// Helm values file to rewrite
        #[arg(long, default_value = "deploy/helm/values.yaml")]
        values_file: PathBuf,

        /// Helm chart file to bump
        #[arg(long, default_value = "deploy/helm/Chart.yaml")]
        chart_file: PathBuf,

        /// Rewrite files locally without touching GitHub
        #[arg(long)]
        dry_run: bool,
    },
    /// Download a Prometheus federation response and trim it into a mock fixture
    TrimPromFixture {
        /// Output fixture file
        #[arg(long, default_value = "build/docker/wiremockFiles/redirectPrometheusResponse.txt")]
        output: PathBuf,
    },
}

/// Parse suite name from CLI/env string
fn parse_suite(s: &str) -> Result<SuiteKind, String> {
    match s.to_lowercase().as_str() {
        "metrics" => Ok(SuiteKind::Metrics),
        "logs" => Ok(SuiteKind::Logs),
        "events" => Ok(SuiteKind::Events),
        "manifests" => Ok(SuiteKind::Manifests),
        "entity-state" | "entity_state" => Ok(SuiteKind::EntityState),
        "entity-state-snapshot" | "entity_state_snapshot" => Ok(SuiteKind::EntityStateSnapshot),
        "all" => Ok(SuiteKind::All),
        _ => Err(format!(
            "Unknown suite '{}'. Valid options: metrics, logs, events, manifests, \
             entity-state, entity-state-snapshot, all",
            s
        )),
    }
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub mock_endpoint: Option<String>,
    pub clickhouse_endpoint: Option<String>,
    pub loki_endpoint: Option<String>,
    pub prometheus_endpoint: Option<String>,
    pub fixtures_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub interval_secs: Option<u64>,
    pub use_loki: Option<bool>,
    pub write_actual: Option<bool>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        mock_endpoint: cli.mock_endpoint,
        clickhouse_endpoint: cli.clickhouse_endpoint,
        loki_endpoint: cli.loki_endpoint,
        prometheus_endpoint: cli.prometheus_endpoint,
        fixtures_dir: cli.fixtures_dir,
        timeout_secs: cli.timeout_secs,
        interval_secs: cli.interval_secs,
        use_loki: cli.use_loki,
        write_actual: cli.write_actual,
    };
    (config, cli.command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suite_known_names() {
        assert!(matches!(parse_suite("metrics"), Ok(SuiteKind::Metrics)));
        assert!(matches!(parse_suite("LOGS"), Ok(SuiteKind::Logs)));
        assert!(matches!(
            parse_suite("entity-state"),
            Ok(SuiteKind::EntityState)
        ));
        assert!(matches!(
            parse_suite("entity_state"),
            Ok(SuiteKind::EntityState)
        ));
        assert!(matches!(parse_suite("all"), Ok(SuiteKind::All)));
    }

    #[test]
    fn test_parse_suite_unknown() {
        let err = parse_suite("traces").unwrap_err();
        assert!(err.contains("Unknown suite"));
    }
}
