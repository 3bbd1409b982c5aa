//! Core application

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::core::cli::{self, Commands, ToolCommands};
use crate::core::config::HarnessConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG, ENV_TEST_SUITE, EXPECTED_OUTPUT_FILE};
use crate::data::{Feed, MockEndpoint, TelemetryStore};
use crate::fixtures::generate::FixtureGenerator;
use crate::maintenance::{images, prom_fixture};
use crate::otlp::{canonical_pretty, merge_payload_lines};
use crate::suites::{self, SuiteKind, runner::poll_until};

pub struct CoreApp;

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Harness starting");

        let (cli_config, command) = cli::parse();
        let config = HarnessConfig::load(&cli_config)?;
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::Tool { command }) => Self::run_tool(command, &config).await,
            Some(Commands::Suite { suite }) => {
                let suite = suite.unwrap_or_else(Self::suite_from_env);
                suites::run(suite, &config).await
            }
            None => {
                let suite = Self::suite_from_env();
                suites::run(suite, &config).await
            }
        }
    }

    /// TEST_SUITE environment fallback, defaulting to the full run
    fn suite_from_env() -> SuiteKind {
        let Ok(raw) = std::env::var(ENV_TEST_SUITE) else {
            return SuiteKind::All;
        };
        match raw.to_lowercase().as_str() {
            "metrics" => SuiteKind::Metrics,
            "logs" => SuiteKind::Logs,
            "events" => SuiteKind::Events,
            "manifests" => SuiteKind::Manifests,
            "entity-state" | "entity_state" => SuiteKind::EntityState,
            "entity-state-snapshot" | "entity_state_snapshot" => SuiteKind::EntityStateSnapshot,
            "all" | "" => SuiteKind::All,
            other => {
                tracing::warn!(suite = other, "Unknown TEST_SUITE value, running all suites");
                SuiteKind::All
            }
        }
    }

    async fn run_tool(command: ToolCommands, config: &HarnessConfig) -> Result<()> {
        match command {
            ToolCommands::SetExpected { output } => {
                let output =
                    output.unwrap_or_else(|| config.fixtures_dir.join(EXPECTED_OUTPUT_FILE));
                Self::set_expected(config, &output).await
            }
            ToolCommands::GenerateFixtures { output_dir } => {
                let output_dir = output_dir.unwrap_or_else(|| config.entity_state_fixtures_dir());
                Self::generate_fixtures(config, output_dir).await
            }
            ToolCommands::UpdateImages {
                values_file,
                chart_file,
                dry_run,
            } => {
                let github = if dry_run { None } else { Some(config.github()?) };
                images::run(github, values_file, chart_file, dry_run).await
            }
            ToolCommands::TrimPromFixture { output } => {
                prom_fixture::run(
                    &config.prometheus_endpoint,
                    &output,
                    &prom_fixture::TrimSettings::default(),
                )
                .await
            }
        }
    }

    /// Capture the merged mock metrics feed as the expected fixture
    async fn set_expected(config: &HarnessConfig, output: &PathBuf) -> Result<()> {
        let mock = MockEndpoint::new(&config.mock_endpoint);

        poll_until(&config.poll, "mock feed capture", || {
            let mock = &mock;
            async move {
                let content = mock
                    .fetch(Feed::Metrics)
                    .await
                    .map_err(|e| e.to_string())?;
                let merged = merge_payload_lines(&content).map_err(|e| e.to_string())?;
                if merged
                    .get("resourceMetrics")
                    .and_then(serde_json::Value::as_array)
                    .map(Vec::is_empty)
                    .unwrap_or(true)
                {
                    return Err("no metrics exported yet".to_string());
                }
                let mut rendered = canonical_pretty(&merged);
                rendered.push('\n');
                std::fs::write(output, rendered)
                    .map_err(|e| format!("failed to write expected output: {e}"))?;
                Ok(())
            }
        })
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

        tracing::info!(file = %output.display(), "Expected output written");
        Ok(())
    }

    async fn generate_fixtures(config: &HarnessConfig, output_dir: PathBuf) -> Result<()> {
        let store = TelemetryStore::new(&config.clickhouse);
        store
            .health_check()
            .await
            .context("ClickHouse is not reachable (is port-forwarding running?)")?;

        let generator = FixtureGenerator::new(&store, output_dir);
        let summary = generator.generate_all().await?;
        tracing::info!(
            entity_files = summary.entity_types.len(),
            relationship_files = summary.relationship_types.len(),
            total_entities = summary.total_entities,
            total_relationships = summary.total_relationships,
            "All fixture files generated"
        );
        Ok(())
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }
}
