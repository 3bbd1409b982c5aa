//! Application-wide constants

pub const APP_NAME_LOWER: &str = "collector_harness";

// =============================================================================
// Environment variables
// =============================================================================

pub const ENV_LOG: &str = "HARNESS_LOG";
pub const ENV_MOCK_ENDPOINT: &str = "TIMESERIES_MOCK_ENDPOINT";
pub const ENV_CLICKHOUSE_ENDPOINT: &str = "CLICKHOUSE_ENDPOINT";
pub const ENV_LOKI_ENDPOINT: &str = "LOKI_ENDPOINT";
pub const ENV_PROMETHEUS_ENDPOINT: &str = "PROMETHEUS_MOCK_ENDPOINT";
pub const ENV_TEST_SUITE: &str = "TEST_SUITE";
pub const ENV_USE_LOKI: &str = "USE_LOKI";
pub const ENV_CI: &str = "CI";
pub const ENV_WRITE_ACTUAL: &str = "WRITE_ACTUAL";
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const ENV_GITHUB_REPOSITORY: &str = "GITHUB_REPOSITORY";

// =============================================================================
// Defaults
// =============================================================================

pub const DEFAULT_MOCK_ENDPOINT: &str = "localhost:8088";
pub const DEFAULT_CLICKHOUSE_ENDPOINT: &str = "localhost:8123";
pub const DEFAULT_LOKI_ENDPOINT: &str = "http://localhost:3100";
pub const DEFAULT_PROMETHEUS_ENDPOINT: &str = "localhost:8080";

pub const CLICKHOUSE_DATABASE: &str = "otel";
pub const CLICKHOUSE_USER: &str = "default";

/// Directory with checked-in expected fixtures, relative to the crate root.
pub const DEFAULT_FIXTURES_DIR: &str = "testdata";

/// Subdirectory of the fixtures dir holding entity state event cases.
pub const ENTITY_STATE_FIXTURES_SUBDIR: &str = "expected_entitystateevents";

pub const EXPECTED_METRIC_NAMES_FILE: &str = "expected_metric_names.txt";
pub const EXPECTED_OUTPUT_FILE: &str = "expected_output.json";

/// Default polling deadline for suite assertions.
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 120;
/// Default sleep between polling attempts.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// Entity state snapshot polling: 60 attempts * 3 seconds = 180 s deadline.
pub const SNAPSHOT_POLL_ATTEMPTS: u32 = 60;
pub const SNAPSHOT_POLL_INTERVAL_SECS: u64 = 3;

/// Event collection via Loki can lag far behind the cluster.
pub const LOKI_EVENT_TIMEOUT_SECS: u64 = 600;
pub const LOKI_EVENT_POLL_INTERVAL_SECS: u64 = 10;
