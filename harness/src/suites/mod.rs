//! Verification suites
//!
//! One module per telemetry surface of the collector. Assertions are pure
//! functions over OTLP-shaped JSON so they stay unit-testable; the `run`
//! entry points do the fetching, polling and cluster setup around them.

pub mod entity_state;
pub mod events;
pub mod logs;
pub mod manifests;
pub mod metrics;
pub mod runner;
pub mod snapshot;

use std::fmt;

use anyhow::Result;

use crate::core::config::HarnessConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteKind {
    Metrics,
    Logs,
    Events,
    Manifests,
    EntityState,
    EntityStateSnapshot,
    All,
}

impl fmt::Display for SuiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SuiteKind::Metrics => "metrics",
            SuiteKind::Logs => "logs",
            SuiteKind::Events => "events",
            SuiteKind::Manifests => "manifests",
            SuiteKind::EntityState => "entity-state",
            SuiteKind::EntityStateSnapshot => "entity-state-snapshot",
            SuiteKind::All => "all",
        };
        write!(f, "{}", name)
    }
}

const ALL_SUITES: &[SuiteKind] = &[
    SuiteKind::Metrics,
    SuiteKind::Logs,
    SuiteKind::Events,
    SuiteKind::Manifests,
    SuiteKind::EntityState,
    SuiteKind::EntityStateSnapshot,
];

/// Run one suite, or every suite in order for `All`. Failures don't stop
/// later suites; the first failure is reported after all have run.
pub async fn run(kind: SuiteKind, config: &HarnessConfig) -> Result<()> {
    let selected: &[SuiteKind] = match kind {
        SuiteKind::All => ALL_SUITES,
        _ => std::slice::from_ref(&kind),
    };

    let mut failures = Vec::new();
    for suite in selected {
        tracing::info!(suite = %suite, "Running suite");
        let result = match suite {
            SuiteKind::Metrics => metrics::run(config).await,
            SuiteKind::Logs => logs::run(config).await,
            SuiteKind::Events => events::run(config).await,
            SuiteKind::Manifests => manifests::run(config).await,
            SuiteKind::EntityState => entity_state::run(config).await,
            SuiteKind::EntityStateSnapshot => snapshot::run(config).await,
            SuiteKind::All => unreachable!("All is expanded above"),
        };
        match result {
            Ok(()) => tracing::info!(suite = %suite, "Suite passed"),
            Err(e) => {
                tracing::error!(suite = %suite, error = %format!("{e:#}"), "Suite failed");
                failures.push((*suite, e));
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        let names: Vec<String> = failures.iter().map(|(s, _)| s.to_string()).collect();
        anyhow::bail!("{} suite(s) failed: {}", failures.len(), names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_display_names_round_trip_kebab_case() {
        assert_eq!(SuiteKind::EntityStateSnapshot.to_string(), "entity-state-snapshot");
        assert_eq!(SuiteKind::Metrics.to_string(), "metrics");
    }

    #[test]
    fn test_all_suites_listed_once() {
        assert_eq!(ALL_SUITES.len(), 6);
        assert!(!ALL_SUITES.contains(&SuiteKind::All));
    }
}
