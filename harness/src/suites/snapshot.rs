//! Entity state snapshot suite
//!
//! Every checked-in expected case must be found in the ClickHouse entity
//! event stream. The event stream converges slowly after a deploy, so
//! each case retries a fixed number of attempts before failing with the
//! list of missing events.

use std::time::Duration;

use anyhow::{Result, bail};

use crate::core::config::HarnessConfig;
use crate::core::constants::{SNAPSHOT_POLL_ATTEMPTS, SNAPSHOT_POLL_INTERVAL_SECS};
use crate::data::TelemetryStore;
use crate::fixtures::matcher::missing_events;
use crate::fixtures::{ExpectedCase, load_cases};
use crate::otlp::canonical_json;

pub async fn run(config: &HarnessConfig) -> Result<()> {
    let fixtures_dir = config.entity_state_fixtures_dir();
    let cases = load_cases(&fixtures_dir)?;
    if cases.is_empty() {
        bail!("No fixture cases found in {}", fixtures_dir.display());
    }

    let store = TelemetryStore::new(&config.clickhouse);
    for (name, case) in &cases {
        check_case(&store, name, case).await?;
    }
    Ok(())
}

async fn check_case(store: &TelemetryStore, name: &str, case: &ExpectedCase) -> Result<()> {
    tracing::info!(
        case = name,
        resource_attributes = case.resource_attributes.len(),
        scope_attributes = case.scope_attributes.len(),
        events = case.events.len(),
        "Checking entity state case"
    );

    let interval = Duration::from_secs(SNAPSHOT_POLL_INTERVAL_SECS);
    let mut last_error = String::from("no events fetched yet");

    for attempt in 1..=SNAPSHOT_POLL_ATTEMPTS {
        match store.fetch_entity_state_events().await {
            Ok(payloads) if payloads.is_empty() => {
                last_error = "no entity state events in ClickHouse yet".to_string();
            }
            Ok(payloads) => {
                let missing = missing_events(&payloads, case);
                if missing.is_empty() {
                    tracing::info!(case = name, attempt, "All expected events found");
                    return Ok(());
                }
                last_error = format!(
                    "missing expected events: {}",
                    missing
                        .iter()
                        .map(|event| canonical_json(&serde_json::Value::Object((*event).clone())))
                        .collect::<Vec<_>>()
                        .join("; ")
                );
            }
            Err(e) => {
                last_error = e.to_string();
                tracing::warn!(case = name, error = %last_error, "ClickHouse query failed");
            }
        }

        if attempt < SNAPSHOT_POLL_ATTEMPTS {
            tracing::debug!(case = name, attempt, "Retrying");
            tokio::time::sleep(interval).await;
        }
    }

    bail!(
        "Case {} failed after {} attempts. {}",
        name,
        SNAPSHOT_POLL_ATTEMPTS,
        last_error
    )
}
