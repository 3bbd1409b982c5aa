//! Fixed-interval polling until a check passes or the deadline elapses
//!
//! The collector needs time to observe the cluster and flush its
//! pipelines, so every suite assertion is wrapped in the same loop:
//! fetch, check, sleep, repeat. Transport errors are retried exactly like
//! failed checks; only the deadline ends the loop, carrying the last
//! failure for the report.

use std::time::Instant;

use thiserror::Error;

use crate::core::config::PollConfig;

#[derive(Error, Debug)]
#[error("{what} did not pass within {timeout_secs}s after {attempts} attempts: {last_error}")]
pub struct PollTimeout {
    pub what: String,
    pub timeout_secs: u64,
    pub attempts: u32,
    pub last_error: String,
}

/// Run `attempt` until it returns Ok, sleeping `poll.interval` between
/// tries and giving up after `poll.timeout`.
pub async fn poll_until<F, Fut>(
    poll: &PollConfig,
    what: &str,
    mut attempt: F,
) -> Result<(), PollTimeout>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match attempt().await {
            Ok(()) => {
                tracing::info!(what, attempts, "Check passed");
                return Ok(());
            }
            Err(reason) => {
                if started.elapsed() >= poll.timeout {
                    return Err(PollTimeout {
                        what: what.to_string(),
                        timeout_secs: poll.timeout.as_secs(),
                        attempts,
                        last_error: reason,
                    });
                }
                tracing::debug!(what, attempt = attempts, reason = %reason, "Retrying");
                tokio::time::sleep(poll.interval).await;
            }
        }
    }
}
