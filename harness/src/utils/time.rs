//! Time utility functions

use chrono::{DateTime, TimeZone, Utc};

/// Convert nanoseconds since Unix epoch to DateTime<Utc>
pub fn nanos_to_datetime(nanos: u64) -> DateTime<Utc> {
    let secs = (nanos / 1_000_000_000) as i64;
    let nsecs = (nanos % 1_000_000_000) as u32;
    Utc.timestamp_opt(secs, nsecs).single().unwrap_or_else(|| {
        tracing::warn!(nanos, "Invalid timestamp, using epoch");
        DateTime::UNIX_EPOCH
    })
}

/// Current wall-clock time as nanoseconds since Unix epoch
pub fn now_unix_nanos() -> u64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(0).max(0) as u64
}

/// Convert a ClickHouse DateTime64(9) column value to Unix nanoseconds.
///
/// ClickHouse timestamps predating the epoch clamp to zero; the telemetry
/// tables never contain them.
pub fn offset_to_unix_nanos(ts: time::OffsetDateTime) -> u64 {
    ts.unix_timestamp_nanos().max(0) as u64
}

/// OTLP JSON renders uint64 timestamps as decimal strings
pub fn nanos_to_otlp_string(nanos: u64) -> String {
    nanos.to_string()
}
