//! Typed rows for the collector's ClickHouse tables
//!
//! The collector's ClickHouse exporter writes `otel_logs` plus one
//! `otel_metrics_*` table per metric type. Attribute maps arrive as
//! `Map(String, String)`, which the client decodes as key/value pairs.

use clickhouse::Row;
use serde::Deserialize;
use time::OffsetDateTime;

/// Attribute map column, in insertion order
pub type AttrMap = Vec<(String, String)>;

/// Log row from `otel_logs`
#[derive(Row, Deserialize)]
pub struct LogRow {
    #[serde(rename = "Timestamp", with = "clickhouse::serde::time::datetime64::nanos")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "ResourceAttributes")]
    pub resource_attributes: AttrMap,
    #[serde(rename = "ScopeAttributes")]
    pub scope_attributes: AttrMap,
    #[serde(rename = "LogAttributes")]
    pub log_attributes: AttrMap,
    #[serde(rename = "Body")]
    pub body: String,
    #[serde(rename = "SeverityText")]
    pub severity_text: String,
    #[serde(rename = "SeverityNumber")]
    pub severity_number: i32,
}

/// Entity state event row from `otel_logs` (attribute columns only)
#[derive(Row, Deserialize)]
pub struct EntityEventRow {
    #[serde(rename = "Timestamp", with = "clickhouse::serde::time::datetime64::nanos")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "ResourceAttributes")]
    pub resource_attributes: AttrMap,
    #[serde(rename = "ScopeAttributes")]
    pub scope_attributes: AttrMap,
    #[serde(rename = "LogAttributes")]
    pub log_attributes: AttrMap,
}

/// Gauge row from `otel_metrics_gauge`
#[derive(Row, Deserialize)]
pub struct GaugeRow {
    #[serde(rename = "TimeUnix", with = "clickhouse::serde::time::datetime64::nanos")]
    pub time_unix: OffsetDateTime,
    #[serde(rename = "ResourceAttributes")]
    pub resource_attributes: AttrMap,
    #[serde(rename = "ScopeAttributes")]
    pub scope_attributes: AttrMap,
    #[serde(rename = "MetricName")]
    pub metric_name: String,
    #[serde(rename = "Attributes")]
    pub attributes: AttrMap,
    #[serde(rename = "Value")]
    pub value: f64,
}

/// Sum row from `otel_metrics_sum`
#[derive(Row, Deserialize)]
pub struct SumRow {
    #[serde(rename = "TimeUnix", with = "clickhouse::serde::time::datetime64::nanos")]
    pub time_unix: OffsetDateTime,
    #[serde(rename = "ResourceAttributes")]
    pub resource_attributes: AttrMap,
    #[serde(rename = "ScopeAttributes")]
    pub scope_attributes: AttrMap,
    #[serde(rename = "MetricName")]
    pub metric_name: String,
    #[serde(rename = "Attributes")]
    pub attributes: AttrMap,
    #[serde(rename = "Value")]
    pub value: f64,
    #[serde(rename = "IsMonotonic")]
    pub is_monotonic: bool,
    #[serde(rename = "AggregationTemporality")]
    pub aggregation_temporality: i32,
}

/// Histogram row from `otel_metrics_histogram`
#[derive(Row, Deserialize)]
pub struct HistogramRow {
    #[serde(rename = "TimeUnix", with = "clickhouse::serde::time::datetime64::nanos")]
    pub time_unix: OffsetDateTime,
    #[serde(rename = "ResourceAttributes")]
    pub resource_attributes: AttrMap,
    #[serde(rename = "ScopeAttributes")]
    pub scope_attributes: AttrMap,
    #[serde(rename = "MetricName")]
    pub metric_name: String,
    #[serde(rename = "Attributes")]
    pub attributes: AttrMap,
    #[serde(rename = "Count")]
    pub count: u64,
    #[serde(rename = "Sum")]
    pub sum: f64,
    #[serde(rename = "BucketCounts")]
    pub bucket_counts: Vec<u64>,
    #[serde(rename = "ExplicitBounds")]
    pub explicit_bounds: Vec<f64>,
    #[serde(rename = "Min")]
    pub min: f64,
    #[serde(rename = "Max")]
    pub max: f64,
    #[serde(rename = "AggregationTemporality")]
    pub aggregation_temporality: i32,
}

/// Single-column discovery row
#[derive(Row, Deserialize)]
pub struct NameRow {
    pub name: String,
}

/// Single-column count row
#[derive(Row, Deserialize)]
pub struct CountRow {
    pub count: u64,
}
