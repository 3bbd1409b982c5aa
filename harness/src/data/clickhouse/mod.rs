//! ClickHouse telemetry store
//!
//! The test cluster ships the collector's output into ClickHouse through
//! the OTLP exporter tables (`otel_logs`, `otel_metrics_*`). Suites read
//! them over the async HTTP client and convert rows back into OTLP-shaped
//! JSON for assertions.

pub mod convert;
pub mod error;
pub mod rows;

pub use error::ClickhouseError;

use clickhouse::Client;
use serde_json::Value;

use crate::core::config::ClickhouseConfig;
use crate::otlp::keys;
use convert::{
    entity_event_to_otlp, gauge_to_entry, histogram_to_entry, log_to_otlp, sum_to_entry,
};
use rows::{CountRow, EntityEventRow, GaugeRow, HistogramRow, LogRow, NameRow, SumRow};

/// Query access to the collector's ClickHouse tables
pub struct TelemetryStore {
    client: Client,
}

impl TelemetryStore {
    pub fn new(config: &ClickhouseConfig) -> Self {
        let client = Client::default()
            .with_url(config.url())
            .with_database(&config.database)
            .with_user(&config.user);
        tracing::debug!(
            endpoint = %config.endpoint,
            database = %config.database,
            "TelemetryStore initialized"
        );
        Self { client }
    }

    /// Health check - verify connection to ClickHouse
    pub async fn health_check(&self) -> Result<(), ClickhouseError> {
        self.client
            .query("SELECT 1")
            .execute()
            .await
            .map_err(ClickhouseError::from)
    }

    /// All entity state events, newest first, as OTLP-shaped payloads
    /// (one single-resource payload per row).
    pub async fn fetch_entity_state_events(&self) -> Result<Vec<Value>, ClickhouseError> {
        let sql = "\
            SELECT Timestamp, ResourceAttributes, ScopeAttributes, LogAttributes \
            FROM otel_logs \
            WHERE ScopeAttributes['otel.entity.event_as_log'] = 'true' \
            ORDER BY Timestamp DESC";
        let rows: Vec<EntityEventRow> = self.client.query(sql).fetch_all().await?;
        Ok(rows.iter().map(entity_event_to_otlp).collect())
    }

    /// Log rows, newest first, as OTLP-shaped payloads. The optional
    /// filter is a WHERE clause body assembled by the caller.
    pub async fn fetch_logs(&self, filter: Option<&str>) -> Result<Vec<Value>, ClickhouseError> {
        let mut sql = String::from(
            "SELECT Timestamp, ResourceAttributes, ScopeAttributes, LogAttributes, \
             Body, SeverityText, SeverityNumber FROM otel_logs",
        );
        if let Some(clause) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        sql.push_str(" ORDER BY Timestamp DESC");
        let rows: Vec<LogRow> = self.client.query(&sql).fetch_all().await?;
        Ok(rows.iter().map(log_to_otlp).collect())
    }

    /// Gauge, sum and histogram metrics as OTLP-shaped payloads, grouped
    /// by resource and scope.
    pub async fn fetch_metrics_otlp(
        &self,
        filter: Option<&str>,
    ) -> Result<Vec<Value>, ClickhouseError> {
        let gauge_sql = metric_query(
            "SELECT TimeUnix, ResourceAttributes, ScopeAttributes, MetricName, Attributes, \
             Value FROM otel_metrics_gauge",
            filter,
        );
        let sum_sql = metric_query(
            "SELECT TimeUnix, ResourceAttributes, ScopeAttributes, MetricName, Attributes, \
             Value, IsMonotonic, AggregationTemporality FROM otel_metrics_sum",
            filter,
        );
        let histogram_sql = metric_query(
            "SELECT TimeUnix, ResourceAttributes, ScopeAttributes, MetricName, Attributes, \
             Count, Sum, BucketCounts, ExplicitBounds, Min, Max, AggregationTemporality \
             FROM otel_metrics_histogram",
            filter,
        );

        let mut entries = Vec::new();
        let gauges: Vec<GaugeRow> = self.client.query(&gauge_sql).fetch_all().await?;
        entries.extend(gauges.iter().map(gauge_to_entry));
        let sums: Vec<SumRow> = self.client.query(&sum_sql).fetch_all().await?;
        entries.extend(sums.iter().map(sum_to_entry));
        let histograms: Vec<HistogramRow> = self.client.query(&histogram_sql).fetch_all().await?;
        entries.extend(histograms.iter().map(histogram_to_entry));

        Ok(convert::group_metrics_by_resource(entries))
    }

    /// Count records in a table, optionally filtered
    pub async fn count_records(
        &self,
        table: &str,
        filter: Option<&str>,
    ) -> Result<u64, ClickhouseError> {
        let mut sql = format!("SELECT count() AS count FROM {}", table);
        if let Some(clause) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        let row: CountRow = self.client.query(&sql).fetch_one().await?;
        Ok(row.count)
    }

    /// Distinct entity types present in the entity state event stream
    pub async fn distinct_entity_types(&self) -> Result<Vec<String>, ClickhouseError> {
        let sql = format!(
            "SELECT DISTINCT LogAttributes['{entity_type}'] AS name \
             FROM otel_logs \
             WHERE ScopeAttributes['{event_as_log}'] = 'true' \
             AND LogAttributes['{event_type}'] = '{entity_state}' \
             AND LogAttributes['{entity_type}'] != '' \
             ORDER BY name",
            entity_type = keys::ENTITY_TYPE,
            event_as_log = keys::ENTITY_EVENT_AS_LOG,
            event_type = keys::ENTITY_EVENT_TYPE,
            entity_state = keys::EVENT_TYPE_ENTITY_STATE,
        );
        let rows: Vec<NameRow> = self.client.query(&sql).fetch_all().await?;
        Ok(rows.into_iter().map(|r| r.name).collect())
    }

    /// Distinct relationship types present in the relationship event stream
    pub async fn distinct_relationship_types(&self) -> Result<Vec<String>, ClickhouseError> {
        let sql = format!(
            "SELECT DISTINCT LogAttributes['{rel_type}'] AS name \
             FROM otel_logs \
             WHERE ScopeAttributes['{event_as_log}'] = 'true' \
             AND LogAttributes['{event_type}'] = '{rel_state}' \
             AND LogAttributes['{rel_type}'] != '' \
             ORDER BY name",
            rel_type = keys::RELATIONSHIP_TYPE,
            event_as_log = keys::ENTITY_EVENT_AS_LOG,
            event_type = keys::ENTITY_EVENT_TYPE,
            rel_state = keys::EVENT_TYPE_RELATIONSHIP_STATE,
        );
        let rows: Vec<NameRow> = self.client.query(&sql).fetch_all().await?;
        Ok(rows.into_iter().map(|r| r.name).collect())
    }

    /// Entity state event rows of one entity type, ordered by identity
    pub async fn fetch_entity_events_of_type(
        &self,
        entity_type: &str,
    ) -> Result<Vec<rows::EntityEventRow>, ClickhouseError> {
        let sql = format!(
            "SELECT Timestamp, ResourceAttributes, ScopeAttributes, LogAttributes \
             FROM otel_logs \
             WHERE ScopeAttributes['{event_as_log}'] = 'true' \
             AND LogAttributes['{event_type}'] = '{entity_state}' \
             AND LogAttributes['{type_key}'] = ? \
             ORDER BY LogAttributes['{id_key}']",
            event_as_log = keys::ENTITY_EVENT_AS_LOG,
            event_type = keys::ENTITY_EVENT_TYPE,
            entity_state = keys::EVENT_TYPE_ENTITY_STATE,
            type_key = keys::ENTITY_TYPE,
            id_key = keys::ENTITY_ID,
        );
        let rows: Vec<EntityEventRow> = self
            .client
            .query(&sql)
            .bind(entity_type)
            .fetch_all()
            .await?;
        Ok(rows)
    }

    /// Relationship event rows of one relationship type, ordered by
    /// source then destination identity
    pub async fn fetch_relationship_events_of_type(
        &self,
        relationship_type: &str,
    ) -> Result<Vec<rows::EntityEventRow>, ClickhouseError> {
        let sql = format!(
            "SELECT Timestamp, ResourceAttributes, ScopeAttributes, LogAttributes \
             FROM otel_logs \
             WHERE ScopeAttributes['{event_as_log}'] = 'true' \
             AND LogAttributes['{event_type}'] = '{rel_state}' \
             AND LogAttributes['{type_key}'] = ? \
             ORDER BY LogAttributes['{source_id}'], LogAttributes['{dest_id}']",
            event_as_log = keys::ENTITY_EVENT_AS_LOG,
            event_type = keys::ENTITY_EVENT_TYPE,
            rel_state = keys::EVENT_TYPE_RELATIONSHIP_STATE,
            type_key = keys::RELATIONSHIP_TYPE,
            source_id = keys::RELATIONSHIP_SOURCE_ID,
            dest_id = keys::RELATIONSHIP_DEST_ID,
        );
        let rows: Vec<EntityEventRow> = self
            .client
            .query(&sql)
            .bind(relationship_type)
            .fetch_all()
            .await?;
        Ok(rows)
    }
}

fn metric_query(base: &str, filter: Option<&str>) -> String {
    let mut sql = base.to_string();
    if let Some(clause) = filter {
        sql.push_str(" WHERE ");
        sql.push_str(clause);
    }
    sql.push_str(" ORDER BY TimeUnix DESC");
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_query_without_filter() {
        let sql = metric_query("SELECT 1 FROM t", None);
        assert_eq!(sql, "SELECT 1 FROM t ORDER BY TimeUnix DESC");
    }

    #[test]
    fn test_metric_query_with_filter() {
        let sql = metric_query("SELECT 1 FROM t", Some("MetricName = 'm'"));
        assert_eq!(
            sql,
            "SELECT 1 FROM t WHERE MetricName = 'm' ORDER BY TimeUnix DESC"
        );
    }
}
