//! Row-to-OTLP conversion
//!
//! Suites assert over OTLP-shaped JSON regardless of which backend served
//! the data, so ClickHouse rows are rebuilt into the same `resourceLogs` /
//! `resourceMetrics` shape the mock feed carries.

use serde_json::{Value, json};

use super::rows::{EntityEventRow, GaugeRow, HistogramRow, LogRow, SumRow};
use crate::otlp::canonical_json;
use crate::utils::time::{nanos_to_otlp_string, offset_to_unix_nanos};

/// Attribute keys whose map values hold serialized entity identities.
/// Their JSON payloads are restored to `kvlistValue` attributes.
const KVLIST_KEYS: &[&str] = &[
    "otel.entity.id",
    "otel.entity_relationship.source_entity.id",
    "otel.entity_relationship.destination_entity.id",
    "otel.entity.attributes",
];

fn is_kvlist_key(key: &str) -> bool {
    key.ends_with(".id") || KVLIST_KEYS.contains(&key)
}

/// Convert a ClickHouse attribute map to an OTLP attribute array.
///
/// Entity identity values that parse as JSON objects become
/// `kvlistValue` entries (objects as string pairs, arrays taken as
/// already being `{key, value}` lists); everything else is `stringValue`.
pub fn map_to_attributes(map: &[(String, String)]) -> Value {
    let mut attributes = Vec::with_capacity(map.len());
    for (key, value) in map {
        if is_kvlist_key(key) {
            if let Ok(parsed) = serde_json::from_str::<Value>(value) {
                match parsed {
                    Value::Object(pairs) => {
                        let values: Vec<Value> = pairs
                            .iter()
                            .map(|(k, v)| {
                                let rendered = match v {
                                    Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                };
                                json!({"key": k, "value": {"stringValue": rendered}})
                            })
                            .collect();
                        attributes.push(json!({
                            "key": key,
                            "value": {"kvlistValue": {"values": values}}
                        }));
                        continue;
                    }
                    Value::Array(values) => {
                        attributes.push(json!({
                            "key": key,
                            "value": {"kvlistValue": {"values": values}}
                        }));
                        continue;
                    }
                    _ => {}
                }
            }
        }
        attributes.push(json!({"key": key, "value": {"stringValue": value}}));
    }
    Value::Array(attributes)
}

/// Entity event row as a single-resource `resourceLogs` payload
pub fn entity_event_to_otlp(row: &EntityEventRow) -> Value {
    json!({
        "resourceLogs": [{
            "resource": {"attributes": map_to_attributes(&row.resource_attributes)},
            "scopeLogs": [{
                "scope": {"attributes": map_to_attributes(&row.scope_attributes)},
                "logRecords": [{
                    "timeUnixNano": nanos_to_otlp_string(offset_to_unix_nanos(row.timestamp)),
                    "attributes": map_to_attributes(&row.log_attributes),
                }]
            }]
        }]
    })
}

/// Log row as a single-resource `resourceLogs` payload
pub fn log_to_otlp(row: &LogRow) -> Value {
    json!({
        "resourceLogs": [{
            "resource": {"attributes": map_to_attributes(&row.resource_attributes)},
            "scopeLogs": [{
                "scope": {"attributes": map_to_attributes(&row.scope_attributes)},
                "logRecords": [{
                    "timeUnixNano": nanos_to_otlp_string(offset_to_unix_nanos(row.timestamp)),
                    "attributes": map_to_attributes(&row.log_attributes),
                    "body": {"stringValue": row.body},
                    "severityText": row.severity_text,
                    "severityNumber": row.severity_number,
                }]
            }]
        }]
    })
}

/// One converted metric with its grouping context
pub struct MetricEntry {
    pub resource_attrs: Value,
    pub scope_attrs: Value,
    pub metric: Value,
}

pub fn gauge_to_entry(row: &GaugeRow) -> MetricEntry {
    MetricEntry {
        resource_attrs: map_to_attributes(&row.resource_attributes),
        scope_attrs: map_to_attributes(&row.scope_attributes),
        metric: json!({
            "name": row.metric_name,
            "gauge": {"dataPoints": [number_datapoint(row.time_unix, &row.attributes, row.value)]},
        }),
    }
}

pub fn sum_to_entry(row: &SumRow) -> MetricEntry {
    MetricEntry {
        resource_attrs: map_to_attributes(&row.resource_attributes),
        scope_attrs: map_to_attributes(&row.scope_attributes),
        metric: json!({
            "name": row.metric_name,
            "sum": {
                "dataPoints": [number_datapoint(row.time_unix, &row.attributes, row.value)],
                "isMonotonic": row.is_monotonic,
                "aggregationTemporality": row.aggregation_temporality,
            },
        }),
    }
}

pub fn histogram_to_entry(row: &HistogramRow) -> MetricEntry {
    MetricEntry {
        resource_attrs: map_to_attributes(&row.resource_attributes),
        scope_attrs: map_to_attributes(&row.scope_attributes),
        metric: json!({
            "name": row.metric_name,
            "histogram": {
                "dataPoints": [{
                    "timeUnixNano": nanos_to_otlp_string(offset_to_unix_nanos(row.time_unix)),
                    "attributes": map_to_attributes(&row.attributes),
                    "count": row.count,
                    "sum": row.sum,
                    "bucketCounts": row.bucket_counts,
                    "explicitBounds": row.explicit_bounds,
                    "min": row.min,
                    "max": row.max,
                }],
                "aggregationTemporality": row.aggregation_temporality,
            },
        }),
    }
}

fn number_datapoint(
    time_unix: time::OffsetDateTime,
    attributes: &[(String, String)],
    value: f64,
) -> Value {
    json!({
        "timeUnixNano": nanos_to_otlp_string(offset_to_unix_nanos(time_unix)),
        "attributes": map_to_attributes(attributes),
        "asDouble": value,
    })
}

/// Group converted metrics by resource attributes, then scope attributes,
/// into `resourceMetrics` payloads (one per resource, insertion order).
pub fn group_metrics_by_resource(entries: Vec<MetricEntry>) -> Vec<Value> {
    struct ScopeGroup {
        key: String,
        scope_attrs: Value,
        metrics: Vec<Value>,
    }
    struct ResourceGroup {
        key: String,
        resource_attrs: Value,
        scopes: Vec<ScopeGroup>,
    }

    let mut groups: Vec<ResourceGroup> = Vec::new();
    for entry in entries {
        let resource_key = canonical_json(&entry.resource_attrs);
        let scope_key = canonical_json(&entry.scope_attrs);

        let resource_pos = match groups.iter().position(|g| g.key == resource_key) {
            Some(pos) => pos,
            None => {
                groups.push(ResourceGroup {
                    key: resource_key,
                    resource_attrs: entry.resource_attrs.clone(),
                    scopes: Vec::new(),
                });
                groups.len() - 1
            }
        };
        let resource = &mut groups[resource_pos];

        let scope_pos = match resource.scopes.iter().position(|s| s.key == scope_key) {
            Some(pos) => pos,
            None => {
                resource.scopes.push(ScopeGroup {
                    key: scope_key,
                    scope_attrs: entry.scope_attrs.clone(),
                    metrics: Vec::new(),
                });
                resource.scopes.len() - 1
            }
        };
        resource.scopes[scope_pos].metrics.push(entry.metric);
    }

    groups
        .into_iter()
        .map(|group| {
            let scope_metrics: Vec<Value> = group
                .scopes
                .into_iter()
                .map(|scope| {
                    json!({
                        "scope": {"attributes": scope.scope_attrs},
                        "metrics": scope.metrics,
                    })
                })
                .collect();
            json!({
                "resourceMetrics": [{
                    "resource": {"attributes": group.resource_attrs},
                    "scopeMetrics": scope_metrics,
                }]
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_map_to_attributes_plain_strings() {
        let attrs = map_to_attributes(&pairs(&[("k8s.pod.name", "test-pod")]));
        assert_eq!(
            attrs,
            serde_json::json!([
                {"key": "k8s.pod.name", "value": {"stringValue": "test-pod"}}
            ])
        );
    }

    #[test]
    fn test_map_to_attributes_entity_id_becomes_kvlist() {
        let attrs = map_to_attributes(&pairs(&[(
            "otel.entity.id",
            r#"{"k8s.pod.name":"test-pod"}"#,
        )]));
        let kvlist = &attrs[0]["value"]["kvlistValue"]["values"];
        assert_eq!(kvlist[0]["key"], "k8s.pod.name");
        assert_eq!(kvlist[0]["value"]["stringValue"], "test-pod");
    }

    #[test]
    fn test_map_to_attributes_json_array_passthrough() {
        let attrs = map_to_attributes(&pairs(&[(
            "otel.entity.attributes",
            r#"[{"key":"a","value":{"stringValue":"1"}}]"#,
        )]));
        let values = attrs[0]["value"]["kvlistValue"]["values"].as_array().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["key"], "a");
    }

    #[test]
    fn test_map_to_attributes_unparseable_id_stays_string() {
        let attrs = map_to_attributes(&pairs(&[("otel.entity.id", "not-json")]));
        assert_eq!(attrs[0]["value"]["stringValue"], "not-json");
    }

    #[test]
    fn test_map_to_attributes_dotted_id_suffix_is_parsed() {
        let attrs = map_to_attributes(&pairs(&[(
            "otel.entity_relationship.source_entity.id",
            r#"{"k8s.deployment.name":"test-deployment"}"#,
        )]));
        assert!(attrs[0]["value"].get("kvlistValue").is_some());
    }

    #[test]
    fn test_log_to_otlp_shape() {
        let row = LogRow {
            timestamp: datetime!(2024-01-01 00:00:00 UTC),
            resource_attributes: pairs(&[("k8s.pod.name", "p")]),
            scope_attributes: pairs(&[]),
            log_attributes: pairs(&[]),
            body: "hello".to_string(),
            severity_text: "INFO".to_string(),
            severity_number: 9,
        };
        let payload = log_to_otlp(&row);
        let record = &payload["resourceLogs"][0]["scopeLogs"][0]["logRecords"][0];
        assert_eq!(record["body"]["stringValue"], "hello");
        assert_eq!(record["severityNumber"], 9);
        assert_eq!(record["timeUnixNano"], "1704067200000000000");
    }

    #[test]
    fn test_gauge_entry_uses_as_double() {
        let row = GaugeRow {
            time_unix: datetime!(2024-01-01 00:00:00 UTC),
            resource_attributes: pairs(&[]),
            scope_attributes: pairs(&[]),
            metric_name: "k8s.pod.containers".to_string(),
            attributes: pairs(&[("container", "c")]),
            value: 2.0,
        };
        let entry = gauge_to_entry(&row);
        assert_eq!(entry.metric["name"], "k8s.pod.containers");
        assert_eq!(entry.metric["gauge"]["dataPoints"][0]["asDouble"], 2.0);
    }

    #[test]
    fn test_sum_entry_carries_monotonicity() {
        let row = SumRow {
            time_unix: datetime!(2024-01-01 00:00:00 UTC),
            resource_attributes: pairs(&[]),
            scope_attributes: pairs(&[]),
            metric_name: "k8s.container_cpu_usage_seconds_total".to_string(),
            attributes: pairs(&[]),
            value: 10.5,
            is_monotonic: true,
            aggregation_temporality: 2,
        };
        let entry = sum_to_entry(&row);
        assert_eq!(entry.metric["sum"]["isMonotonic"], true);
        assert_eq!(entry.metric["sum"]["aggregationTemporality"], 2);
    }

    #[test]
    fn test_histogram_entry_shape() {
        let row = HistogramRow {
            time_unix: datetime!(2024-01-01 00:00:00 UTC),
            resource_attributes: pairs(&[]),
            scope_attributes: pairs(&[]),
            metric_name: "h".to_string(),
            attributes: pairs(&[]),
            count: 3,
            sum: 6.0,
            bucket_counts: vec![1, 2],
            explicit_bounds: vec![0.5],
            min: 1.0,
            max: 3.0,
            aggregation_temporality: 2,
        };
        let entry = histogram_to_entry(&row);
        let dp = &entry.metric["histogram"]["dataPoints"][0];
        assert_eq!(dp["count"], 3);
        assert_eq!(dp["bucketCounts"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_grouping_by_resource_and_scope() {
        let make = |resource: &str, scope: &str, name: &str| MetricEntry {
            resource_attrs: map_to_attributes(&pairs(&[("k8s.pod.name", resource)])),
            scope_attrs: map_to_attributes(&pairs(&[("scope", scope)])),
            metric: serde_json::json!({"name": name}),
        };
        let grouped = group_metrics_by_resource(vec![
            make("a", "s1", "m1"),
            make("a", "s1", "m2"),
            make("a", "s2", "m3"),
            make("b", "s1", "m4"),
        ]);
        assert_eq!(grouped.len(), 2);
        let first = &grouped[0]["resourceMetrics"][0];
        assert_eq!(first["scopeMetrics"].as_array().unwrap().len(), 2);
        assert_eq!(
            first["scopeMetrics"][0]["metrics"].as_array().unwrap().len(),
            2
        );
    }
}
