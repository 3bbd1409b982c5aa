use serde_json::json;

use super::merge::{MergeError, merge_payload_lines};

fn metrics_line(resource_attr: &str, metric: &str, datapoint_time: &str) -> String {
    json!({
        "resourceMetrics": [{
            "resource": {"attributes": [
                {"key": "k8s.pod.name", "value": {"stringValue": resource_attr}},
            ]},
            "scopeMetrics": [{
                "scope": {},
                "metrics": [{
                    "name": metric,
                    "gauge": {"dataPoints": [
                        {"timeUnixNano": datapoint_time, "asDouble": 1.0, "attributes": []},
                    ]}
                }]
            }]
        }]
    })
    .to_string()
}

#[test]
fn test_empty_content_merges_to_empty_object() {
    let merged = merge_payload_lines("").unwrap();
    assert_eq!(merged, json!({}));
}

#[test]
fn test_blank_lines_are_skipped() {
    let content = format!("\n{}\n\n", metrics_line("pod-a", "m1", "1"));
    let merged = merge_payload_lines(&content).unwrap();
    assert_eq!(merged["resourceMetrics"].as_array().unwrap().len(), 1);
}

#[test]
fn test_malformed_line_reports_line_number() {
    let content = format!("{}\nnot-json", metrics_line("pod-a", "m1", "1"));
    match merge_payload_lines(&content) {
        Err(MergeError::Parse { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected parse error, got {:?}", other),
    }
}

#[test]
fn test_distinct_resources_stay_separate() {
    let content = format!(
        "{}\n{}",
        metrics_line("pod-a", "m1", "1"),
        metrics_line("pod-b", "m1", "1")
    );
    let merged = merge_payload_lines(&content).unwrap();
    assert_eq!(merged["resourceMetrics"].as_array().unwrap().len(), 2);
}

#[test]
fn test_same_resource_merges_metrics_by_name() {
    let content = format!(
        "{}\n{}",
        metrics_line("pod-a", "m1", "1"),
        metrics_line("pod-a", "m2", "1")
    );
    let merged = merge_payload_lines(&content).unwrap();
    let resources = merged["resourceMetrics"].as_array().unwrap();
    assert_eq!(resources.len(), 1);
    let metrics = resources[0]["scopeMetrics"][0]["metrics"].as_array().unwrap();
    let names: Vec<&str> = metrics.iter().map(|m| m["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["m1", "m2"]);
}

#[test]
fn test_same_metric_accumulates_distinct_datapoints() {
    let content = format!(
        "{}\n{}",
        metrics_line("pod-a", "m1", "1"),
        metrics_line("pod-a", "m1", "2")
    );
    let merged = merge_payload_lines(&content).unwrap();
    let datapoints = merged["resourceMetrics"][0]["scopeMetrics"][0]["metrics"][0]["gauge"]
        ["dataPoints"]
        .as_array()
        .unwrap();
    assert_eq!(datapoints.len(), 2);
}

#[test]
fn test_merge_is_idempotent_across_retries() {
    // The same export re-sent on retry must merge to the same document
    // as if it had been sent once.
    let line = metrics_line("pod-a", "m1", "1");
    let once = merge_payload_lines(&line).unwrap();
    let twice = merge_payload_lines(&format!("{line}\n{line}")).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn test_resource_identity_ignores_attribute_order() {
    let a = json!({
        "resourceMetrics": [{
            "resource": {"attributes": [
                {"key": "x", "value": {"stringValue": "1"}},
                {"key": "y", "value": {"stringValue": "2"}},
            ]},
            "scopeMetrics": []
        }]
    })
    .to_string();
    let b = json!({
        "resourceMetrics": [{
            "resource": {"attributes": [
                {"key": "y", "value": {"stringValue": "2"}},
                {"key": "x", "value": {"stringValue": "1"}},
            ]},
            "scopeMetrics": []
        }]
    })
    .to_string();
    let merged = merge_payload_lines(&format!("{a}\n{b}")).unwrap();
    assert_eq!(merged["resourceMetrics"].as_array().unwrap().len(), 1);
}

#[test]
fn test_disjoint_top_level_keys_are_kept() {
    let logs = json!({"resourceLogs": []}).to_string();
    let metrics = json!({"resourceMetrics": []}).to_string();
    let merged = merge_payload_lines(&format!("{logs}\n{metrics}")).unwrap();
    assert!(merged.get("resourceLogs").is_some());
    assert!(merged.get("resourceMetrics").is_some());
}

#[test]
fn test_log_records_deduplicate_but_accumulate() {
    let line = |body: &str| {
        json!({
            "resourceLogs": [{
                "resource": {"attributes": []},
                "scopeLogs": [{
                    "scope": {},
                    "logRecords": [
                        {"timeUnixNano": "1", "body": {"stringValue": body}},
                    ]
                }]
            }]
        })
        .to_string()
    };
    let content = format!("{}\n{}\n{}", line("one"), line("one"), line("two"));
    let merged = merge_payload_lines(&content).unwrap();
    let records = merged["resourceLogs"][0]["scopeLogs"][0]["logRecords"]
        .as_array()
        .unwrap();
    assert_eq!(records.len(), 2);
}

#[test]
fn test_distinct_schema_urls_split_resources() {
    let with_schema = json!({
        "resourceMetrics": [{
            "schemaUrl": "https://opentelemetry.io/schemas/1.21.0",
            "resource": {"attributes": []},
            "scopeMetrics": []
        }]
    })
    .to_string();
    let without_schema = json!({
        "resourceMetrics": [{
            "resource": {"attributes": []},
            "scopeMetrics": []
        }]
    })
    .to_string();
    let merged = merge_payload_lines(&format!("{with_schema}\n{without_schema}")).unwrap();
    assert_eq!(merged["resourceMetrics"].as_array().unwrap().len(), 2);
}
