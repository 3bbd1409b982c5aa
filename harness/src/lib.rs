//! Integration verification harness for the Kubernetes telemetry collector.
//!
//! The harness queries the telemetry backends a test cluster writes to
//! (a mock HTTP endpoint, ClickHouse, or Loki), normalizes the results
//! into OTLP-shaped JSON, and compares them against fixture files to
//! validate the collector's behavior under real cluster conditions.
//! It also carries the CI maintenance tooling for the Helm chart
//! (image bumping, mock fixture generation).

pub mod app;
pub mod core;
pub mod data;
pub mod fixtures;
pub mod kube;
pub mod maintenance;
pub mod otlp;
pub mod suites;
pub mod utils;
