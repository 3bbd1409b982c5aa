//! Data access to the telemetry backends of the test cluster

pub mod clickhouse;
pub mod loki;
pub mod mock;

pub use clickhouse::{ClickhouseError, TelemetryStore};
pub use loki::{LokiClient, LokiError};
pub use mock::{Feed, MockEndpoint, MockEndpointError};
