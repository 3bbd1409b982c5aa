//! OTLP-shaped JSON model
//!
//! The collector under test exports telemetry as OTLP JSON payloads
//! (one export request per line on the mock feeds, one synthesized
//! document per backend row elsewhere). This module makes those payloads
//! comparable:
//!
//! - `merge`: fold repeated/out-of-order payload lines into one document
//! - `normalize`: attribute sorting and duplicate-key sanitization
//! - `attrs`: accessors over the `{"attributes": [{key, value}]}` shape
//!
//! Everything here is pure and operates on `serde_json::Value`; the data
//! backends produce the same shape so suites share one assertion surface.

pub mod attrs;
mod merge;
pub mod normalize;

#[cfg(test)]
mod merge_tests;

pub use merge::{MergeError, merge_into, merge_payload_lines};
pub use normalize::{canonical_json, canonical_pretty, normalize};

/// Attribute keys of the collector's telemetry conventions
pub mod keys {
    // Entity state events
    pub const ENTITY_EVENT_AS_LOG: &str = "otel.entity.event_as_log";
    pub const ENTITY_EVENT_TYPE: &str = "otel.entity.event.type";
    pub const ENTITY_TYPE: &str = "otel.entity.type";
    pub const ENTITY_ID: &str = "otel.entity.id";
    pub const ENTITY_ATTRIBUTES: &str = "otel.entity.attributes";

    // Entity relationship events
    pub const RELATIONSHIP_TYPE: &str = "otel.entity_relationship.type";
    pub const RELATIONSHIP_SOURCE_TYPE: &str = "otel.entity_relationship.source_entity.type";
    pub const RELATIONSHIP_SOURCE_ID: &str = "otel.entity_relationship.source_entity.id";
    pub const RELATIONSHIP_DEST_TYPE: &str = "otel.entity_relationship.destination_entity.type";
    pub const RELATIONSHIP_DEST_ID: &str = "otel.entity_relationship.destination_entity.id";
    pub const RELATIONSHIP_ATTRIBUTES: &str = "otel.entity_relationship.attributes";

    // Entity event type values
    pub const EVENT_TYPE_ENTITY_STATE: &str = "entity_state";
    pub const EVENT_TYPE_RELATIONSHIP_STATE: &str = "entity_relationship_state";

    // Kubernetes resource identity
    pub const K8S_NAMESPACE_NAME: &str = "k8s.namespace.name";
    pub const K8S_POD_NAME: &str = "k8s.pod.name";
    pub const K8S_CONTAINER_NAME: &str = "k8s.container.name";
    pub const K8S_REPLICASET_NAME: &str = "k8s.replicaset.name";

    // Collector-specific conventions
    pub const CLUSTER_UID: &str = "sw.k8s.cluster.uid";
    pub const CONTAINER_STATUS: &str = "sw.k8s.container.status";
}
