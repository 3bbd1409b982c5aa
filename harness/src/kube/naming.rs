//! Kubernetes workload naming rules
//!
//! Deployment-managed pods and ReplicaSets carry runtime-generated name
//! hashes that change on every rollout, so fixture generation must filter
//! them out to stay deterministic.

use std::collections::BTreeMap;

/// Workload name keys in priority order
pub const WORKLOAD_NAME_KEYS: &[&str] = &[
    "k8s.deployment.name",
    "k8s.statefulset.name",
    "k8s.daemonset.name",
    "k8s.service.name",
    "k8s.pod.name",
    "k8s.replicaset.name",
    "k8s.job.name",
];

const POD_HASH_LENGTH: usize = 5;
const REPLICASET_HASH_MIN_LENGTH: usize = 8;
const REPLICASET_HASH_MAX_LENGTH: usize = 10;

/// First workload name found in an entity identity map
pub fn workload_name(entity_id: &BTreeMap<String, String>) -> Option<&str> {
    WORKLOAD_NAME_KEYS
        .iter()
        .find_map(|key| entity_id.get(*key))
        .map(String::as_str)
}

/// Pod names of the form `<base>-<8..10 alnum>-<5 alnum>` are managed by
/// a Deployment/ReplicaSet (or CronJob) and carry rollout hashes.
pub fn has_pod_hash_suffix(pod_name: &str) -> bool {
    let parts: Vec<&str> = pod_name.split('-').collect();
    if parts.len() < 3 {
        return false;
    }
    let last = parts[parts.len() - 1];
    let second_last = parts[parts.len() - 2];

    if last.len() != POD_HASH_LENGTH || !is_alnum(last) {
        return false;
    }
    (REPLICASET_HASH_MIN_LENGTH..=REPLICASET_HASH_MAX_LENGTH).contains(&second_last.len())
        && is_alnum(second_last)
}

/// ReplicaSet names of the form `<base>-<8..10 alnum>` are created by a
/// Deployment and change whenever the pod template changes.
pub fn has_replicaset_hash_suffix(replicaset_name: &str) -> bool {
    let parts: Vec<&str> = replicaset_name.split('-').collect();
    if parts.len() < 2 {
        return false;
    }
    let last = parts[parts.len() - 1];
    (REPLICASET_HASH_MIN_LENGTH..=REPLICASET_HASH_MAX_LENGTH).contains(&last.len())
        && is_alnum(last)
}

/// Whether an entity's name carries a runtime-generated rollout hash
pub fn has_runtime_generated_hash(
    entity_id: &BTreeMap<String, String>,
    entity_type: &str,
) -> bool {
    match entity_type {
        "KubernetesPod" | "KubernetesContainer" => entity_id
            .get("k8s.pod.name")
            .map(|name| has_pod_hash_suffix(name))
            .unwrap_or(false),
        "KubernetesReplicaSet" => entity_id
            .get("k8s.replicaset.name")
            .map(|name| has_replicaset_hash_suffix(name))
            .unwrap_or(false),
        _ => false,
    }
}

/// `k8s.<workloadtype>.name` filter key for Kubernetes entity types
pub fn entity_filter_key(entity_type: &str) -> Option<String> {
    let workload_type = entity_type.strip_prefix("Kubernetes")?;
    if workload_type.is_empty() {
        return None;
    }
    Some(format!("k8s.{}.name", workload_type.to_lowercase()))
}

/// CamelCase to snake_case (fixture file naming)
pub fn to_snake_case(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 4);
    let chars: Vec<char> = name.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower_or_digit = i > 0
                && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).map(|n| n.is_lowercase()).unwrap_or(false);
            if i > 0 && (prev_lower_or_digit || next_lower) {
                result.push('_');
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(*c);
        }
    }
    result
}

fn is_alnum(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(items: &[(&str, &str)]) -> BTreeMap<String, String> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_pod_hash_suffix_deployment_managed() {
        assert!(has_pod_hash_suffix("test-deployment-5c9f6b7d8-x2k4p"));
        assert!(has_pod_hash_suffix("nginx-7d64f4b5bc-abcde"));
    }

    #[test]
    fn test_pod_hash_suffix_static_pods() {
        assert!(!has_pod_hash_suffix("test-pod"));
        assert!(!has_pod_hash_suffix("dummy-logging-pod"));
        // DaemonSet pods have only the 5-char suffix
        assert!(!has_pod_hash_suffix("node-agent-x2k4p"));
    }

    #[test]
    fn test_pod_hash_suffix_wrong_lengths() {
        // Second-to-last segment too short (7 chars)
        assert!(!has_pod_hash_suffix("app-1234567-abcde"));
        // Last segment not 5 chars
        assert!(!has_pod_hash_suffix("app-12345678-abcd"));
    }

    #[test]
    fn test_replicaset_hash_suffix() {
        assert!(has_replicaset_hash_suffix("test-deployment-5c9f6b7d8"));
        assert!(!has_replicaset_hash_suffix("test-replicaset"));
        assert!(!has_replicaset_hash_suffix("short-abc"));
    }

    #[test]
    fn test_runtime_hash_by_entity_type() {
        let hashed_pod = id(&[("k8s.pod.name", "web-5c9f6b7d8-x2k4p")]);
        assert!(has_runtime_generated_hash(&hashed_pod, "KubernetesPod"));
        assert!(has_runtime_generated_hash(&hashed_pod, "KubernetesContainer"));
        // The pod rule does not apply to other entity types
        assert!(!has_runtime_generated_hash(&hashed_pod, "KubernetesDeployment"));

        let hashed_rs = id(&[("k8s.replicaset.name", "web-5c9f6b7d8")]);
        assert!(has_runtime_generated_hash(&hashed_rs, "KubernetesReplicaSet"));

        let static_pod = id(&[("k8s.pod.name", "test-pod")]);
        assert!(!has_runtime_generated_hash(&static_pod, "KubernetesPod"));
    }

    #[test]
    fn test_workload_name_priority() {
        let entity = id(&[
            ("k8s.pod.name", "the-pod"),
            ("k8s.deployment.name", "the-deployment"),
        ]);
        assert_eq!(workload_name(&entity), Some("the-deployment"));
        assert_eq!(workload_name(&id(&[])), None);
    }

    #[test]
    fn test_entity_filter_key() {
        assert_eq!(
            entity_filter_key("KubernetesDeployment").as_deref(),
            Some("k8s.deployment.name")
        );
        assert_eq!(
            entity_filter_key("KubernetesStatefulSet").as_deref(),
            Some("k8s.statefulset.name")
        );
        assert_eq!(entity_filter_key("VulnerabilityDetail"), None);
        assert_eq!(entity_filter_key("Kubernetes"), None);
    }

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("KubernetesPod"), "kubernetes_pod");
        assert_eq!(
            to_snake_case("KubernetesReplicaSet"),
            "kubernetes_replica_set"
        );
        assert_eq!(
            to_snake_case("KubernetesServiceRoutesTo"),
            "kubernetes_service_routes_to"
        );
        assert_eq!(to_snake_case("VulnerabilityDetail"), "vulnerability_detail");
    }
}
