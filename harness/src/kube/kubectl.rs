//! kubectl shell-outs for suite setup and teardown
//!
//! Suites create short-lived pods to provoke collector output and delete
//! them afterwards. The cluster context is whatever kubectl is pointed at.

use anyhow::{Context, Result, bail};
use serde_json::json;
use tokio::process::Command;

/// Run kubectl with the given arguments, returning stdout
pub async fn run(args: &[&str]) -> Result<String> {
    tracing::debug!(args = ?args, "Running kubectl");
    let output = Command::new("kubectl")
        .args(args)
        .output()
        .await
        .context("Failed to spawn kubectl")?;

    if !output.status.success() {
        bail!(
            "kubectl {} failed ({}): {}",
            args.first().unwrap_or(&""),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Options for a throwaway test pod
pub struct TestPod<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub image: &'a str,
    /// Label k=v applied via --labels
    pub label: Option<(&'a str, &'a str)>,
    /// Annotation k=v applied via a metadata override
    pub annotation: Option<(&'a str, &'a str)>,
    /// Shell script run under `-ec`
    pub script: &'a str,
}

impl<'a> TestPod<'a> {
    pub fn new(name: &'a str, namespace: &'a str, image: &'a str, script: &'a str) -> Self {
        Self {
            name,
            namespace,
            image,
            label: None,
            annotation: None,
            script,
        }
    }

    pub fn with_label(mut self, key: &'a str, value: &'a str) -> Self {
        self.label = Some((key, value));
        self
    }

    pub fn with_annotation(mut self, key: &'a str, value: &'a str) -> Self {
        self.annotation = Some((key, value));
        self
    }
}

/// Create a test pod running the given shell script in a loop
pub async fn run_pod(pod: &TestPod<'_>) -> Result<()> {
    let label_arg;
    let overrides;

    let mut args: Vec<&str> = vec!["run", pod.name];
    if let Some((key, value)) = pod.label {
        label_arg = format!("{}={}", key, value);
        args.push("--labels");
        args.push(&label_arg);
    }
    if let Some((key, value)) = pod.annotation {
        overrides = json!({
            "apiVersion": "v1",
            "metadata": {"annotations": {(key): value}},
        })
        .to_string();
        args.push("--overrides");
        args.push(&overrides);
    }
    args.extend(["--image", pod.image, "-n", pod.namespace, "--", "-ec", pod.script]);

    run(&args).await.map(|_| ())
}

/// Delete a pod, tolerating it being gone already
pub async fn delete_pod(name: &str, namespace: &str) -> Result<()> {
    match run(&["delete", "pod", name, "-n", namespace, "--ignore-not-found"]).await {
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::warn!(pod = name, error = %e, "Pod cleanup failed");
            Err(e)
        }
    }
}
