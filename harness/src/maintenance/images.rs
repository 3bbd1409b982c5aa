//! Helm image bump automation
//!
//! Walks `values.yaml` for `repository`/`tag` pairs, asks the registries
//! for newer semantic-version tags, rewrites the chart files, and pushes
//! the result as a branch + pull request through the GitHub API.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use semver::Version;
use serde_json::{Value as JsonValue, json};
use serde_yaml::Value as YamlValue;
use thiserror::Error;

use crate::core::config::GithubConfig;
use crate::utils::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, retry_with_backoff};

use super::github::GithubClient;

/// Branch the bot maintains
pub const UPDATE_BRANCH: &str = "update-docker-images";

/// Image whose tag drives the chart's appVersion
const MAIN_COLLECTOR_MARKER: &str = "solarwinds-otel-collector";

const DOCKER_HUB_TAG_LIMIT: usize = 200;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response from {url}: {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

// =============================================================================
// YAML walking
// =============================================================================

/// Path segment into a YAML document
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// An image reference found in values.yaml
#[derive(Debug, Clone)]
pub struct ImageRef {
    /// Dotted display path (e.g. `otel.metrics.image`)
    pub path: String,
    pub repository: String,
    pub tag: String,
    pub segments: Vec<Segment>,
}

/// A performed tag update
#[derive(Debug, Clone, serde::Serialize)]
pub struct ImageUpdate {
    pub path: String,
    pub repository: String,
    pub old_tag: String,
    pub new_tag: String,
}

/// Recursively find every mapping carrying both `repository` and `tag`
pub fn find_images(root: &YamlValue) -> Vec<ImageRef> {
    let mut images = Vec::new();
    walk(root, String::new(), &mut Vec::new(), &mut images);
    images
}

fn walk(
    node: &YamlValue,
    path: String,
    segments: &mut Vec<Segment>,
    images: &mut Vec<ImageRef>,
) {
    match node {
        YamlValue::Mapping(map) => {
            let mut repository = None;
            let mut tag = None;
            for (key, value) in map {
                match key.as_str() {
                    Some("repository") => repository = value.as_str(),
                    Some("tag") => tag = yaml_scalar_str(value),
                    _ => {}
                }
            }
            if let (Some(repository), Some(tag)) = (repository, tag) {
                images.push(ImageRef {
                    path: path.clone(),
                    repository: repository.to_string(),
                    tag,
                    segments: segments.clone(),
                });
                return;
            }
            for (key, value) in map {
                let Some(key) = key.as_str() else { continue };
                let child_path = if path.is_empty() {
                    key.to_string()
                } else {
                    format!("{path}.{key}")
                };
                segments.push(Segment::Key(key.to_string()));
                walk(value, child_path, segments, images);
                segments.pop();
            }
        }
        YamlValue::Sequence(seq) => {
            for (i, value) in seq.iter().enumerate() {
                segments.push(Segment::Index(i));
                walk(value, format!("{path}[{i}]"), segments, images);
                segments.pop();
            }
        }
        _ => {}
    }
}

fn yaml_scalar_str(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Rewrite the `tag` of the mapping addressed by `segments`
pub fn set_tag(root: &mut YamlValue, segments: &[Segment], new_tag: &str) -> bool {
    let mut node = root;
    for segment in segments {
        node = match segment {
            Segment::Key(key) => match node.get_mut(YamlValue::from(key.as_str())) {
                Some(child) => child,
                None => return false,
            },
            Segment::Index(i) => match node.get_mut(*i) {
                Some(child) => child,
                None => return false,
            },
        };
    }
    if let YamlValue::Mapping(map) = node {
        map.insert(YamlValue::from("tag"), YamlValue::from(new_tag));
        true
    } else {
        false
    }
}

/// Placeholder tags (templating markers) are never bumped
pub fn is_placeholder_tag(tag: &str) -> bool {
    tag.is_empty() || tag.starts_with('<') || tag.starts_with("${")
}

// =============================================================================
// Version selection
// =============================================================================

/// Pick the newest semantic-version tag, or None when nothing beats
/// `current`.
pub fn latest_semver_tag(tags: &[String], current: Option<&str>) -> Option<String> {
    let pattern = Regex::new(r"^v?(\d+\.\d+\.\d+(?:-[\w.-]+)?)$").expect("static regex");

    let mut candidates: Vec<(Version, &String)> = tags
        .iter()
        .filter_map(|tag| {
            let captures = pattern.captures(tag)?;
            let version = Version::parse(captures.get(1)?.as_str()).ok()?;
            Some((version, tag))
        })
        .collect();
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    let (latest, tag) = &candidates[0];

    if let Some(current) = current {
        if let Ok(current) = Version::parse(current.trim_start_matches('v')) {
            if *latest <= current {
                return None;
            }
        }
    }
    Some((*tag).clone())
}

/// Patch-level bump with alpha/beta counter support
pub fn bump_version(old: &str) -> String {
    if let Some((base, counter)) = old.split_once("-alpha.") {
        if let Ok(n) = counter.parse::<u64>() {
            return format!("{base}-alpha.{}", n + 1);
        }
    }
    if let Some((base, counter)) = old.split_once("-beta.") {
        if let Ok(n) = counter.parse::<u64>() {
            return format!("{base}-beta.{}", n + 1);
        }
    }
    let parts: Vec<&str> = old.split('.').collect();
    if parts.len() >= 3 {
        let patch = parts[2].split('-').next().unwrap_or_default();
        if let Ok(n) = patch.parse::<u64>() {
            return format!("{}.{}.{}", parts[0], parts[1], n + 1);
        }
    }
    tracing::warn!(version = old, "Could not parse version, leaving unchanged");
    old.to_string()
}

/// Line-wise Chart.yaml rewrite: set appVersion when the main image moved,
/// and bump the chart version.
pub fn bump_chart_content(content: &str, app_version: Option<&str>) -> String {
    let mut result = content.to_string();

    if let Some(app_version) = app_version {
        let re = Regex::new(r"(?m)^appVersion:\s+.*$").expect("static regex");
        result = re
            .replace(&result, format!("appVersion: {app_version}"))
            .into_owned();
    }

    let version_re = Regex::new(r"(?m)^version:\s+(.+)$").expect("static regex");
    let old = version_re
        .captures(&result)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string());
    if let Some(old) = old {
        let new = bump_version(&old);
        if new != old {
            result = version_re
                .replace(&result, format!("version: {new}"))
                .into_owned();
            tracing::info!(from = %old, to = %new, "Chart version bumped");
        }
    }
    result
}

// =============================================================================
// Registry clients
// =============================================================================

pub struct RegistryClient {
    http: reqwest::Client,
    github_token: Option<String>,
}

impl RegistryClient {
    pub fn new(github_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            github_token,
        }
    }

    /// Tags for a repository, dispatched by registry host
    pub async fn tags_for(&self, repository: &str) -> Result<Vec<String>, RegistryError> {
        let clean = repository
            .trim()
            .trim_start_matches("index.docker.io/")
            .trim_start_matches("docker.io/");
        if let Some(ghcr_path) = clean.strip_prefix("ghcr.io/") {
            let tags = self.ghcr_tags(ghcr_path).await?;
            if !tags.is_empty() {
                return Ok(tags);
            }
            // Package API access is often restricted; releases usually mirror tags.
            let mut parts = ghcr_path.splitn(3, '/');
            if let (Some(owner), Some(repo)) = (parts.next(), parts.next()) {
                return self.github_release_tags(owner, repo).await;
            }
            return Ok(Vec::new());
        }
        self.docker_hub_tags(clean).await
    }

    /// Paginated Docker Hub tag listing, bounded by DOCKER_HUB_TAG_LIMIT
    pub async fn docker_hub_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError> {
        let repo_path = if repository.contains('/') {
            repository.to_string()
        } else {
            format!("library/{repository}")
        };

        let mut tags = Vec::new();
        let mut url = format!(
            "https://hub.docker.com/v2/repositories/{repo_path}/tags?page_size=100"
        );
        loop {
            let response = self.http.get(&url).send().await?;
            if !response.status().is_success() {
                return Err(RegistryError::Status {
                    url,
                    status: response.status(),
                });
            }
            let body: JsonValue = response.json().await?;
            for result in body
                .get("results")
                .and_then(JsonValue::as_array)
                .into_iter()
                .flatten()
            {
                if let Some(name) = result.get("name").and_then(JsonValue::as_str) {
                    tags.push(name.to_string());
                }
            }
            match body.get("next").and_then(JsonValue::as_str) {
                Some(next) if tags.len() < DOCKER_HUB_TAG_LIMIT => url = next.to_string(),
                _ => break,
            }
        }
        tags.truncate(DOCKER_HUB_TAG_LIMIT);
        tracing::info!(repository, count = tags.len(), "Docker Hub tags fetched");
        Ok(tags)
    }

    /// Tags from the GitHub container registry package API
    pub async fn ghcr_tags(&self, repo_path: &str) -> Result<Vec<String>, RegistryError> {
        let mut parts = repo_path.splitn(2, '/');
        let (Some(owner), Some(package)) = (parts.next(), parts.next()) else {
            return Ok(Vec::new());
        };
        let package = package.replace('/', "%2F");

        for scope in ["orgs", "users"] {
            let url = format!(
                "https://api.github.com/{scope}/{owner}/packages/container/{package}/versions"
            );
            let mut request = self
                .http
                .get(&url)
                .header("Accept", "application/vnd.github.v3+json")
                .header("User-Agent", "collector-harness");
            if let Some(token) = &self.github_token {
                request = request.bearer_auth(token);
            }
            let Ok(response) = request.send().await else {
                continue;
            };
            if !response.status().is_success() {
                continue;
            }
            let Ok(body) = response.json::<JsonValue>().await else {
                continue;
            };
            let mut tags = Vec::new();
            for version in body.as_array().into_iter().flatten() {
                for tag in version
                    .pointer("/metadata/container/tags")
                    .and_then(JsonValue::as_array)
                    .into_iter()
                    .flatten()
                {
                    if let Some(tag) = tag.as_str() {
                        tags.push(tag.to_string());
                    }
                }
            }
            if !tags.is_empty() {
                return Ok(tags);
            }
        }
        Ok(Vec::new())
    }

    /// Release tag names as a GHCR fallback
    pub async fn github_release_tags(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<String>, RegistryError> {
        let url = format!("https://api.github.com/repos/{owner}/{repo}/releases?per_page=50");
        let mut request = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", "collector-harness");
        if let Some(token) = &self.github_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::Status {
                url,
                status: response.status(),
            });
        }
        let body: JsonValue = response.json().await?;
        Ok(body
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|release| release.get("tag_name").and_then(JsonValue::as_str))
            .map(str::to_string)
            .collect())
    }
}

// =============================================================================
// Updater
// =============================================================================

pub struct ImageUpdater {
    registry: RegistryClient,
    values_file: PathBuf,
    chart_file: PathBuf,
}

impl ImageUpdater {
    pub fn new(
        github_token: Option<String>,
        values_file: PathBuf,
        chart_file: PathBuf,
    ) -> Self {
        Self {
            registry: RegistryClient::new(github_token),
            values_file,
            chart_file,
        }
    }

    /// Rewrite values.yaml in place and return the performed updates
    pub async fn update_values(&self) -> Result<Vec<ImageUpdate>> {
        let content = std::fs::read_to_string(&self.values_file)
            .with_context(|| format!("Failed to read {}", self.values_file.display()))?;
        let mut root: YamlValue =
            serde_yaml::from_str(&content).context("Failed to parse values.yaml")?;

        let mut updates = Vec::new();
        for image in find_images(&root) {
            if is_placeholder_tag(&image.tag) {
                tracing::debug!(
                    repository = %image.repository,
                    tag = %image.tag,
                    "Skipping placeholder tag"
                );
                continue;
            }
            tracing::info!(repository = %image.repository, tag = %image.tag, "Checking image");

            let tags = match retry_with_backoff(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY_MS, || {
                self.registry.tags_for(&image.repository)
            })
            .await
            {
                Ok(tags) => tags,
                Err((e, attempts)) => {
                    tracing::error!(
                        repository = %image.repository,
                        attempts,
                        error = %e,
                        "Tag listing failed, skipping image"
                    );
                    continue;
                }
            };

            let Some(new_tag) = latest_semver_tag(&tags, Some(&image.tag)) else {
                continue;
            };
            if new_tag == image.tag {
                continue;
            }
            if set_tag(&mut root, &image.segments, &new_tag) {
                tracing::info!(
                    repository = %image.repository,
                    from = %image.tag,
                    to = %new_tag,
                    "Image updated"
                );
                updates.push(ImageUpdate {
                    path: image.path,
                    repository: image.repository,
                    old_tag: image.tag,
                    new_tag,
                });
            }
        }

        if !updates.is_empty() {
            let rendered =
                serde_yaml::to_string(&root).context("Failed to serialize values.yaml")?;
            std::fs::write(&self.values_file, rendered)
                .with_context(|| format!("Failed to write {}", self.values_file.display()))?;
        }
        Ok(updates)
    }

    /// Bump Chart.yaml (appVersion from the main collector image, chart
    /// version patch-wise)
    pub fn bump_chart(&self, updates: &[ImageUpdate]) -> Result<()> {
        if updates.is_empty() || !self.chart_file.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(&self.chart_file)
            .with_context(|| format!("Failed to read {}", self.chart_file.display()))?;

        let app_version = updates
            .iter()
            .find(|u| u.repository.contains(MAIN_COLLECTOR_MARKER))
            .map(|u| u.new_tag.trim_start_matches('v').to_string());

        let rewritten = bump_chart_content(&content, app_version.as_deref());
        if rewritten != content {
            std::fs::write(&self.chart_file, rewritten)
                .with_context(|| format!("Failed to write {}", self.chart_file.display()))?;
        }
        Ok(())
    }

    /// Commit the edited chart files to the update branch and open or
    /// refresh the pull request
    pub async fn publish(&self, github: &GithubConfig, updates: &[ImageUpdate]) -> Result<String> {
        let client = GithubClient::new(&github.token, &github.repository);

        let default_branch = client.default_branch().await?;
        let base_sha = client
            .branch_sha(&default_branch)
            .await?
            .context("Default branch has no head commit")?;
        client.create_or_reset_branch(UPDATE_BRANCH, &base_sha).await?;

        let mut message = String::from("chore: update docker image versions\n\n");
        for update in updates {
            message.push_str(&format!(
                "- {}: {} -> {}\n",
                update.repository, update.old_tag, update.new_tag
            ));
        }

        let files = [
            (&self.values_file, repo_relative(&self.values_file)),
            (&self.chart_file, repo_relative(&self.chart_file)),
        ]
        .into_iter()
        .filter(|(path, _)| path.exists())
        .map(|(path, repo_path)| {
            std::fs::read_to_string(path)
                .map(|content| (repo_path, content))
                .with_context(|| format!("Failed to read {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

        let base_tree = client.commit_tree_sha(&base_sha).await?;
        let tree = client.create_tree(&base_tree, &files).await?;
        let commit = client.create_commit(&message, &tree, &base_sha).await?;
        client.update_ref(UPDATE_BRANCH, &commit).await?;
        tracing::info!(branch = UPDATE_BRANCH, commit = %commit, "Changes committed");

        let title = "update docker image versions";
        let mut body = String::from("## Updated Images\n\n");
        for update in updates {
            body.push_str(&format!(
                "- **{}**: `{}` -> `{}`\n",
                update.repository, update.old_tag, update.new_tag
            ));
        }

        let url = match client.find_open_pr(UPDATE_BRANCH).await? {
            Some(number) => client.update_pr(number, title, &body).await?,
            None => {
                client
                    .create_pr(title, &body, UPDATE_BRANCH, &default_branch)
                    .await?
            }
        };
        Ok(url)
    }

    /// Changes log for debugging, next to the values file
    pub fn save_changes_log(&self, updates: &[ImageUpdate]) -> Result<PathBuf> {
        let repositories: std::collections::BTreeSet<&str> =
            updates.iter().map(|u| u.repository.as_str()).collect();
        let log = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "updates": updates,
            "summary": {
                "total_updates": updates.len(),
                "repositories_updated": repositories.len(),
            },
        });
        let file = PathBuf::from(format!(
            "changes_{}.json",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));
        std::fs::write(&file, serde_json::to_string_pretty(&log)?)
            .with_context(|| format!("Failed to write {}", file.display()))?;
        tracing::info!(file = %file.display(), "Changes log saved");
        Ok(file)
    }
}

fn repo_relative(path: &Path) -> String {
    path.to_string_lossy().trim_start_matches("./").to_string()
}

/// Tool entry: rewrite the chart files, then publish unless dry-run
pub async fn run(
    github: Option<GithubConfig>,
    values_file: PathBuf,
    chart_file: PathBuf,
    dry_run: bool,
) -> Result<()> {
    let updater = ImageUpdater::new(
        github.as_ref().map(|g| g.token.clone()),
        values_file,
        chart_file,
    );

    let updates = updater.update_values().await?;
    if updates.is_empty() {
        tracing::info!("No image updates found");
        return Ok(());
    }
    tracing::info!(count = updates.len(), "Image updates found");

    updater.bump_chart(&updates)?;
    updater.save_changes_log(&updates)?;

    if dry_run {
        tracing::info!("Dry run, not publishing to GitHub");
        return Ok(());
    }
    let github = github.context("GitHub access is required unless --dry-run is set")?;
    let url = updater.publish(&github, &updates).await?;
    tracing::info!(url, "Pull request available");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALUES: &str = r#"
otel:
  metrics:
    image:
      repository: acme/collector
      tag: "1.2.3"
  logs:
    image:
      repository: ghcr.io/acme/logs-agent
      tag: v0.9.0
ebpfNetworkMonitoring:
  image:
    repository: acme/network-agent
    tag: "<VERSION>"
sidecars:
  - image:
      repository: busybox
      tag: "1.36.0"
"#;

    #[test]
    fn test_find_images_walks_maps_and_sequences() {
        let root: YamlValue = serde_yaml::from_str(VALUES).unwrap();
        let images = find_images(&root);
        let repos: Vec<&str> = images.iter().map(|i| i.repository.as_str()).collect();
        assert_eq!(
            repos,
            vec![
                "acme/collector",
                "ghcr.io/acme/logs-agent",
                "acme/network-agent",
                "busybox"
            ]
        );
        assert_eq!(images[0].path, "otel.metrics.image");
        assert_eq!(images[3].path, "sidecars[0].image");
    }

    #[test]
    fn test_set_tag_by_segments() {
        let mut root: YamlValue = serde_yaml::from_str(VALUES).unwrap();
        let images = find_images(&root);
        assert!(set_tag(&mut root, &images[0].segments, "1.3.0"));
        let updated = find_images(&root);
        assert_eq!(updated[0].tag, "1.3.0");
        // Other entries untouched
        assert_eq!(updated[3].tag, "1.36.0");
    }

    #[test]
    fn test_placeholder_tags_detected() {
        assert!(is_placeholder_tag("<VERSION>"));
        assert!(is_placeholder_tag("${TAG}"));
        assert!(is_placeholder_tag(""));
        assert!(!is_placeholder_tag("1.2.3"));
    }

    #[test]
    fn test_latest_semver_tag_picks_newest() {
        let tags: Vec<String> = ["1.2.3", "latest", "1.10.0", "v1.9.9", "garbage"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(latest_semver_tag(&tags, None).as_deref(), Some("1.10.0"));
    }

    #[test]
    fn test_latest_semver_tag_respects_current() {
        let tags: Vec<String> = ["1.2.3", "1.2.4"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            latest_semver_tag(&tags, Some("1.2.3")).as_deref(),
            Some("1.2.4")
        );
        assert_eq!(latest_semver_tag(&tags, Some("1.2.4")), None);
        assert_eq!(latest_semver_tag(&tags, Some("v1.2.4")), None);
    }

    #[test]
    fn test_latest_semver_tag_keeps_v_prefix() {
        let tags: Vec<String> = ["v0.9.0", "v0.10.0"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            latest_semver_tag(&tags, Some("v0.9.0")).as_deref(),
            Some("v0.10.0")
        );
    }

    #[test]
    fn test_bump_version_patch() {
        assert_eq!(bump_version("1.2.3"), "1.2.4");
        assert_eq!(bump_version("4.0.0"), "4.0.1");
    }

    #[test]
    fn test_bump_version_prerelease_counters() {
        assert_eq!(bump_version("4.4.0-alpha.3"), "4.4.0-alpha.4");
        assert_eq!(bump_version("2.0.0-beta.1"), "2.0.0-beta.2");
    }

    #[test]
    fn test_bump_version_unparseable_unchanged() {
        assert_eq!(bump_version("not-a-version"), "not-a-version");
    }

    #[test]
    fn test_bump_chart_content() {
        let chart = "apiVersion: v2\nname: collector\nversion: 4.4.1\nappVersion: 1.2.3\n";
        let result = bump_chart_content(chart, Some("1.3.0"));
        assert!(result.contains("version: 4.4.2"));
        assert!(result.contains("appVersion: 1.3.0"));
        assert!(result.contains("name: collector"));
    }

    #[test]
    fn test_bump_chart_content_without_app_version() {
        let chart = "version: 1.0.0\nappVersion: 9.9.9\n";
        let result = bump_chart_content(chart, None);
        assert!(result.contains("version: 1.0.1"));
        assert!(result.contains("appVersion: 9.9.9"));
    }
}
