//! GitHub REST client for the image bump automation
//!
//! Covers exactly the calls the bot needs: branch reset/create, a
//! git-data commit of edited files, and PR create/update.

use serde_json::{Value, json};
use thiserror::Error;

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "collector-harness";

#[derive(Error, Debug)]
pub enum GithubError {
    #[error("Request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub API error at {url}: {status} {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Unexpected GitHub response at {url}: missing {field}")]
    Shape { url: String, field: &'static str },
}

pub struct GithubClient {
    http: reqwest::Client,
    token: String,
    /// owner/name
    repo: String,
}

impl GithubClient {
    pub fn new(token: &str, repo: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.to_string(),
            repo: repo.to_string(),
        }
    }

    pub fn owner(&self) -> &str {
        self.repo.split('/').next().unwrap_or_default()
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, GithubError> {
        let url = format!("{API_BASE}{path}");
        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(GithubError::Status {
                url,
                status,
                body: text.chars().take(500).collect(),
            });
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
    }

    fn str_field(value: &Value, url: &str, pointer: &str, field: &'static str) -> Result<String, GithubError> {
        value
            .pointer(pointer)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(GithubError::Shape {
                url: url.to_string(),
                field,
            })
    }

    /// Default branch name of the repository
    pub async fn default_branch(&self) -> Result<String, GithubError> {
        let path = format!("/repos/{}", self.repo);
        let value = self.request(reqwest::Method::GET, &path, None).await?;
        Self::str_field(&value, &path, "/default_branch", "default_branch")
    }

    /// Head commit SHA of a branch, or None if the branch does not exist
    pub async fn branch_sha(&self, branch: &str) -> Result<Option<String>, GithubError> {
        let path = format!("/repos/{}/git/ref/heads/{}", self.repo, branch);
        match self.request(reqwest::Method::GET, &path, None).await {
            Ok(value) => Ok(Some(Self::str_field(
                &value,
                &path,
                "/object/sha",
                "object.sha",
            )?)),
            Err(GithubError::Status { status, .. }) if status == reqwest::StatusCode::NOT_FOUND => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Force-reset the branch to `sha`, creating it if needed
    pub async fn create_or_reset_branch(&self, branch: &str, sha: &str) -> Result<(), GithubError> {
        if self.branch_sha(branch).await?.is_some() {
            let path = format!("/repos/{}/git/refs/heads/{}", self.repo, branch);
            self.request(
                reqwest::Method::PATCH,
                &path,
                Some(json!({"sha": sha, "force": true})),
            )
            .await?;
            tracing::info!(branch, "Branch reset");
        } else {
            let path = format!("/repos/{}/git/refs", self.repo);
            self.request(
                reqwest::Method::POST,
                &path,
                Some(json!({"ref": format!("refs/heads/{branch}"), "sha": sha})),
            )
            .await?;
            tracing::info!(branch, "Branch created");
        }
        Ok(())
    }

    /// Tree SHA of a commit
    pub async fn commit_tree_sha(&self, commit_sha: &str) -> Result<String, GithubError> {
        let path = format!("/repos/{}/git/commits/{}", self.repo, commit_sha);
        let value = self.request(reqwest::Method::GET, &path, None).await?;
        Self::str_field(&value, &path, "/tree/sha", "tree.sha")
    }

    /// Create a tree with inline blob contents on top of a base tree
    pub async fn create_tree(
        &self,
        base_tree: &str,
        files: &[(String, String)],
    ) -> Result<String, GithubError> {
        let entries: Vec<Value> = files
            .iter()
            .map(|(path, content)| {
                json!({
                    "path": path,
                    "mode": "100644",
                    "type": "blob",
                    "content": content,
                })
            })
            .collect();
        let path = format!("/repos/{}/git/trees", self.repo);
        let value = self
            .request(
                reqwest::Method::POST,
                &path,
                Some(json!({"base_tree": base_tree, "tree": entries})),
            )
            .await?;
        Self::str_field(&value, &path, "/sha", "sha")
    }

    /// Create a commit and return its SHA
    pub async fn create_commit(
        &self,
        message: &str,
        tree_sha: &str,
        parent_sha: &str,
    ) -> Result<String, GithubError> {
        let path = format!("/repos/{}/git/commits", self.repo);
        let value = self
            .request(
                reqwest::Method::POST,
                &path,
                Some(json!({
                    "message": message,
                    "tree": tree_sha,
                    "parents": [parent_sha],
                })),
            )
            .await?;
        Self::str_field(&value, &path, "/sha", "sha")
    }

    /// Fast-forward/force a branch ref to a commit
    pub async fn update_ref(&self, branch: &str, sha: &str) -> Result<(), GithubError> {
        let path = format!("/repos/{}/git/refs/heads/{}", self.repo, branch);
        self.request(reqwest::Method::PATCH, &path, Some(json!({"sha": sha})))
            .await?;
        Ok(())
    }

    /// Number of the open PR from `head_branch`, if any
    pub async fn find_open_pr(&self, head_branch: &str) -> Result<Option<u64>, GithubError> {
        let path = format!(
            "/repos/{}/pulls?state=open&head={}:{}",
            self.repo,
            self.owner(),
            head_branch
        );
        let value = self.request(reqwest::Method::GET, &path, None).await?;
        Ok(value
            .as_array()
            .and_then(|prs| prs.first())
            .and_then(|pr| pr.get("number"))
            .and_then(Value::as_u64))
    }

    /// Create a PR, returning its HTML URL
    pub async fn create_pr(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<String, GithubError> {
        let path = format!("/repos/{}/pulls", self.repo);
        let value = self
            .request(
                reqwest::Method::POST,
                &path,
                Some(json!({"title": title, "body": body, "head": head, "base": base})),
            )
            .await?;
        Self::str_field(&value, &path, "/html_url", "html_url")
    }

    /// Update an existing PR, returning its HTML URL
    pub async fn update_pr(
        &self,
        number: u64,
        title: &str,
        body: &str,
    ) -> Result<String, GithubError> {
        let path = format!("/repos/{}/pulls/{}", self.repo, number);
        let value = self
            .request(
                reqwest::Method::PATCH,
                &path,
                Some(json!({"title": title, "body": body})),
            )
            .await?;
        Self::str_field(&value, &path, "/html_url", "html_url")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_extraction() {
        let client = GithubClient::new("t", "acme/telemetry-charts");
        assert_eq!(client.owner(), "acme");
    }

    #[test]
    fn test_str_field_missing_is_shape_error() {
        let err = GithubClient::str_field(&json!({}), "/x", "/sha", "sha").unwrap_err();
        assert!(matches!(err, GithubError::Shape { field: "sha", .. }));
    }

    #[test]
    fn test_str_field_nested_pointer() {
        let value = json!({"object": {"sha": "abc123"}});
        let sha = GithubClient::str_field(&value, "/x", "/object/sha", "object.sha").unwrap();
        assert_eq!(sha, "abc123");
    }
}
