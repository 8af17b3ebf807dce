use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};

use crate::store::CommitRecord;

use super::{CodeHostAdapter, FileChange, PullRequestInfo, RepoMetadata};

const API_BASE: &str = "https://api.github.com";

pub struct LiveCodeHostAdapter {
    http: reqwest::Client,
    token: String,
}

impl LiveCodeHostAdapter {
    pub fn new(token: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("cortex-diagnostics")
            .build()
            .expect("reqwest client configuration is valid");
        Self { http, token }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header("Accept", "application/vnd.github.v3+json");
        if self.token.is_empty() {
            builder
        } else {
            builder.header("Authorization", format!("token {}", self.token))
        }
    }

    async fn get(&self, url: &str) -> Option<Value> {
        let resp = match self.auth(self.http.get(url)).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("code host GET error: {e}");
                return None;
            }
        };
        if resp.status().as_u16() == 404 {
            return None;
        }
        if !resp.status().is_success() {
            tracing::error!("code host GET {url} returned {}", resp.status());
            return None;
        }
        resp.json::<Value>().await.ok()
    }

    async fn post(&self, url: &str, body: Value) -> Option<Value> {
        let resp = match self.auth(self.http.post(url)).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("code host POST error: {e}");
                return None;
            }
        };
        if !resp.status().is_success() {
            tracing::error!("code host POST {url} returned {}", resp.status());
            return None;
        }
        resp.json::<Value>().await.ok()
    }

    async fn put(&self, url: &str, body: Value) -> Option<Value> {
        let resp = match self.auth(self.http.put(url)).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("code host PUT error: {e}");
                return None;
            }
        };
        let status = resp.status();
        if status.as_u16() == 200 || status.as_u16() == 201 {
            return resp.json::<Value>().await.ok();
        }
        let text = resp.text().await.unwrap_or_default();
        tracing::error!("code host PUT {url} returned {status}: {}", &text[..text.len().min(200)]);
        None
    }

    async fn get_file_sha(&self, owner: &str, repo: &str, path: &str, branch: &str) -> Option<String> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/contents/{path}?ref={branch}");
        let data = self.get(&url).await?;
        data.get("sha").and_then(|v| v.as_str()).map(String::from)
    }

    async fn create_branch(&self, owner: &str, repo: &str, branch_name: &str, from_branch: &str) -> bool {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/git/refs/heads/{from_branch}");
        let Some(data) = self.get(&url).await else {
            return false;
        };
        let Some(sha) = data.pointer("/object/sha").and_then(|v| v.as_str()) else {
            return false;
        };

        let url = format!("{API_BASE}/repos/{owner}/{repo}/git/refs");
        self.post(
            &url,
            json!({ "ref": format!("refs/heads/{branch_name}"), "sha": sha }),
        )
        .await
        .is_some()
    }

    async fn commit_file(&self, owner: &str, repo: &str, branch: &str, change: &FileChange) -> bool {
        let encoded = base64::engine::general_purpose::STANDARD.encode(change.content.as_bytes());

        let mut payload = json!({
            "message": change.message,
            "content": encoded,
            "branch": branch,
        });

        if let Some(sha) = self.get_file_sha(owner, repo, &change.path, branch).await {
            payload["sha"] = json!(sha);
        }

        let url = format!("{API_BASE}/repos/{owner}/{repo}/contents/{}", change.path);
        self.put(&url, payload).await.is_some()
    }

    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        title: &str,
        body: &str,
        base: &str,
    ) -> Option<PullRequestInfo> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/pulls");
        let result = self
            .post(&url, json!({ "title": title, "body": body, "head": branch, "base": base }))
            .await?;

        Some(PullRequestInfo {
            number: result.get("number")?.as_u64()?,
            url: result.get("html_url")?.as_str()?.to_string(),
            branch: branch.to_string(),
        })
    }
}

#[async_trait]
impl CodeHostAdapter for LiveCodeHostAdapter {
    async fn get_repo_metadata(&self, owner: &str, repo: &str) -> Option<RepoMetadata> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}");
        let data = self.get(&url).await?;
        let default_branch = data.get("default_branch")?.as_str()?.to_string();
        Some(RepoMetadata { default_branch })
    }

    async fn get_file_tree(&self, owner: &str, repo: &str, branch: &str) -> Vec<String> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/git/trees/{branch}?recursive=1");
        let Some(data) = self.get(&url).await else {
            return Vec::new();
        };
        data.get("tree")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("blob"))
                    .filter_map(|item| item.get("path").and_then(|p| p.as_str()).map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn get_file_content(&self, owner: &str, repo: &str, path: &str, branch: &str) -> Option<String> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/contents/{path}?ref={branch}");
        let data = self.get(&url).await?;
        let content = data.get("content")?.as_str()?;
        let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();
        let decoded = base64::engine::general_purpose::STANDARD.decode(cleaned).ok()?;
        Some(String::from_utf8_lossy(&decoded).into_owned())
    }

    async fn get_recent_commits(&self, owner: &str, repo: &str, branch: &str, limit: usize) -> Vec<CommitRecord> {
        let url = format!("{API_BASE}/repos/{owner}/{repo}/commits?sha={branch}&per_page={limit}");
        let Some(data) = self.get(&url).await else {
            return Vec::new();
        };
        let Some(items) = data.as_array() else {
            return Vec::new();
        };

        items
            .iter()
            .filter_map(|c| {
                let sha = c.get("sha")?.as_str()?;
                let full_message = c.pointer("/commit/message")?.as_str().unwrap_or_default();
                let message = full_message.lines().next().unwrap_or_default().to_string();
                let author = c
                    .pointer("/commit/author/name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let date = c
                    .pointer("/commit/author/date")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();

                Some(CommitRecord {
                    service: String::new(),
                    sha: sha.chars().take(8).collect(),
                    message,
                    author,
                    date,
                })
            })
            .collect()
    }

    async fn propose_fix(
        &self,
        owner: &str,
        repo: &str,
        base_branch: &str,
        changes: Vec<FileChange>,
        title: &str,
        diagnosis: &str,
    ) -> Option<PullRequestInfo> {
        let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let slug: String = title
            .to_lowercase()
            .replace(' ', "-")
            .chars()
            .take(40)
            .collect();
        let branch = format!("cortex/{slug}-{timestamp}");

        if !self.create_branch(owner, repo, &branch, base_branch).await {
            return None;
        }

        for change in &changes {
            if !self.commit_file(owner, repo, &branch, change).await {
                tracing::error!("failed to commit {}", change.path);
                return None;
            }
        }

        let body = format!(
            "## Cortex Automated Fix\n\n{diagnosis}\n\n---\n*This PR was created by Cortex based on an automated diagnosis. Review before merging.*\n"
        );

        self.create_pull_request(owner, repo, &branch, title, &body, base_branch).await
    }
}
