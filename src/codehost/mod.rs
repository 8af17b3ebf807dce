pub mod fake;
pub mod github;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileChange {
    pub path: String,
    pub content: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub url: String,
    pub branch: String,
}

/// Repo-level metadata (§4.C "Reads: repo metadata, ..."). Currently just the
/// default branch, which the Platform Adapter's GraphQL query never returns
/// (Railway's `source` field has no `branch`) — this is the fallback lookup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepoMetadata {
    pub default_branch: String,
}

/// Capability set for the code-hosting service. Exactly two implementations:
/// a live REST client (`github::LiveCodeHostAdapter`) and an in-memory fake.
/// Reads degrade to empty on failure; `propose_fix` aborts and returns
/// `None` if any step of its branch/commit/PR sequence fails, and it MUST
/// NEVER push to the base branch directly.
#[async_trait]
pub trait CodeHostAdapter: Send + Sync {
    async fn get_repo_metadata(&self, owner: &str, repo: &str) -> Option<RepoMetadata>;
    async fn get_file_tree(&self, owner: &str, repo: &str, branch: &str) -> Vec<String>;
    async fn get_file_content(&self, owner: &str, repo: &str, path: &str, branch: &str) -> Option<String>;
    async fn get_recent_commits(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        limit: usize,
    ) -> Vec<crate::store::CommitRecord>;

    /// `base_branch` is whatever the caller passes; `ActionExecutor` always
    /// passes the literal `"main"` here, matching the original's PR flow
    /// (the resolved repo branch is only ever used for reading the tree and
    /// commits, never as the PR base).
    async fn propose_fix(
        &self,
        owner: &str,
        repo: &str,
        base_branch: &str,
        changes: Vec<FileChange>,
        title: &str,
        diagnosis: &str,
    ) -> Option<PullRequestInfo>;
}
