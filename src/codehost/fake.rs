use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::store::CommitRecord;

use super::{CodeHostAdapter, FileChange, PullRequestInfo, RepoMetadata};

#[derive(Default)]
struct Inner {
    trees: HashMap<String, Vec<String>>,
    files: HashMap<String, String>,
    commits: HashMap<String, Vec<CommitRecord>>,
    repo_metadata: HashMap<String, RepoMetadata>,
    next_pr_number: u64,
    proposed_fixes: Vec<(String, String, String, Vec<FileChange>)>,
    fail_propose_fix: bool,
}

/// In-memory stand-in for the code host, seeded via `add_*` builder methods.
pub struct FakeCodeHostAdapter {
    inner: Mutex<Inner>,
}

impl Default for FakeCodeHostAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCodeHostAdapter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_pr_number: 1,
                ..Default::default()
            }),
        }
    }

    fn repo_key(owner: &str, repo: &str) -> String {
        format!("{owner}/{repo}")
    }

    pub fn add_tree(&self, owner: &str, repo: &str, files: Vec<String>) -> &Self {
        self.inner.lock().unwrap().trees.insert(Self::repo_key(owner, repo), files);
        self
    }

    pub fn add_file(&self, owner: &str, repo: &str, path: &str, content: &str) -> &Self {
        let key = format!("{}/{path}", Self::repo_key(owner, repo));
        self.inner.lock().unwrap().files.insert(key, content.to_string());
        self
    }

    pub fn add_commits(&self, owner: &str, repo: &str, commits: Vec<CommitRecord>) -> &Self {
        self.inner
            .lock()
            .unwrap()
            .commits
            .insert(Self::repo_key(owner, repo), commits);
        self
    }

    pub fn add_repo_metadata(&self, owner: &str, repo: &str, default_branch: &str) -> &Self {
        self.inner
            .lock()
            .unwrap()
            .repo_metadata
            .insert(Self::repo_key(owner, repo), RepoMetadata { default_branch: default_branch.to_string() });
        self
    }

    pub fn fail_next_propose_fix(&self) -> &Self {
        self.inner.lock().unwrap().fail_propose_fix = true;
        self
    }

    /// `(owner, repo, base_branch, changes)` for every accepted `propose_fix` call.
    pub fn proposed_fixes(&self) -> Vec<(String, String, String, Vec<FileChange>)> {
        self.inner.lock().unwrap().proposed_fixes.clone()
    }
}

#[async_trait]
impl CodeHostAdapter for FakeCodeHostAdapter {
    async fn get_repo_metadata(&self, owner: &str, repo: &str) -> Option<RepoMetadata> {
        self.inner.lock().unwrap().repo_metadata.get(&Self::repo_key(owner, repo)).cloned()
    }

    async fn get_file_tree(&self, owner: &str, repo: &str, _branch: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .trees
            .get(&Self::repo_key(owner, repo))
            .cloned()
            .unwrap_or_default()
    }

    async fn get_file_content(&self, owner: &str, repo: &str, path: &str, _branch: &str) -> Option<String> {
        let key = format!("{}/{path}", Self::repo_key(owner, repo));
        self.inner.lock().unwrap().files.get(&key).cloned()
    }

    async fn get_recent_commits(&self, owner: &str, repo: &str, _branch: &str, limit: usize) -> Vec<CommitRecord> {
        self.inner
            .lock()
            .unwrap()
            .commits
            .get(&Self::repo_key(owner, repo))
            .map(|c| c.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    async fn propose_fix(
        &self,
        owner: &str,
        repo: &str,
        base_branch: &str,
        changes: Vec<FileChange>,
        title: &str,
        _diagnosis: &str,
    ) -> Option<PullRequestInfo> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_propose_fix {
            inner.fail_propose_fix = false;
            return None;
        }

        let number = inner.next_pr_number;
        inner.next_pr_number += 1;
        inner
            .proposed_fixes
            .push((owner.to_string(), repo.to_string(), base_branch.to_string(), changes));

        Some(PullRequestInfo {
            number,
            url: format!("https://github.com/{owner}/{repo}/pull/{number}"),
            branch: format!("cortex/{}", title.to_lowercase().replace(' ', "-")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn propose_fix_returns_pr_info() {
        let fake = FakeCodeHostAdapter::new();
        let pr = fake
            .propose_fix(
                "acme",
                "web",
                "master",
                vec![FileChange {
                    path: "config/database.php".to_string(),
                    content: "...".to_string(),
                    message: "fix db config".to_string(),
                }],
                "Fix database config",
                "diagnosis text",
            )
            .await
            .unwrap();
        assert_eq!(pr.number, 1);
        assert!(pr.url.contains("acme/web/pull/1"));
        assert_eq!(fake.proposed_fixes()[0].2, "master");
    }

    #[tokio::test]
    async fn failed_propose_fix_returns_none() {
        let fake = FakeCodeHostAdapter::new();
        fake.fail_next_propose_fix();
        let pr = fake
            .propose_fix("acme", "web", "main", vec![], "Fix", "diagnosis")
            .await;
        assert!(pr.is_none());
    }

    #[tokio::test]
    async fn repo_metadata_returns_seeded_default_branch() {
        let fake = FakeCodeHostAdapter::new();
        fake.add_repo_metadata("acme", "web", "master");
        let meta = fake.get_repo_metadata("acme", "web").await.unwrap();
        assert_eq!(meta.default_branch, "master");
        assert!(fake.get_repo_metadata("acme", "unknown").await.is_none());
    }
}
