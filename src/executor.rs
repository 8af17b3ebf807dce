//! Action Executor: maps a diagnosis's recommended actions through the
//! autonomy policy to Platform/Code-Host adapter side effects. Never
//! retries — retrying is a property of the next scheduler cycle or a new
//! investigation, not of this component.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::codehost::{CodeHostAdapter, FileChange};
use crate::investigation::tool::ActionSpec;
use crate::platform::PlatformAdapter;
use crate::policy::AutonomyPolicy;
use crate::store::{ActionRecord, KnowledgeStore};

pub struct ActionExecutor {
    store: Arc<KnowledgeStore>,
    platform: Arc<dyn PlatformAdapter>,
    codehost: Arc<dyn CodeHostAdapter>,
    policy: Arc<AutonomyPolicy>,
}

impl ActionExecutor {
    pub fn new(
        store: Arc<KnowledgeStore>,
        platform: Arc<dyn PlatformAdapter>,
        codehost: Arc<dyn CodeHostAdapter>,
        policy: Arc<AutonomyPolicy>,
    ) -> Self {
        Self { store, platform, codehost, policy }
    }

    /// Executes every action in order, returning the records to attach to
    /// the incident. `service` is the investigation's target service;
    /// `diagnosis_text` is passed through to `propose_fix`'s PR body.
    pub async fn execute_all(&self, service: &str, diagnosis_text: &str, actions: &[ActionSpec]) -> Vec<ActionRecord> {
        let mut records = Vec::with_capacity(actions.len());
        for action in actions {
            records.push(self.execute_one(service, diagnosis_text, action).await);
        }
        records
    }

    async fn execute_one(&self, service: &str, diagnosis_text: &str, action: &ActionSpec) -> ActionRecord {
        let action_type = action.action_type.as_str();

        // notify_only is always permitted and never consults policy (see
        // the autonomy policy's design note on the ambiguous source tables).
        if action_type != "notify_only" && !self.policy.can_do(service, action_type) {
            tracing::info!(service, action_type, "action blocked by autonomy policy");
            return ActionRecord {
                action_type: action_type.to_string(),
                status: "blocked_by_autonomy".to_string(),
                artifact: None,
            };
        }

        match action_type {
            "restart" => {
                let ok = match self.resolve_platform_ids(service) {
                    Some((service_id, env_id)) => self.platform.restart(&service_id, &env_id).await,
                    None => false,
                };
                ActionRecord {
                    action_type: action_type.to_string(),
                    status: if ok { "success" } else { "failed" }.to_string(),
                    artifact: None,
                }
            }
            "set_variable" => {
                let Some((key, value)) = extract_variable(&action.details) else {
                    return ActionRecord {
                        action_type: action_type.to_string(),
                        status: "error".to_string(),
                        artifact: Some(json!({ "error": "missing details.variable/details.value" })),
                    };
                };
                let ok = match self.resolve_platform_ids(service) {
                    Some((service_id, env_id)) => self.platform.set_variable(&service_id, &env_id, &key, &value).await,
                    None => false,
                };
                ActionRecord {
                    action_type: action_type.to_string(),
                    status: if ok { "success" } else { "failed" }.to_string(),
                    artifact: None,
                }
            }
            "rollback" => {
                let ok = match self.resolve_platform_ids(service) {
                    Some((service_id, env_id)) => self.platform.rollback(&service_id, &env_id).await,
                    None => false,
                };
                ActionRecord {
                    action_type: action_type.to_string(),
                    status: if ok { "success" } else { "failed" }.to_string(),
                    artifact: None,
                }
            }
            "propose_fix" => self.execute_propose_fix(service, diagnosis_text, &action.details).await,
            "notify_only" => ActionRecord {
                action_type: action_type.to_string(),
                status: "ok".to_string(),
                artifact: action
                    .details
                    .get("message")
                    .cloned()
                    .map(|m| json!({ "message": m })),
            },
            other => {
                tracing::warn!("unrecognized action type '{other}'");
                ActionRecord {
                    action_type: other.to_string(),
                    status: "error".to_string(),
                    artifact: Some(json!({ "error": "unrecognized action type" })),
                }
            }
        }
    }

    /// Resolves a Knowledge Store service name to the platform's own
    /// identifiers. Every mutating platform call is dispatched against
    /// these, never against the store's name — mirroring the original's
    /// `kb.get_service(service_name)` lookup before each write.
    fn resolve_platform_ids(&self, service: &str) -> Option<(String, String)> {
        let svc = self.store.get_service(service)?;
        Some((svc.platform_service_id, svc.environment_id))
    }

    async fn execute_propose_fix(&self, service: &str, diagnosis_text: &str, details: &Value) -> ActionRecord {
        let (owner, repo) = match self.store.get_service(service) {
            Some(svc) if !svc.repo_owner.is_empty() && !svc.repo_name.is_empty() => (svc.repo_owner, svc.repo_name),
            _ => {
                return ActionRecord {
                    action_type: "propose_fix".to_string(),
                    status: "error".to_string(),
                    artifact: Some(json!({ "error": "service has no known repo coordinate" })),
                };
            }
        };

        let changes: Vec<FileChange> = details
            .get("changes")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        if changes.is_empty() {
            return ActionRecord {
                action_type: "propose_fix".to_string(),
                status: "error".to_string(),
                artifact: Some(json!({ "error": "no changes provided" })),
            };
        }

        let title = details
            .get("title")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("Automated fix for {service}"));

        // The PR base is always the repo's main branch, never the service's
        // resolved/configured branch — that branch is only used elsewhere
        // for reading the tree and commits.
        match self.codehost.propose_fix(&owner, &repo, "main", changes, &title, diagnosis_text).await {
            Some(pr) => ActionRecord {
                action_type: "propose_fix".to_string(),
                status: "pr_created".to_string(),
                artifact: Some(json!({ "number": pr.number, "url": pr.url, "branch": pr.branch })),
            },
            None => ActionRecord {
                action_type: "propose_fix".to_string(),
                status: "failed".to_string(),
                artifact: None,
            },
        }
    }

}

fn extract_variable(details: &Value) -> Option<(String, String)> {
    let key = details.get("variable").and_then(|v| v.as_str())?.to_string();
    let value = details.get("value").and_then(|v| v.as_str())?.to_string();
    Some((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codehost::fake::FakeCodeHostAdapter;
    use crate::platform::fake::FakePlatformAdapter;
    use crate::policy::AutonomyPolicy;
    use crate::store::{Service, ServiceType};
    use chrono::Utc;

    fn sample_service(name: &str) -> Service {
        Service {
            name: name.to_string(),
            platform_service_id: format!("svc_{name}"),
            environment_id: "env".to_string(),
            service_type: ServiceType::App,
            stack: "node".to_string(),
            role: "web".to_string(),
            repo_owner: "acme".to_string(),
            repo_name: name.to_string(),
            repo_branch: "main".to_string(),
            health_url: None,
            last_status: None,
            updated_at: Utc::now(),
        }
    }

    fn executor_with(policy_dir: &str) -> (ActionExecutor, Arc<KnowledgeStore>, Arc<FakePlatformAdapter>, Arc<FakeCodeHostAdapter>) {
        let store = Arc::new(KnowledgeStore::new());
        store.upsert_service(sample_service("web-a"));
        let platform = Arc::new(FakePlatformAdapter::new());
        let codehost = Arc::new(FakeCodeHostAdapter::new());
        let policy = Arc::new(AutonomyPolicy::load(policy_dir));
        (
            ActionExecutor::new(store.clone(), platform.clone(), codehost.clone(), policy),
            store,
            platform,
            codehost,
        )
    }

    #[tokio::test]
    async fn restart_dispatches_to_platform() {
        let (executor, _store, platform, _codehost) = executor_with("/nonexistent/cortex-config-tests");
        let records = executor
            .execute_all(
                "web-a",
                "diagnosis",
                &[ActionSpec { action_type: "restart".to_string(), details: json!({}) }],
            )
            .await;
        assert_eq!(records[0].status, "success");
        assert_eq!(platform.restart_calls(), vec!["svc_web-a".to_string()]);
    }

    #[tokio::test]
    async fn set_variable_without_details_errors() {
        let (executor, _store, _platform, _codehost) = executor_with("/nonexistent/cortex-config-tests");
        let records = executor
            .execute_all(
                "web-a",
                "diagnosis",
                &[ActionSpec { action_type: "set_variable".to_string(), details: json!({}) }],
            )
            .await;
        assert_eq!(records[0].status, "error");
    }

    #[tokio::test]
    async fn notify_only_never_consults_policy() {
        let (executor, _store, _platform, _codehost) = executor_with("/nonexistent/cortex-config-tests");
        let records = executor
            .execute_all(
                "web-a",
                "diagnosis",
                &[ActionSpec {
                    action_type: "notify_only".to_string(),
                    details: json!({ "message": "heads up" }),
                }],
            )
            .await;
        assert_eq!(records[0].status, "ok");
    }

    #[tokio::test]
    async fn propose_fix_with_one_change_creates_a_pr() {
        let (executor, _store, _platform, codehost) = executor_with("/nonexistent/cortex-config-tests");
        let records = executor
            .execute_all(
                "web-a",
                "db config is hardcoded",
                &[ActionSpec {
                    action_type: "propose_fix".to_string(),
                    details: json!({
                        "title": "Fix hardcoded db host",
                        "changes": [{ "path": "config/database.php", "content": "...", "message": "use platform reference" }],
                    }),
                }],
            )
            .await;
        assert_eq!(records[0].status, "pr_created");
        assert!(records[0].artifact.as_ref().unwrap().get("url").is_some());
        assert_eq!(codehost.proposed_fixes().len(), 1);
        assert_eq!(codehost.proposed_fixes()[0].2, "main");
    }

    #[tokio::test]
    async fn propose_fix_base_branch_is_always_main_even_with_a_different_resolved_branch() {
        let (executor, store, _platform, codehost) = executor_with("/nonexistent/cortex-config-tests");
        let mut svc = store.get_service("web-a").unwrap();
        svc.repo_branch = "develop".to_string();
        store.upsert_service(svc);

        let records = executor
            .execute_all(
                "web-a",
                "diagnosis",
                &[ActionSpec {
                    action_type: "propose_fix".to_string(),
                    details: json!({
                        "changes": [{ "path": "a.txt", "content": "x", "message": "fix" }],
                    }),
                }],
            )
            .await;
        assert_eq!(records[0].status, "pr_created");
        assert_eq!(codehost.proposed_fixes()[0].2, "main");
    }

    #[tokio::test]
    async fn rollback_blocked_by_autonomy_never_reaches_platform() {
        use std::path::Path;

        let dir = std::env::temp_dir().join(format!("cortex-executor-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            Path::new(&dir).join("autonomy.json"),
            serde_json::json!({
                "defaults": { "can_restart": true, "can_set_variables": true, "can_rollback": true, "can_create_pr": true, "max_repair_attempts": 3 },
                "services": { "web-a": { "can_rollback": false } },
                "forbidden_actions": [],
            })
            .to_string(),
        )
        .unwrap();

        let (executor, _store, platform, _codehost) = executor_with(dir.to_str().unwrap());
        let records = executor
            .execute_all("web-a", "diagnosis", &[ActionSpec { action_type: "rollback".to_string(), details: json!({}) }])
            .await;
        assert_eq!(records[0].status, "blocked_by_autonomy");
        assert!(platform.rollback_calls().is_empty());
    }
}
