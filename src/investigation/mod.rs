pub mod llm;
pub mod tool;

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use crate::codehost::CodeHostAdapter;
use crate::docs::DocsLoader;
use crate::metrics::CortexMetrics;
use crate::platform::PlatformAdapter;
use crate::policy::AutonomyPolicy;
use crate::store::{is_sensitive_key, mask_value, Incident, KnowledgeStore};

use self::llm::LlmClient;
use self::tool::{tool_schemas, ActionSpec, Tool};

pub struct Diagnosis {
    pub text: String,
    pub severity: String,
    pub actions: Vec<ActionSpec>,
}

pub struct InvestigationOutcome {
    pub incident: Incident,
    pub diagnosis: Option<Diagnosis>,
}

pub struct InvestigationEngine {
    store: Arc<KnowledgeStore>,
    platform: Arc<dyn PlatformAdapter>,
    codehost: Arc<dyn CodeHostAdapter>,
    llm: Arc<dyn LlmClient>,
    docs: Arc<DocsLoader>,
    policy: Arc<AutonomyPolicy>,
    metrics: Arc<CortexMetrics>,
    max_turns: u32,
}

impl InvestigationEngine {
    pub fn new(
        store: Arc<KnowledgeStore>,
        platform: Arc<dyn PlatformAdapter>,
        codehost: Arc<dyn CodeHostAdapter>,
        llm: Arc<dyn LlmClient>,
        docs: Arc<DocsLoader>,
        policy: Arc<AutonomyPolicy>,
        metrics: Arc<CortexMetrics>,
        max_turns: u32,
    ) -> Self {
        Self {
            store,
            platform,
            codehost,
            llm,
            docs,
            policy,
            metrics,
            max_turns,
        }
    }

    pub async fn investigate(&self, service_name: &str, trigger: &str) -> InvestigationOutcome {
        let incident_id = format!("inc_{}", uuid::Uuid::new_v4());
        let started_at = Utc::now();

        let Some(context) = self.store.get_deep_context(service_name) else {
            let incident = Incident {
                incident_id,
                service: service_name.to_string(),
                trigger: trigger.to_string(),
                started_at,
                finished_at: Some(Utc::now()),
                transcript: json!([]),
                diagnosis: None,
                severity: None,
                actions: vec![],
                turns: 0,
            };
            self.store.save_incident(incident.clone());
            return InvestigationOutcome { incident, diagnosis: None };
        };

        let system = self.build_system_prompt(&context.service.name, &context.service.stack, &context.service.service_type.as_str());
        let mut messages: Vec<Value> = vec![json!({
            "role": "user",
            "content": self.build_initial_message(&context),
        })];

        let tools = tool_schemas();
        let mut diagnosis: Option<Diagnosis> = None;
        let mut turns_used = 0u32;
        let mut transport_error = false;

        for turn in 0..self.max_turns {
            turns_used = turn + 1;

            let Some(reply) = self.llm.send_turn(&system, &messages, &tools).await else {
                transport_error = true;
                break;
            };

            messages.push(json!({ "role": "assistant", "content": reply.content_blocks }));

            if !reply.has_tool_use() {
                break;
            }

            let mut tool_results = Vec::new();
            let mut completed = None;

            for block in reply.tool_use_blocks() {
                let tool_use_id = block.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let name = block.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                let input = block.get("input").cloned().unwrap_or(Value::Null);

                let Some(parsed) = Tool::parse(name, &input) else {
                    tool_results.push(json!({
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": format!("Tool error: unknown tool '{name}'"),
                    }));
                    continue;
                };

                if let Tool::DiagnoseComplete { diagnosis: text, severity, actions } = &parsed {
                    completed = Some(Diagnosis {
                        text: text.clone(),
                        severity: severity.clone(),
                        actions: actions.clone(),
                    });
                    tool_results.push(json!({
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": "Diagnosis recorded.",
                    }));
                    continue;
                }

                let result = self.execute_tool(&parsed).await;
                tool_results.push(json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": result,
                }));
            }

            messages.push(json!({ "role": "user", "content": tool_results }));

            if let Some(d) = completed {
                diagnosis = Some(d);
                break;
            }
        }

        let incident = Incident {
            incident_id,
            service: service_name.to_string(),
            trigger: trigger.to_string(),
            started_at,
            finished_at: Some(Utc::now()),
            transcript: json!(messages),
            diagnosis: diagnosis.as_ref().map(|d| d.text.clone()),
            severity: diagnosis.as_ref().map(|d| d.severity.clone()),
            actions: vec![],
            turns: turns_used,
        };

        if transport_error {
            self.metrics.llm_transport_error();
        }
        self.store.save_incident(incident.clone());

        InvestigationOutcome { incident, diagnosis }
    }

    fn build_system_prompt(&self, target_service: &str, stack: &str, service_type: &str) -> String {
        let mut parts = Vec::new();

        parts.push(
            "You are Cortex, an autonomous platform-diagnostics engine. Investigate the reported \
             symptom using the available tools, reach a diagnosis, and recommend concrete actions. \
             Be methodical: check logs, variables, dependency health, and recent deploys before concluding."
                .to_string(),
        );

        if let Some(business) = self.policy.business_context_prompt(target_service) {
            parts.push(format!("Business context:\n{business}"));
        }

        let forbidden = self.policy.forbidden_actions();
        parts.push(format!(
            "Forbidden action types: {}. Max repair attempts for this service: {}.",
            if forbidden.is_empty() { "none".to_string() } else { forbidden.join(", ") },
            self.policy.max_repair_attempts(target_service)
        ));

        let known = self
            .store
            .list_services()
            .iter()
            .map(|s| format!("{} ({}/{})", s.name, s.service_type.as_str(), s.stack))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("Known services: {known}"));

        let docs = self.docs.get_relevant_docs(stack, service_type);
        if !docs.is_empty() {
            parts.push(docs);
        }

        parts.join("\n\n")
    }

    fn build_initial_message(&self, context: &crate::store::DeepContext) -> String {
        let mut lines = vec![format!(
            "Service: {} (type={}, stack={})",
            context.service.name,
            context.service.service_type.as_str(),
            context.service.stack
        )];

        if !context.outgoing_dependencies.is_empty() {
            let deps = context
                .outgoing_dependencies
                .iter()
                .map(|d| format!("{} ({})", d.depends_on, d.dep_type.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("Depends on: {deps}"));
        }

        if !context.flags.is_empty() {
            let flags = context
                .flags
                .iter()
                .map(|f| format!("{}: {}", f.flag_type, f.message))
                .collect::<Vec<_>>()
                .join("; ");
            lines.push(format!("Open flags: {flags}"));
        }

        if !context.variable_issues.is_empty() {
            let issues = context
                .variable_issues
                .iter()
                .map(|v| v.key.clone())
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("Variable issues: {issues}"));
        }

        if !context.recent_deploys.is_empty() {
            let deploys = context
                .recent_deploys
                .iter()
                .take(3)
                .map(|d| format!("{} ({})", d.deploy_id, d.status))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("Last deploys: {deploys}"));
        }

        if !context.recent_commits.is_empty() {
            let commits = context
                .recent_commits
                .iter()
                .take(5)
                .map(|c| format!("{} {}", c.sha, c.message))
                .collect::<Vec<_>>()
                .join("; ");
            lines.push(format!("Recent commits: {commits}"));
        }

        if !context.recent_incidents.is_empty() {
            let incidents = context
                .recent_incidents
                .iter()
                .take(3)
                .map(|i| i.diagnosis.clone().unwrap_or_else(|| "no diagnosis".to_string()))
                .collect::<Vec<_>>()
                .join("; ");
            lines.push(format!("Prior incidents: {incidents}"));
        }

        lines.join("\n")
    }

    async fn execute_tool(&self, tool: &Tool) -> String {
        match tool {
            Tool::GetLogs { service } => match self.store.get_service(service) {
                Some(svc) => self.platform.get_service_logs(&svc.platform_service_id, &svc.environment_id).await,
                None => "Service not found.".to_string(),
            },
            Tool::GetVariables { service } => {
                let vars = self.store.get_variables(service);
                let masked: std::collections::HashMap<String, String> = vars
                    .into_iter()
                    .map(|v| {
                        let value = if is_sensitive_key(&v.key) {
                            mask_value(&v.value)
                        } else {
                            v.value
                        };
                        (v.key, value)
                    })
                    .collect();
                serde_json::to_string(&masked).unwrap_or_else(|_| "{}".to_string())
            }
            Tool::GetFile { service, path } => self
                .store
                .get_file(service, path)
                .map(|f| f.content)
                .unwrap_or_else(|| "File not found".to_string()),
            Tool::GetDeploys { service } => {
                let deploys = self.store.list_deploys(service, 10);
                serde_json::to_string(&deploys).unwrap_or_else(|_| "[]".to_string())
            }
            Tool::GetCommits { service, limit } => {
                let commits = self.store.list_commits(service, *limit);
                serde_json::to_string(&commits).unwrap_or_else(|_| "[]".to_string())
            }
            Tool::CheckHealth { service } => {
                let healthy = match self.store.get_service(service) {
                    Some(svc) => self.platform.check_health(service, svc.health_url.as_deref()).await,
                    None => false,
                };
                if healthy { "HEALTHY".to_string() } else { "UNHEALTHY".to_string() }
            }
            Tool::GetDependencyStatus { service } => {
                let deps = self.store.outgoing_dependencies(service);
                let mut lines = Vec::new();
                for dep in deps {
                    let healthy = match self.store.get_service(&dep.depends_on) {
                        Some(svc) => self.platform.check_health(&dep.depends_on, svc.health_url.as_deref()).await,
                        None => false,
                    };
                    lines.push(format!("{}: {}", dep.depends_on, if healthy { "healthy" } else { "unhealthy" }));
                }
                if lines.is_empty() {
                    "No dependencies.".to_string()
                } else {
                    lines.join("\n")
                }
            }
            Tool::DiagnoseComplete { .. } => "Diagnosis recorded.".to_string(),
        }
    }

    pub fn codehost(&self) -> &Arc<dyn CodeHostAdapter> {
        &self.codehost
    }

    pub fn platform(&self) -> &Arc<dyn PlatformAdapter> {
        &self.platform
    }

    pub fn policy(&self) -> &Arc<AutonomyPolicy> {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codehost::fake::FakeCodeHostAdapter;
    use crate::investigation::llm::{text_reply, tool_use_reply, FakeLlmClient};
    use crate::platform::fake::FakePlatformAdapter;
    use crate::store::{Service, ServiceType};

    fn setup(max_turns: u32, llm: FakeLlmClient) -> (InvestigationEngine, Arc<KnowledgeStore>) {
        let store = Arc::new(KnowledgeStore::new());
        store.upsert_service(Service {
            name: "web-a".to_string(),
            platform_service_id: "svc".to_string(),
            environment_id: "env".to_string(),
            service_type: ServiceType::App,
            stack: "node".to_string(),
            role: "web".to_string(),
            repo_owner: "acme".to_string(),
            repo_name: "web".to_string(),
            repo_branch: "main".to_string(),
            health_url: None,
            last_status: None,
            updated_at: Utc::now(),
        });

        let docs = Arc::new(DocsLoader::new("/nonexistent/cortex-docs-tests"));
        let policy = Arc::new(AutonomyPolicy::load("/nonexistent/cortex-config-tests"));
        let metrics = Arc::new(CortexMetrics::new());

        let engine = InvestigationEngine::new(
            store.clone(),
            Arc::new(FakePlatformAdapter::new()),
            Arc::new(FakeCodeHostAdapter::new()),
            Arc::new(llm),
            docs,
            policy,
            metrics,
            max_turns,
        );
        (engine, store)
    }

    #[tokio::test]
    async fn max_turns_zero_records_no_diagnosis_and_no_actions() {
        let (engine, _store) = setup(0, FakeLlmClient::new(vec![]));
        let outcome = engine.investigate("web-a", "manual").await;
        assert!(outcome.diagnosis.is_none());
        assert_eq!(outcome.incident.turns, 0);
        assert!(outcome.incident.actions.is_empty());
    }

    #[tokio::test]
    async fn diagnose_complete_terminates_the_loop() {
        let reply = tool_use_reply(
            "tu_1",
            "diagnose_complete",
            json!({ "diagnosis": "disk full", "severity": "high", "actions": [] }),
        );
        let (engine, _store) = setup(8, FakeLlmClient::new(vec![reply]));
        let outcome = engine.investigate("web-a", "manual").await;
        assert_eq!(outcome.diagnosis.as_ref().unwrap().text, "disk full");
        assert_eq!(outcome.incident.turns, 1);
    }

    #[tokio::test]
    async fn no_tool_use_breaks_loop_without_diagnosis() {
        let (engine, _store) = setup(8, FakeLlmClient::new(vec![text_reply("I don't know.")]));
        let outcome = engine.investigate("web-a", "manual").await;
        assert!(outcome.diagnosis.is_none());
        assert_eq!(outcome.incident.turns, 1);
    }

    #[tokio::test]
    async fn transport_error_ends_loop_and_still_writes_incident() {
        let (engine, store) = setup(8, FakeLlmClient::with_transport_failure_at_end(vec![]));
        let outcome = engine.investigate("web-a", "manual").await;
        assert!(outcome.diagnosis.is_none());
        assert!(store.get_incident(&outcome.incident.incident_id).is_some());
    }

    #[tokio::test]
    async fn unknown_service_writes_zero_turn_incident() {
        let (engine, _store) = setup(8, FakeLlmClient::new(vec![]));
        let outcome = engine.investigate("does-not-exist", "manual").await;
        assert_eq!(outcome.incident.turns, 0);
        assert!(outcome.diagnosis.is_none());
    }
}
