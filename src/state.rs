use std::sync::Arc;

use chrono::Utc;

use crate::codehost::github::LiveCodeHostAdapter;
use crate::codehost::CodeHostAdapter;
use crate::config::CortexConfig;
use crate::discovery::DiscoveryPipeline;
use crate::docs::DocsLoader;
use crate::executor::ActionExecutor;
use crate::investigation::llm::AnthropicClient;
use crate::investigation::InvestigationEngine;
use crate::metrics::CortexMetrics;
use crate::notify::{LogNotifier, Notifier};
use crate::platform::railway::LivePlatformAdapter;
use crate::platform::PlatformAdapter;
use crate::policy::AutonomyPolicy;
use crate::store::{Event, Incident, KnowledgeStore};

/// Shared application state: every component the HTTP surface and the
/// scheduler's background tasks depend on, assembled once at startup and
/// handed around as `Arc` clones. No component holds another's in-memory
/// state directly — only through these shared handles, per the store's
/// narrow-interface ownership rule (§3).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CortexConfig>,
    pub store: Arc<KnowledgeStore>,
    pub platform: Arc<dyn PlatformAdapter>,
    pub codehost: Arc<dyn CodeHostAdapter>,
    pub discovery: Arc<DiscoveryPipeline>,
    pub investigation: Arc<InvestigationEngine>,
    pub executor: Arc<ActionExecutor>,
    pub docs: Arc<DocsLoader>,
    pub policy: Arc<AutonomyPolicy>,
    pub notifier: Arc<dyn Notifier>,
    pub metrics: Arc<CortexMetrics>,
    pub shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl AppState {
    pub fn new(config: CortexConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);

        let store = Arc::new(KnowledgeStore::new());
        store.load_snapshot(&config.knowledge_store_path)?;

        let platform: Arc<dyn PlatformAdapter> = Arc::new(LivePlatformAdapter::new(config.platform_token.clone()));
        let codehost: Arc<dyn CodeHostAdapter> = Arc::new(LiveCodeHostAdapter::new(config.codehost_token.clone()));

        let discovery = Arc::new(DiscoveryPipeline::new(
            store.clone(),
            platform.clone(),
            codehost.clone(),
            config.platform_project_id.clone(),
            config.platform_environment_id.clone(),
            !config.codehost_token.is_empty(),
        ));

        let docs = Arc::new(DocsLoader::new(config.knowledge_dir.clone()));
        let policy = Arc::new(AutonomyPolicy::load(&config.config_dir));

        let llm = Arc::new(AnthropicClient::new(config.llm_api_key.clone(), config.llm_model.clone()));
        let metrics = Arc::new(CortexMetrics::new());

        let investigation = Arc::new(InvestigationEngine::new(
            store.clone(),
            platform.clone(),
            codehost.clone(),
            llm,
            docs.clone(),
            policy.clone(),
            metrics.clone(),
            config.max_turns,
        ));

        let executor = Arc::new(ActionExecutor::new(store.clone(), platform.clone(), codehost.clone(), policy.clone()));

        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

        Ok(Self {
            config,
            store,
            platform,
            codehost,
            discovery,
            investigation,
            executor,
            docs,
            policy,
            notifier,
            metrics,
            shutdown_tx,
        })
    }

    /// Runs one full investigation end to end: drive the Investigation
    /// Engine, execute any recommended actions through the autonomy-gated
    /// executor, persist the resulting incident, and notify. This is the
    /// single entry point used by the health monitor loop, the deploy
    /// webhook, and the on-demand `/diagnose` handler — they differ only in
    /// `trigger`.
    pub async fn investigate_and_act(&self, service: &str, trigger: &str) -> Incident {
        self.metrics.investigation_started();
        self.store.append_event(Event {
            event_type: "investigation_started".to_string(),
            service: Some(service.to_string()),
            message: trigger.to_string(),
            details: serde_json::json!({}),
            timestamp: Utc::now(),
        });

        let outcome = self.investigation.investigate(service, trigger).await;
        let mut incident = outcome.incident;

        if let Some(diagnosis) = &outcome.diagnosis {
            self.metrics.diagnosis_reached();
            let actions = self
                .executor
                .execute_all(service, &diagnosis.text, &diagnosis.actions)
                .await;
            for record in &actions {
                self.metrics.action_recorded(&record.status);
            }
            incident.actions = actions;
            self.store.save_incident(incident.clone());

            let stack = self
                .store
                .get_service(service)
                .map(|s| s.stack)
                .unwrap_or_else(|| "unknown".to_string());
            let action_types = incident.actions.iter().map(|a| a.action_type.as_str()).collect::<Vec<_>>().join(", ");
            self.docs.add_incident_learning(
                service,
                &stack,
                trigger,
                &diagnosis.text,
                &format!("Resolved in {} turns. Actions: [{}].", incident.turns, action_types),
            );
        }

        self.notifier.notify(&incident).await;

        self.store.append_event(Event {
            event_type: "investigation_completed".to_string(),
            service: Some(service.to_string()),
            message: incident.diagnosis.clone().unwrap_or_else(|| "no diagnosis reached".to_string()),
            details: serde_json::json!({ "incident_id": incident.incident_id, "turns": incident.turns }),
            timestamp: Utc::now(),
        });

        incident
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.store.save_snapshot() {
            tracing::error!("failed to persist knowledge store snapshot on shutdown: {e}");
        }
    }
}
