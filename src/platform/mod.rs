pub mod fake;
pub mod railway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawService {
    pub name: String,
    pub id: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub repo_branch: String,
    pub domains: Vec<String>,
    pub start_command: String,
    pub build_command: String,
    pub health_check_path: Option<String>,
    pub replica_count: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawDeploy {
    pub id: String,
    pub status: String,
    pub created_at: String,
    pub meta: serde_json::Value,
}

/// Capability set for the compute platform. Exactly two implementations
/// exist: a live GraphQL client (`railway::LivePlatformAdapter`) and an
/// in-memory fake (`fake::FakePlatformAdapter`) used by tests and by any
/// deployment missing platform credentials. Every method degrades to an
/// empty/false value and logs on transport failure — it never returns Err.
///
/// `service_id`/`environment_id` are the platform's own identifiers
/// (`Service::platform_service_id`/`Service::environment_id`), not the
/// Knowledge Store's service name — callers resolve them via
/// `KnowledgeStore::get_service` before dispatching here, the same way the
/// original's `kb.get_service(service_name)` resolution works.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    async fn get_services(&self, project_id: &str) -> Vec<RawService>;
    async fn get_variables(&self, service_id: &str, env_id: &str) -> std::collections::HashMap<String, String>;
    async fn get_recent_deploys(&self, service_id: &str, env_id: &str, limit: usize) -> Vec<RawDeploy>;
    async fn get_service_logs(&self, service_id: &str, env_id: &str) -> String;
    async fn check_health(&self, service_name: &str, health_url: Option<&str>) -> bool;
    async fn restart(&self, service_id: &str, env_id: &str) -> bool;
    async fn set_variable(&self, service_id: &str, env_id: &str, key: &str, value: &str) -> bool;
    async fn rollback(&self, service_id: &str, env_id: &str) -> bool;
}
