use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    App,
    Database,
    Cache,
    Worker,
    Scheduler,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::App => "app",
            ServiceType::Database => "database",
            ServiceType::Cache => "cache",
            ServiceType::Worker => "worker",
            ServiceType::Scheduler => "scheduler",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Service {
    pub name: String,
    pub platform_service_id: String,
    pub environment_id: String,
    pub service_type: ServiceType,
    pub stack: String,
    pub role: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub repo_branch: String,
    pub health_url: Option<String>,
    pub last_status: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DepType {
    Database,
    Cache,
    Queue,
    Api,
    Service,
}

impl DepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepType::Database => "database",
            DepType::Cache => "cache",
            DepType::Queue => "queue",
            DepType::Api => "api",
            DepType::Service => "service",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Dependency {
    pub service: String,
    pub depends_on: String,
    pub dep_type: DepType,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Variable {
    pub service: String,
    pub key: String,
    pub value: String,
    pub is_reference: bool,
    pub references_service: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileSnapshot {
    pub service: String,
    pub path: String,
    pub content: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommitRecord {
    pub service: String,
    pub sha: String,
    pub message: String,
    pub author: String,
    pub date: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeployRecord {
    pub service: String,
    pub deploy_id: String,
    pub status: String,
    pub created_at: String,
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProjectInfo {
    pub service: String,
    pub framework: String,
    pub language: String,
    pub has_tests: bool,
    pub has_migrations: bool,
    pub has_queue_workers: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Flag {
    pub service: String,
    pub flag_type: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionRecord {
    #[serde(rename = "type")]
    pub action_type: String,
    pub status: String,
    pub artifact: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Incident {
    pub incident_id: String,
    pub service: String,
    pub trigger: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub transcript: serde_json::Value,
    pub diagnosis: Option<String>,
    pub severity: Option<String>,
    pub actions: Vec<ActionRecord>,
    pub turns: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Event {
    pub event_type: String,
    pub service: Option<String>,
    pub message: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// The canonical aggregate handed to the Investigation Engine's initial
/// message, and returned by `GET /services/{name}`.
#[derive(Debug, Clone, Serialize)]
pub struct DeepContext {
    pub service: Service,
    pub outgoing_dependencies: Vec<Dependency>,
    pub incoming_dependencies: Vec<Dependency>,
    pub variables: Vec<Variable>,
    pub variable_issues: Vec<Variable>,
    pub project_info: Option<ProjectInfo>,
    pub key_files: Vec<FileSnapshot>,
    pub recent_commits: Vec<CommitRecord>,
    pub recent_deploys: Vec<DeployRecord>,
    pub recent_incidents: Vec<Incident>,
    pub flags: Vec<Flag>,
}
