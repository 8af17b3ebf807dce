use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct ActionSpec {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub details: Value,
}

/// Closed tagged enum over every tool the Investigation Engine exposes to
/// the model. Parsed from a `tool_use` block's `name`/`input`, dispatched
/// through one exhaustive match in `InvestigationEngine::execute_tool`.
#[derive(Debug, Clone)]
pub enum Tool {
    GetLogs { service: String },
    GetVariables { service: String },
    GetFile { service: String, path: String },
    GetDeploys { service: String },
    GetCommits { service: String, limit: usize },
    CheckHealth { service: String },
    GetDependencyStatus { service: String },
    DiagnoseComplete { diagnosis: String, severity: String, actions: Vec<ActionSpec> },
}

#[derive(Debug, Deserialize)]
struct GetLogsInput {
    service: String,
}

#[derive(Debug, Deserialize)]
struct GetFileInput {
    service: String,
    path: String,
}

#[derive(Debug, Deserialize)]
struct GetCommitsInput {
    service: String,
    #[serde(default = "default_commit_limit")]
    limit: usize,
}

fn default_commit_limit() -> usize {
    10
}

#[derive(Debug, Deserialize)]
struct DiagnoseCompleteInput {
    diagnosis: String,
    #[serde(default = "default_severity")]
    severity: String,
    #[serde(default)]
    actions: Vec<ActionSpec>,
}

fn default_severity() -> String {
    "medium".to_string()
}

impl Tool {
    pub fn parse(name: &str, input: &Value) -> Option<Tool> {
        match name {
            "get_logs" => {
                let i: GetLogsInput = serde_json::from_value(input.clone()).ok()?;
                Some(Tool::GetLogs { service: i.service })
            }
            "get_variables" => {
                let i: GetLogsInput = serde_json::from_value(input.clone()).ok()?;
                Some(Tool::GetVariables { service: i.service })
            }
            "get_file" => {
                let i: GetFileInput = serde_json::from_value(input.clone()).ok()?;
                Some(Tool::GetFile { service: i.service, path: i.path })
            }
            "get_deploys" => {
                let i: GetLogsInput = serde_json::from_value(input.clone()).ok()?;
                Some(Tool::GetDeploys { service: i.service })
            }
            "get_commits" => {
                let i: GetCommitsInput = serde_json::from_value(input.clone()).ok()?;
                Some(Tool::GetCommits { service: i.service, limit: i.limit })
            }
            "check_health" => {
                let i: GetLogsInput = serde_json::from_value(input.clone()).ok()?;
                Some(Tool::CheckHealth { service: i.service })
            }
            "get_dependency_status" => {
                let i: GetLogsInput = serde_json::from_value(input.clone()).ok()?;
                Some(Tool::GetDependencyStatus { service: i.service })
            }
            "diagnose_complete" => {
                let i: DiagnoseCompleteInput = serde_json::from_value(input.clone()).ok()?;
                Some(Tool::DiagnoseComplete {
                    diagnosis: i.diagnosis,
                    severity: i.severity,
                    actions: i.actions,
                })
            }
            _ => None,
        }
    }
}

/// The tool schema block sent to the model on every turn.
pub fn tool_schemas() -> Vec<Value> {
    vec![
        serde_json::json!({
            "name": "get_logs",
            "description": "Get the last deploy's log tail for a service.",
            "input_schema": { "type": "object", "properties": { "service": { "type": "string" } }, "required": ["service"] }
        }),
        serde_json::json!({
            "name": "get_variables",
            "description": "Get a service's environment variables, with sensitive values masked.",
            "input_schema": { "type": "object", "properties": { "service": { "type": "string" } }, "required": ["service"] }
        }),
        serde_json::json!({
            "name": "get_file",
            "description": "Get the content of a key configuration file for a service.",
            "input_schema": { "type": "object", "properties": { "service": { "type": "string" }, "path": { "type": "string" } }, "required": ["service", "path"] }
        }),
        serde_json::json!({
            "name": "get_deploys",
            "description": "Get recent deploy history for a service.",
            "input_schema": { "type": "object", "properties": { "service": { "type": "string" } }, "required": ["service"] }
        }),
        serde_json::json!({
            "name": "get_commits",
            "description": "Get recent commits for a service's repo.",
            "input_schema": { "type": "object", "properties": { "service": { "type": "string" }, "limit": { "type": "integer" } }, "required": ["service"] }
        }),
        serde_json::json!({
            "name": "check_health",
            "description": "Check whether a service currently reports healthy.",
            "input_schema": { "type": "object", "properties": { "service": { "type": "string" } }, "required": ["service"] }
        }),
        serde_json::json!({
            "name": "get_dependency_status",
            "description": "Get the health status of every service this service depends on.",
            "input_schema": { "type": "object", "properties": { "service": { "type": "string" } }, "required": ["service"] }
        }),
        serde_json::json!({
            "name": "diagnose_complete",
            "description": "Terminate the investigation with a final diagnosis, severity, and recommended actions.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "diagnosis": { "type": "string" },
                    "severity": { "type": "string", "enum": ["critical", "high", "medium", "low"] },
                    "actions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "type": { "type": "string", "enum": ["restart", "set_variable", "rollback", "propose_fix", "notify_only"] },
                                "details": { "type": "object" }
                            },
                            "required": ["type"]
                        }
                    }
                },
                "required": ["diagnosis", "severity", "actions"]
            }
        }),
    ]
}
