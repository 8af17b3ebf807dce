use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{PlatformAdapter, RawDeploy, RawService};

const GRAPHQL_ENDPOINT: &str = "https://backboard.railway.app/graphql/v2";

/// Live GraphQL-backed platform adapter. Every public method swallows
/// transport/GraphQL errors, logs them, and returns the zero value for its
/// return type — callers never see a transport failure as an `Err`.
pub struct LivePlatformAdapter {
    http: reqwest::Client,
    token: String,
}

impl LivePlatformAdapter {
    pub fn new(token: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client configuration is valid");
        Self { http, token }
    }

    async fn graphql(&self, query: &str, variables: Value) -> Option<Value> {
        let resp = self
            .http
            .post(GRAPHQL_ENDPOINT)
            .bearer_auth(&self.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("platform adapter transport error: {e}");
                return None;
            }
        };

        if !resp.status().is_success() {
            tracing::error!("platform adapter returned status {}", resp.status());
            return None;
        }

        match resp.json::<Value>().await {
            Ok(body) => {
                if let Some(errors) = body.get("errors") {
                    tracing::error!("platform adapter GraphQL errors: {errors}");
                    return None;
                }
                body.get("data").cloned()
            }
            Err(e) => {
                tracing::error!("platform adapter decode error: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl PlatformAdapter for LivePlatformAdapter {
    async fn get_services(&self, project_id: &str) -> Vec<RawService> {
        let query = r#"
            query ProjectServices($id: String!) {
                project(id: $id) {
                    services {
                        edges {
                            node {
                                id
                                name
                                source { repo }
                                serviceInstances {
                                    edges {
                                        node {
                                            domains { serviceDomains { domain } }
                                            startCommand
                                            buildCommand
                                            healthcheckPath
                                            numReplicas
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        "#;

        let Some(data) = self.graphql(query, json!({ "id": project_id })).await else {
            return Vec::new();
        };

        let edges = data
            .pointer("/project/services/edges")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        edges
            .iter()
            .filter_map(|edge| {
                let node = edge.get("node")?;
                let name = node.get("name")?.as_str()?.to_string();
                let id = node.get("id")?.as_str()?.to_string();
                let repo = node
                    .pointer("/source/repo")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let (repo_owner, repo_name) = split_repo(repo);

                let instance = node
                    .pointer("/serviceInstances/edges/0/node")
                    .cloned()
                    .unwrap_or(Value::Null);

                let domains = instance
                    .pointer("/domains/serviceDomains")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|d| d.get("domain").and_then(|v| v.as_str()).map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();

                Some(RawService {
                    name,
                    id,
                    repo_owner,
                    repo_name,
                    // Railway's GraphQL `source` field carries no branch; left empty so
                    // Discovery falls back to the code host's default-branch lookup.
                    repo_branch: String::new(),
                    domains,
                    start_command: instance
                        .get("startCommand")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    build_command: instance
                        .get("buildCommand")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    health_check_path: instance
                        .get("healthcheckPath")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    replica_count: instance.get("numReplicas").and_then(|v| v.as_u64()).unwrap_or(1) as u32,
                })
            })
            .collect()
    }

    async fn get_variables(&self, service_id: &str, env_id: &str) -> HashMap<String, String> {
        let query = r#"
            query Variables($serviceId: String!, $environmentId: String!) {
                variables(serviceId: $serviceId, environmentId: $environmentId)
            }
        "#;

        let Some(data) = self
            .graphql(query, json!({ "serviceId": service_id, "environmentId": env_id }))
            .await
        else {
            return HashMap::new();
        };

        data.get("variables")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn get_recent_deploys(&self, service_id: &str, env_id: &str, limit: usize) -> Vec<RawDeploy> {
        let query = r#"
            query Deployments($serviceId: String!, $environmentId: String!, $limit: Int!) {
                deployments(input: { serviceId: $serviceId, environmentId: $environmentId }, first: $limit) {
                    edges { node { id status createdAt meta } }
                }
            }
        "#;

        let Some(data) = self
            .graphql(
                query,
                json!({ "serviceId": service_id, "environmentId": env_id, "limit": limit }),
            )
            .await
        else {
            return Vec::new();
        };

        data.pointer("/deployments/edges")
            .and_then(|v| v.as_array())
            .map(|edges| {
                edges
                    .iter()
                    .filter_map(|e| {
                        let node = e.get("node")?;
                        Some(RawDeploy {
                            id: node.get("id")?.as_str()?.to_string(),
                            status: node.get("status")?.as_str()?.to_string(),
                            created_at: node.get("createdAt")?.as_str()?.to_string(),
                            meta: node.get("meta").cloned().unwrap_or(Value::Null),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn get_service_logs(&self, service_id: &str, env_id: &str) -> String {
        // Two-step per the upstream API: find the latest deployment, then
        // fetch its log tail.
        let latest_query = r#"
            query LatestDeploy($serviceId: String!, $environmentId: String!) {
                deployments(input: { serviceId: $serviceId, environmentId: $environmentId }, first: 1) {
                    edges { node { id } }
                }
            }
        "#;

        let Some(data) = self
            .graphql(latest_query, json!({ "serviceId": service_id, "environmentId": env_id }))
            .await
        else {
            return "No logs available.".to_string();
        };

        let Some(deploy_id) = data
            .pointer("/deployments/edges/0/node/id")
            .and_then(|v| v.as_str())
        else {
            return "No logs available.".to_string();
        };

        let logs_query = r#"
            query DeploymentLogs($deploymentId: String!) {
                deploymentLogs(deploymentId: $deploymentId, limit: 500) { severity message }
            }
        "#;

        let Some(data) = self.graphql(logs_query, json!({ "deploymentId": deploy_id })).await else {
            return "No logs available.".to_string();
        };

        let lines: Vec<String> = data
            .get("deploymentLogs")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|l| {
                        let severity = l.get("severity")?.as_str()?;
                        let message = l.get("message")?.as_str()?;
                        Some(format!("[{severity}] {message}"))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if lines.is_empty() {
            "No logs available.".to_string()
        } else {
            lines.join("\n")
        }
    }

    async fn check_health(&self, _service_name: &str, health_url: Option<&str>) -> bool {
        let Some(url) = health_url else {
            return true;
        };
        if url.is_empty() {
            return true;
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client configuration is valid");

        match client.get(url).send().await {
            Ok(resp) => (resp.status().as_u16() as u32) < 500,
            Err(e) => {
                tracing::warn!("health check transport error for {url}: {e}");
                false
            }
        }
    }

    async fn restart(&self, service_id: &str, env_id: &str) -> bool {
        let mutation = r#"
            mutation Redeploy($serviceId: String!, $environmentId: String!) {
                serviceInstanceRedeploy(serviceId: $serviceId, environmentId: $environmentId)
            }
        "#;
        self.graphql(mutation, json!({ "serviceId": service_id, "environmentId": env_id }))
            .await
            .is_some()
    }

    async fn set_variable(&self, service_id: &str, env_id: &str, key: &str, value: &str) -> bool {
        let mutation = r#"
            mutation SetVariable($input: VariableCollectionUpsertInput!) {
                variableCollectionUpsert(input: $input)
            }
        "#;
        let mut variables = serde_json::Map::new();
        variables.insert(key.to_string(), json!(value));

        self.graphql(
            mutation,
            json!({
                "input": {
                    "serviceId": service_id,
                    "environmentId": env_id,
                    "variables": Value::Object(variables),
                }
            }),
        )
        .await
        .is_some()
    }

    async fn rollback(&self, service_id: &str, env_id: &str) -> bool {
        let deploys = self.get_recent_deploys(service_id, env_id, 20).await;
        // Skip the current (first/most recent) deploy; find the first
        // successful one among the rest.
        let target = deploys
            .iter()
            .skip(1)
            .find(|d| d.status.eq_ignore_ascii_case("success"));

        let Some(target) = target else {
            return false;
        };

        let mutation = r#"
            mutation Rollback($deploymentId: String!) {
                deploymentRollback(id: $deploymentId)
            }
        "#;
        self.graphql(mutation, json!({ "deploymentId": target.id }))
            .await
            .is_some()
    }
}

fn split_repo(repo: &str) -> (String, String) {
    match repo.split_once('/') {
        Some((owner, name)) => (owner.to_string(), name.to_string()),
        None => (String::new(), repo.to_string()),
    }
}
