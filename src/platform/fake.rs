use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{PlatformAdapter, RawDeploy, RawService};

#[derive(Default)]
struct Inner {
    services: Vec<RawService>,
    variables: HashMap<String, HashMap<String, String>>,
    deploys: HashMap<String, Vec<RawDeploy>>,
    logs: HashMap<String, String>,
    health: HashMap<String, bool>,
    restarted: Vec<String>,
    set_variables: Vec<(String, String, String)>,
    rolled_back: Vec<String>,
}

/// In-memory stand-in for the platform, seeded by tests via the `add_*`
/// builder methods. Mirrors the live adapter's never-raises contract exactly.
pub struct FakePlatformAdapter {
    inner: Mutex<Inner>,
}

impl Default for FakePlatformAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePlatformAdapter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn add_service(&self, service: RawService) -> &Self {
        self.inner.lock().unwrap().services.push(service);
        self
    }

    pub fn add_variables(&self, service_id: &str, vars: HashMap<String, String>) -> &Self {
        self.inner.lock().unwrap().variables.insert(service_id.to_string(), vars);
        self
    }

    pub fn add_deploys(&self, service_id: &str, deploys: Vec<RawDeploy>) -> &Self {
        self.inner.lock().unwrap().deploys.insert(service_id.to_string(), deploys);
        self
    }

    pub fn set_logs(&self, service_name: &str, logs: &str) -> &Self {
        self.inner
            .lock()
            .unwrap()
            .logs
            .insert(service_name.to_string(), logs.to_string());
        self
    }

    pub fn set_health(&self, service_name: &str, healthy: bool) -> &Self {
        self.inner
            .lock()
            .unwrap()
            .health
            .insert(service_name.to_string(), healthy);
        self
    }

    pub fn restart_calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().restarted.clone()
    }

    pub fn set_variable_calls(&self) -> Vec<(String, String, String)> {
        self.inner.lock().unwrap().set_variables.clone()
    }

    pub fn rollback_calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().rolled_back.clone()
    }
}

#[async_trait]
impl PlatformAdapter for FakePlatformAdapter {
    async fn get_services(&self, _project_id: &str) -> Vec<RawService> {
        self.inner.lock().unwrap().services.clone()
    }

    async fn get_variables(&self, service_id: &str, _env_id: &str) -> HashMap<String, String> {
        self.inner
            .lock()
            .unwrap()
            .variables
            .get(service_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn get_recent_deploys(&self, service_id: &str, _env_id: &str, limit: usize) -> Vec<RawDeploy> {
        self.inner
            .lock()
            .unwrap()
            .deploys
            .get(service_id)
            .map(|d| d.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    async fn get_service_logs(&self, service_id: &str, _env_id: &str) -> String {
        self.inner
            .lock()
            .unwrap()
            .logs
            .get(service_id)
            .cloned()
            .unwrap_or_else(|| "No logs available.".to_string())
    }

    async fn check_health(&self, service_name: &str, health_url: Option<&str>) -> bool {
        if health_url.is_none_or_empty() {
            return true;
        }
        self.inner
            .lock()
            .unwrap()
            .health
            .get(service_name)
            .copied()
            .unwrap_or(true)
    }

    async fn restart(&self, service_id: &str, _env_id: &str) -> bool {
        self.inner.lock().unwrap().restarted.push(service_id.to_string());
        true
    }

    async fn set_variable(&self, service_id: &str, _env_id: &str, key: &str, value: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .set_variables
            .push((service_id.to_string(), key.to_string(), value.to_string()));
        true
    }

    async fn rollback(&self, service_id: &str, _env_id: &str) -> bool {
        self.inner.lock().unwrap().rolled_back.push(service_id.to_string());
        true
    }
}

trait OptionStrExt {
    fn is_none_or_empty(&self) -> bool;
}

impl OptionStrExt for Option<&str> {
    fn is_none_or_empty(&self) -> bool {
        match self {
            None => true,
            Some(s) => s.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_check_with_no_url_is_true() {
        let fake = FakePlatformAdapter::new();
        assert!(fake.check_health("web-a", None).await);
    }

    #[tokio::test]
    async fn restart_is_recorded() {
        let fake = FakePlatformAdapter::new();
        assert!(fake.restart("svc_web_a", "env_1").await);
        assert_eq!(fake.restart_calls(), vec!["svc_web_a".to_string()]);
    }
}
