pub mod model;

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;

pub use model::*;

/// Extracts the referenced service name from a value containing the
/// platform's interpolation syntax, e.g. `${{redis.REDIS_URL}}` -> `redis`.
fn reference_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\{([^.]+)\.").expect("static pattern is valid"))
}

fn sensitive_key_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)SECRET|PASSWORD|KEY|TOKEN").expect("static pattern is valid"))
}

pub fn is_sensitive_key(key: &str) -> bool {
    sensitive_key_regex().is_match(key)
}

/// Masks a secret value for display to the LLM: first/last 4 chars if long
/// enough to show anything meaningful, otherwise a flat `***`.
pub fn mask_value(value: &str) -> String {
    if value.len() > 8 {
        format!("{}...{}", &value[..4], &value[value.len() - 4..])
    } else {
        "***".to_string()
    }
}

fn classify_dep_type(key: &str) -> DepType {
    let lower = key.to_lowercase();
    if lower.contains("redis") || lower.contains("cache") {
        DepType::Cache
    } else if lower.contains("queue") || lower.contains("amqp") {
        DepType::Queue
    } else if lower.contains("url") && (lower.contains("api") || lower.contains("service")) {
        DepType::Api
    } else if lower.contains("db")
        || lower.contains("database")
        || lower.contains("postgres")
        || lower.contains("mysql")
    {
        DepType::Database
    } else {
        DepType::Service
    }
}

/// Per-service connection-host key names that should always be a reference,
/// never a literal value (§3 "Flag" — hardcoded_db).
const CONNECTION_HOST_KEYS: &[&str] = &["DATABASE_URL", "DB_HOST", "PGHOST", "REDIS_HOST", "REDIS_URL"];

/// Typed, concurrently-accessible store over every entity in the data model.
/// Each table is an independent `DashMap`; no write path spans more than one
/// table transactionally, so per-table lock striping is sufficient to give a
/// serializable view under concurrent scheduler + HTTP access.
pub struct KnowledgeStore {
    services: DashMap<String, Service>,
    dependencies: DashMap<String, Vec<Dependency>>,
    variables: DashMap<String, Vec<Variable>>,
    files: DashMap<String, Vec<FileSnapshot>>,
    commits: DashMap<String, Vec<CommitRecord>>,
    deploys: DashMap<String, Vec<DeployRecord>>,
    project_info: DashMap<String, ProjectInfo>,
    flags: DashMap<String, Vec<Flag>>,
    incidents: DashMap<String, Incident>,
    events: RwLock<Vec<Event>>,
    snapshot_path: RwLock<Option<String>>,
}

impl Default for KnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            dependencies: DashMap::new(),
            variables: DashMap::new(),
            files: DashMap::new(),
            commits: DashMap::new(),
            deploys: DashMap::new(),
            project_info: DashMap::new(),
            flags: DashMap::new(),
            incidents: DashMap::new(),
            events: RwLock::new(Vec::new()),
            snapshot_path: RwLock::new(None),
        }
    }

    // -- Services ----------------------------------------------------------

    pub fn upsert_service(&self, service: Service) {
        self.services.insert(service.name.clone(), service);
    }

    pub fn get_service(&self, name: &str) -> Option<Service> {
        self.services.get(name).map(|s| s.clone())
    }

    pub fn list_services(&self) -> Vec<Service> {
        let mut out: Vec<Service> = self.services.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    // -- Dependencies --------------------------------------------------------

    /// Replaces the full outgoing edge set for a service in one atomic write.
    pub fn set_dependencies(&self, service: &str, deps: Vec<Dependency>) {
        if deps.is_empty() {
            self.dependencies.remove(service);
        } else {
            self.dependencies.insert(service.to_string(), deps);
        }
    }

    pub fn clear_all_dependencies(&self) {
        self.dependencies.clear();
    }

    pub fn outgoing_dependencies(&self, service: &str) -> Vec<Dependency> {
        self.dependencies
            .get(service)
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    pub fn incoming_dependencies(&self, service: &str) -> Vec<Dependency> {
        self.dependencies
            .iter()
            .flat_map(|e| e.value().clone())
            .filter(|d| d.depends_on == service)
            .collect()
    }

    pub fn all_dependencies(&self) -> Vec<Dependency> {
        self.dependencies.iter().flat_map(|e| e.value().clone()).collect()
    }

    // -- Variables -----------------------------------------------------------

    /// Bulk-stores a service's variables, parsing the reference syntax as it
    /// goes. Returns the dependency edges implied by reference-valued
    /// variables so the caller (Discovery) can fold them into the edge set.
    pub fn store_variables(&self, service: &str, raw: &[(String, String)]) -> Vec<Dependency> {
        let mut rows = Vec::with_capacity(raw.len());
        let mut deps = Vec::new();

        for (key, value) in raw {
            let captured = reference_regex()
                .captures(value)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());

            if let Some(target) = &captured {
                deps.push(Dependency {
                    service: service.to_string(),
                    depends_on: target.clone(),
                    dep_type: classify_dep_type(key),
                });
            }

            rows.push(Variable {
                service: service.to_string(),
                key: key.clone(),
                value: value.clone(),
                is_reference: captured.is_some(),
                references_service: captured,
            });
        }

        self.variables.insert(service.to_string(), rows);
        deps
    }

    pub fn get_variables(&self, service: &str) -> Vec<Variable> {
        self.variables.get(service).map(|v| v.clone()).unwrap_or_default()
    }

    /// Heuristic: a variable whose key looks like a connection host but whose
    /// value is a literal containing a separator, not a reference.
    pub fn get_variable_issues(&self, service: &str) -> Vec<Variable> {
        self.get_variables(service)
            .into_iter()
            .filter(|v| {
                !v.is_reference
                    && CONNECTION_HOST_KEYS.iter().any(|k| v.key.eq_ignore_ascii_case(k))
                    && (v.value.contains('.') || v.value.contains(':'))
            })
            .collect()
    }

    // -- Files / commits / deploys / project info -----------------------------

    pub fn store_files(&self, service: &str, files: Vec<FileSnapshot>) {
        self.files.insert(service.to_string(), files);
    }

    pub fn list_files(&self, service: &str) -> Vec<FileSnapshot> {
        self.files.get(service).map(|f| f.clone()).unwrap_or_default()
    }

    pub fn get_file(&self, service: &str, path: &str) -> Option<FileSnapshot> {
        self.list_files(service).into_iter().find(|f| f.path == path)
    }

    pub fn store_commits(&self, service: &str, commits: Vec<CommitRecord>) {
        self.commits.insert(service.to_string(), commits);
    }

    pub fn list_commits(&self, service: &str, limit: usize) -> Vec<CommitRecord> {
        self.commits
            .get(service)
            .map(|c| c.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn store_deploys(&self, service: &str, deploys: Vec<DeployRecord>) {
        self.deploys.insert(service.to_string(), deploys);
    }

    pub fn list_deploys(&self, service: &str, limit: usize) -> Vec<DeployRecord> {
        self.deploys
            .get(service)
            .map(|d| d.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn store_project_info(&self, info: ProjectInfo) {
        self.project_info.insert(info.service.clone(), info);
    }

    pub fn get_project_info(&self, service: &str) -> Option<ProjectInfo> {
        self.project_info.get(service).map(|p| p.clone())
    }

    // -- Flags -----------------------------------------------------------------

    pub fn add_flag(&self, flag: Flag) {
        self.flags.entry(flag.service.clone()).or_default().push(flag);
    }

    pub fn list_flags(&self, service: Option<&str>) -> Vec<Flag> {
        match service {
            Some(name) => self.flags.get(name).map(|f| f.clone()).unwrap_or_default(),
            None => self.flags.iter().flat_map(|e| e.value().clone()).collect(),
        }
    }

    pub fn clear_flags(&self, service: Option<&str>) {
        match service {
            Some(name) => {
                self.flags.remove(name);
            }
            None => self.flags.clear(),
        }
    }

    // -- Incidents ---------------------------------------------------------------

    pub fn save_incident(&self, incident: Incident) {
        self.incidents.insert(incident.incident_id.clone(), incident);
    }

    pub fn get_incident(&self, id: &str) -> Option<Incident> {
        self.incidents.get(id).map(|i| i.clone())
    }

    pub fn list_recent_incidents(&self, service: Option<&str>, limit: usize) -> Vec<Incident> {
        let mut out: Vec<Incident> = self
            .incidents
            .iter()
            .map(|e| e.value().clone())
            .filter(|i| service.map(|s| i.service == s).unwrap_or(true))
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out.truncate(limit);
        out
    }

    // -- Event log -----------------------------------------------------------------

    pub fn append_event(&self, event: Event) {
        self.events.write().push(event);
    }

    pub fn list_events(&self, limit: usize) -> Vec<Event> {
        let events = self.events.read();
        events.iter().rev().take(limit).cloned().collect()
    }

    // -- Aggregate -----------------------------------------------------------------

    pub fn get_deep_context(&self, service_name: &str) -> Option<DeepContext> {
        let service = self.get_service(service_name)?;
        Some(DeepContext {
            outgoing_dependencies: self.outgoing_dependencies(service_name),
            incoming_dependencies: self.incoming_dependencies(service_name),
            variables: self.get_variables(service_name),
            variable_issues: self.get_variable_issues(service_name),
            project_info: self.get_project_info(service_name),
            key_files: self.list_files(service_name),
            recent_commits: self.list_commits(service_name, 5),
            recent_deploys: self.list_deploys(service_name, 3),
            recent_incidents: self.list_recent_incidents(Some(service_name), 3),
            flags: self.list_flags(Some(service_name)),
            service,
        })
    }

    // -- Snapshot persistence -----------------------------------------------------

    /// Loads a previously-written JSON snapshot, if one exists at `path`.
    /// Missing file is not an error — the store simply starts empty.
    pub fn load_snapshot(&self, path: &str) -> anyhow::Result<()> {
        *self.snapshot_path.write() = Some(path.to_string());

        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot = serde_json::from_str(&contents)?;
        for s in snapshot.services {
            self.services.insert(s.name.clone(), s);
        }
        for (k, v) in snapshot.dependencies {
            self.dependencies.insert(k, v);
        }
        for (k, v) in snapshot.variables {
            self.variables.insert(k, v);
        }
        for (k, v) in snapshot.files {
            self.files.insert(k, v);
        }
        for (k, v) in snapshot.commits {
            self.commits.insert(k, v);
        }
        for (k, v) in snapshot.deploys {
            self.deploys.insert(k, v);
        }
        for p in snapshot.project_info {
            self.project_info.insert(p.service.clone(), p);
        }
        for (k, v) in snapshot.flags {
            self.flags.insert(k, v);
        }
        for i in snapshot.incidents {
            self.incidents.insert(i.incident_id.clone(), i);
        }
        *self.events.write() = snapshot.events;

        Ok(())
    }

    /// Writes the full store out as one JSON file. Called periodically and on
    /// shutdown; never on the per-request hot path.
    pub fn save_snapshot(&self) -> anyhow::Result<()> {
        let Some(path) = self.snapshot_path.read().clone() else {
            return Ok(());
        };

        let snapshot = Snapshot {
            services: self.list_services(),
            dependencies: self
                .dependencies
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            variables: self
                .variables
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            files: self.files.iter().map(|e| (e.key().clone(), e.value().clone())).collect(),
            commits: self
                .commits
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            deploys: self
                .deploys
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            project_info: self.project_info.iter().map(|e| e.value().clone()).collect(),
            flags: self.flags.iter().map(|e| (e.key().clone(), e.value().clone())).collect(),
            incidents: self.incidents.iter().map(|e| e.value().clone()).collect(),
            events: self.events.read().clone(),
        };

        if let Some(parent) = std::path::Path::new(&path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(&path, json)?;
        Ok(())
    }
}

#[derive(serde::Deserialize, serde::Serialize)]
struct Snapshot {
    services: Vec<Service>,
    dependencies: std::collections::HashMap<String, Vec<Dependency>>,
    variables: std::collections::HashMap<String, Vec<Variable>>,
    files: std::collections::HashMap<String, Vec<FileSnapshot>>,
    commits: std::collections::HashMap<String, Vec<CommitRecord>>,
    deploys: std::collections::HashMap<String, Vec<DeployRecord>>,
    project_info: Vec<ProjectInfo>,
    flags: std::collections::HashMap<String, Vec<Flag>>,
    incidents: Vec<Incident>,
    events: Vec<Event>,
}

pub type SharedStore = Arc<KnowledgeStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_service(name: &str) -> Service {
        Service {
            name: name.to_string(),
            platform_service_id: format!("svc_{name}"),
            environment_id: "env_1".to_string(),
            service_type: ServiceType::App,
            stack: "node".to_string(),
            role: "app".to_string(),
            repo_owner: "acme".to_string(),
            repo_name: name.to_string(),
            repo_branch: "main".to_string(),
            health_url: None,
            last_status: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_then_get_returns_last_written() {
        let store = KnowledgeStore::new();
        store.upsert_service(sample_service("api-a"));
        let mut updated = sample_service("api-a");
        updated.last_status = Some("healthy".to_string());
        store.upsert_service(updated);

        let got = store.get_service("api-a").unwrap();
        assert_eq!(got.last_status, Some("healthy".to_string()));
        assert_eq!(store.list_services().len(), 1);
    }

    #[test]
    fn reference_syntax_detection_sets_references_service() {
        let store = KnowledgeStore::new();
        let deps = store.store_variables(
            "web-a",
            &[("QUEUE_URL".to_string(), "${{redis-old.REDIS_URL}}".to_string())],
        );
        let vars = store.get_variables("web-a");
        assert!(vars[0].is_reference);
        assert_eq!(vars[0].references_service.as_deref(), Some("redis-old"));
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].depends_on, "redis-old");
    }

    #[test]
    fn hardcoded_host_flagged_as_variable_issue() {
        let store = KnowledgeStore::new();
        store.store_variables("web-a", &[("DB_HOST".to_string(), "db.internal:5432".to_string())]);
        let issues = store.get_variable_issues("web-a");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].key, "DB_HOST");
    }

    #[test]
    fn clear_flags_empties_scope() {
        let store = KnowledgeStore::new();
        store.add_flag(Flag {
            service: "web-a".to_string(),
            flag_type: "hardcoded_db".to_string(),
            message: "test".to_string(),
            created_at: Utc::now(),
        });
        assert_eq!(store.list_flags(Some("web-a")).len(), 1);
        store.clear_flags(Some("web-a"));
        assert!(store.list_flags(Some("web-a")).is_empty());
    }

    #[test]
    fn save_incident_idempotent_by_id() {
        let store = KnowledgeStore::new();
        let incident = Incident {
            incident_id: "inc_1".to_string(),
            service: "web-a".to_string(),
            trigger: "manual".to_string(),
            started_at: Utc::now(),
            finished_at: None,
            transcript: serde_json::json!([]),
            diagnosis: None,
            severity: None,
            actions: vec![],
            turns: 0,
        };
        store.save_incident(incident.clone());
        store.save_incident(incident.clone());
        assert_eq!(store.list_recent_incidents(Some("web-a"), 10).len(), 1);
        assert_eq!(store.get_incident("inc_1").unwrap().service, "web-a");
    }

    #[test]
    fn mask_value_never_exposes_a_run_of_5() {
        let raw = "sk-super-secret-0123456789abcdef";
        let masked = mask_value(raw);
        let bytes = raw.as_bytes();
        for window in bytes.windows(5) {
            let chunk = std::str::from_utf8(window).unwrap();
            assert!(!masked.contains(chunk), "masked value leaked run: {chunk}");
        }
    }

    #[test]
    fn short_value_is_fully_masked() {
        assert_eq!(mask_value("abc"), "***");
    }
}
