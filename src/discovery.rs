//! The three-phase discovery pipeline: platform inventory, code inspection,
//! cross-validation. Run synchronously, in order, by the scheduler's
//! rediscovery loop or the `POST /discover` handler.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;

use crate::codehost::CodeHostAdapter;
use crate::platform::PlatformAdapter;
use crate::store::{Dependency, Flag, KnowledgeStore, ProjectInfo, Service, ServiceType};

const KEY_FILE_CANDIDATES: &[&str] = &[
    "Dockerfile",
    "docker-compose.yml",
    "config/database.php",
    "config/queue.php",
    "config/cache.php",
    "package.json",
    "composer.json",
    "requirements.txt",
    "manage.py",
    "artisan",
    "next.config.js",
    "nuxt.config.js",
    ".env.example",
    "routes/web.php",
    "routes/api.php",
    "README.md",
    "settings.py",
    "wsgi.py",
    "server.js",
    "index.js",
];

const CROSS_VALIDATION_EXEMPT_KEYS: &[&str] = &[
    "PORT",
    "RAILWAY_PUBLIC_DOMAIN",
    "RAILWAY_PRIVATE_DOMAIN",
    "RAILWAY_ENVIRONMENT_ID",
];

pub struct DiscoveryPipeline {
    store: Arc<KnowledgeStore>,
    platform: Arc<dyn PlatformAdapter>,
    codehost: Arc<dyn CodeHostAdapter>,
    project_id: String,
    environment_id: String,
    codehost_token_present: bool,
}

impl DiscoveryPipeline {
    pub fn new(
        store: Arc<KnowledgeStore>,
        platform: Arc<dyn PlatformAdapter>,
        codehost: Arc<dyn CodeHostAdapter>,
        project_id: String,
        environment_id: String,
        codehost_token_present: bool,
    ) -> Self {
        Self {
            store,
            platform,
            codehost,
            project_id,
            environment_id,
            codehost_token_present,
        }
    }

    pub async fn run(&self) {
        tracing::info!("discovery: starting run");
        self.phase1_platform_inventory().await;
        if self.codehost_token_present {
            self.phase2_code_inspection().await;
        } else {
            tracing::warn!("discovery: no code host token configured, skipping phase 2");
        }
        self.phase3_cross_validation();
        tracing::info!("discovery: run complete");
    }

    async fn phase1_platform_inventory(&self) {
        let raw_services = self.platform.get_services(&self.project_id).await;

        for raw in &raw_services {
            let service_type = classify_type(&raw.name);
            let stack = classify_stack(&raw.name, &raw.start_command, &raw.build_command);
            let role = classify_role(service_type, &raw.name);
            let health_url = raw.domains.first().map(|d| format!("https://{d}/health"));

            self.store.upsert_service(Service {
                name: raw.name.clone(),
                platform_service_id: raw.id.clone(),
                environment_id: self.environment_id.clone(),
                service_type,
                stack,
                role,
                repo_owner: raw.repo_owner.clone(),
                repo_name: raw.repo_name.clone(),
                // Resolved against the code host's default branch in phase 2 if
                // the platform didn't report one (Railway's GraphQL never does).
                repo_branch: raw.repo_branch.clone(),
                health_url,
                last_status: None,
                updated_at: Utc::now(),
            });

            let vars = self.platform.get_variables(&raw.id, &self.environment_id).await;
            let mut pairs: Vec<(String, String)> = vars.into_iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0));

            let deps = self.store.store_variables(&raw.name, &pairs);
            self.store.set_dependencies(&raw.name, deps);

            for (key, value) in &pairs {
                if looks_like_connection_host(key) && !value.contains("${{") && (value.contains('.') || value.contains(':')) {
                    self.store.add_flag(Flag {
                        service: raw.name.clone(),
                        flag_type: "hardcoded_db".to_string(),
                        message: format!("{key} is a literal host/port value, not a platform reference"),
                        created_at: Utc::now(),
                    });
                }
            }

            let deploys = self
                .platform
                .get_recent_deploys(&raw.id, &self.environment_id, 10)
                .await;
            let records = deploys
                .into_iter()
                .map(|d| crate::store::DeployRecord {
                    service: raw.name.clone(),
                    deploy_id: d.id,
                    status: d.status,
                    created_at: d.created_at,
                    meta: d.meta,
                })
                .collect();
            self.store.store_deploys(&raw.name, records);
        }
    }

    async fn phase2_code_inspection(&self) {
        let services = self.store.list_services();
        let mut by_repo: HashMap<(String, String), Vec<Service>> = HashMap::new();
        for svc in services {
            if svc.repo_owner.is_empty() || svc.repo_name.is_empty() {
                continue;
            }
            by_repo
                .entry((svc.repo_owner.clone(), svc.repo_name.clone()))
                .or_default()
                .push(svc);
        }

        for ((owner, repo), services) in by_repo {
            // Resolve the real branch the way the original discovers it: the
            // service's own configured branch if set, otherwise the repo's
            // default branch from a live metadata lookup. If that lookup fails
            // the repo is unreachable entirely, so skip it rather than guess
            // "main" and silently fetch against the wrong ref.
            let configured_branch = services.iter().find(|s| !s.repo_branch.is_empty()).map(|s| s.repo_branch.clone());
            let branch = match configured_branch {
                Some(branch) => branch,
                None => match self.codehost.get_repo_metadata(&owner, &repo).await {
                    Some(meta) => meta.default_branch,
                    None => {
                        tracing::warn!(owner, repo, "discovery: could not resolve default branch, skipping repo");
                        continue;
                    }
                },
            };

            for svc in &services {
                if svc.repo_branch != branch {
                    let mut updated = svc.clone();
                    updated.repo_branch = branch.clone();
                    self.store.upsert_service(updated);
                }
            }

            let tree = self.codehost.get_file_tree(&owner, &repo, &branch).await;
            let commits = self.codehost.get_recent_commits(&owner, &repo, &branch, 10).await;
            let info = analyze_tree(&tree);

            let key_files: Vec<&str> = KEY_FILE_CANDIDATES
                .iter()
                .filter(|candidate| tree.iter().any(|path| path == *candidate))
                .take(20)
                .copied()
                .collect();

            for svc in &services {
                self.store.store_commits(&svc.name, commits.iter().cloned().map(|mut c| {
                    c.service = svc.name.clone();
                    c
                }).collect());

                let mut fetched = Vec::new();
                for path in &key_files {
                    if let Some(content) = self.codehost.get_file_content(&owner, &repo, path, &branch).await {
                        fetched.push(crate::store::FileSnapshot {
                            service: svc.name.clone(),
                            path: path.to_string(),
                            content,
                            fetched_at: Utc::now(),
                        });
                    }
                }
                self.store.store_files(&svc.name, fetched);

                let mut svc_info = info.clone();
                svc_info.service = svc.name.clone();
                self.store.store_project_info(svc_info);
            }
        }
    }

    fn phase3_cross_validation(&self) {
        self.store.clear_flags(None);

        let services = self.store.list_services();
        let known: HashSet<String> = services.iter().map(|s| s.name.clone()).collect();

        for svc in &services {
            for dep in self.store.outgoing_dependencies(&svc.name) {
                if !known.contains(&dep.depends_on) {
                    self.store.add_flag(Flag {
                        service: svc.name.clone(),
                        flag_type: "missing_dependency".to_string(),
                        message: format!("depends on unknown service '{}'", dep.depends_on),
                        created_at: Utc::now(),
                    });
                }
            }

            check_expected_variables(&self.store, svc);

            if svc.service_type == ServiceType::App {
                let has_db_var = self
                    .store
                    .get_variables(&svc.name)
                    .iter()
                    .any(|v| {
                    let key = v.key.to_uppercase();
                    key.contains("DATABASE") || key.contains("DB_") || key.contains("PG")
                });
                if !has_db_var {
                    self.store.add_flag(Flag {
                        service: svc.name.clone(),
                        flag_type: "no_database_config".to_string(),
                        message: "app service has no database-looking variables".to_string(),
                        created_at: Utc::now(),
                    });
                }
            }
        }

        self.cross_validate_variables(&services);
    }

    fn cross_validate_variables(&self, services: &[Service]) {
        let mut by_key: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for svc in services {
            for var in self.store.get_variables(&svc.name) {
                if CROSS_VALIDATION_EXEMPT_KEYS.contains(&var.key.as_str()) {
                    continue;
                }
                by_key
                    .entry(var.key.clone())
                    .or_default()
                    .push((svc.name.clone(), var.value.clone()));
            }
        }

        for (key, occurrences) in by_key {
            if occurrences.len() <= 1 {
                continue;
            }
            let distinct: HashSet<&String> = occurrences.iter().map(|(_, v)| v).collect();
            if distinct.len() <= 1 {
                continue;
            }
            for (service_name, _) in &occurrences {
                let others: Vec<&str> = occurrences
                    .iter()
                    .filter(|(n, _)| n != service_name)
                    .map(|(n, _)| n.as_str())
                    .collect();
                self.store.add_flag(Flag {
                    service: service_name.clone(),
                    flag_type: "inconsistent_variable".to_string(),
                    message: format!("{key} differs from {}", others.join(", ")),
                    created_at: Utc::now(),
                });
            }
        }
    }
}

fn looks_like_connection_host(key: &str) -> bool {
    let upper = key.to_uppercase();
    ["DATABASE", "DB_HOST", "PGHOST", "REDIS_HOST"].iter().any(|k| upper.contains(k))
}

fn classify_type(name: &str) -> ServiceType {
    let n = name.to_lowercase();
    if ["postgres", "mysql", "mongo", "mariadb", "cockroach"].iter().any(|k| n.contains(k)) {
        ServiceType::Database
    } else if ["redis", "cache", "valkey", "memcached"].iter().any(|k| n.contains(k)) {
        ServiceType::Cache
    } else if ["worker", "horizon", "queue", "celery"].iter().any(|k| n.contains(k)) {
        ServiceType::Worker
    } else if ["cron", "scheduler"].iter().any(|k| n.contains(k)) {
        ServiceType::Scheduler
    } else {
        ServiceType::App
    }
}

/// Ordering matters: laravel before node before python before postgres
/// before redis.
fn classify_stack(name: &str, start_cmd: &str, build_cmd: &str) -> String {
    let haystack = format!("{name} {start_cmd} {build_cmd}").to_lowercase();
    if haystack.contains("artisan") || haystack.contains("laravel") {
        "laravel".to_string()
    } else if haystack.contains("next") {
        "nextjs".to_string()
    } else if haystack.contains("nuxt") {
        "nuxt".to_string()
    } else if haystack.contains("node") || haystack.contains("npm") || haystack.contains("yarn") {
        "node".to_string()
    } else if haystack.contains("django") || haystack.contains("manage.py") {
        "django".to_string()
    } else if haystack.contains("python") || haystack.contains("pip") {
        "python".to_string()
    } else if haystack.contains("postgres") {
        "postgres".to_string()
    } else if haystack.contains("redis") {
        "redis".to_string()
    } else {
        "unknown".to_string()
    }
}

fn classify_role(service_type: ServiceType, name: &str) -> String {
    match service_type {
        ServiceType::Database => "primary-datastore".to_string(),
        ServiceType::Cache => "cache-and-queue".to_string(),
        ServiceType::Worker => "queue-worker".to_string(),
        ServiceType::Scheduler => "scheduled-jobs".to_string(),
        ServiceType::App => {
            if name.to_lowercase().contains("api") {
                "api".to_string()
            } else {
                "web".to_string()
            }
        }
    }
}

/// Ordering: artisan -> laravel; manage.py -> django; next.config ->
/// nextjs; nuxt.config -> nuxt; then language fallback via manifest files.
fn analyze_tree(tree: &[String]) -> ProjectInfo {
    let has = |name: &str| tree.iter().any(|p| p.ends_with(name));

    let (framework, language) = if has("artisan") {
        ("laravel", "php")
    } else if has("manage.py") {
        ("django", "python")
    } else if tree.iter().any(|p| p.contains("next.config")) {
        ("nextjs", "javascript")
    } else if tree.iter().any(|p| p.contains("nuxt.config")) {
        ("nuxt", "javascript")
    } else if has("composer.json") {
        ("php", "php")
    } else if has("package.json") {
        ("node", "javascript")
    } else if has("requirements.txt") {
        ("python", "python")
    } else {
        ("unknown", "unknown")
    };

    ProjectInfo {
        service: String::new(),
        framework: framework.to_string(),
        language: language.to_string(),
        has_tests: tree.iter().any(|p| p.contains("test") || p.contains("spec")),
        has_migrations: tree.iter().any(|p| p.contains("migration")),
        has_queue_workers: tree.iter().any(|p| p.contains("queue") || p.contains("job")),
    }
}

fn check_expected_variables(store: &KnowledgeStore, svc: &Service) {
    if svc.stack != "laravel" && svc.service_type != ServiceType::App {
        return;
    }
    let vars = store.get_variables(&svc.name);
    let keys: HashSet<String> = vars.iter().map(|v| v.key.to_uppercase()).collect();
    for expected in ["APP_KEY", "APP_ENV"] {
        if !keys.contains(expected) {
            store.add_flag(Flag {
                service: svc.name.clone(),
                flag_type: "missing_variable".to_string(),
                message: format!("{expected} is not set"),
                created_at: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codehost::fake::FakeCodeHostAdapter;
    use crate::platform::fake::FakePlatformAdapter;
    use crate::platform::RawService;
    use std::collections::HashMap as Map;

    fn pipeline_with(platform: FakePlatformAdapter, codehost: FakeCodeHostAdapter) -> (DiscoveryPipeline, Arc<KnowledgeStore>) {
        let store = Arc::new(KnowledgeStore::new());
        let pipeline = DiscoveryPipeline::new(
            store.clone(),
            Arc::new(platform),
            Arc::new(codehost),
            "proj".to_string(),
            "env".to_string(),
            true,
        );
        (pipeline, store)
    }

    #[tokio::test]
    async fn empty_services_list_produces_no_rows_or_flags() {
        let (pipeline, store) = pipeline_with(FakePlatformAdapter::new(), FakeCodeHostAdapter::new());
        pipeline.run().await;
        assert!(store.list_services().is_empty());
        assert!(store.list_flags(None).is_empty());
    }

    #[tokio::test]
    async fn hardcoded_db_host_is_flagged() {
        let platform = FakePlatformAdapter::new();
        platform.add_service(RawService {
            name: "web-a".to_string(),
            id: "svc_web_a".to_string(),
            repo_owner: String::new(),
            repo_name: String::new(),
            repo_branch: "main".to_string(),
            domains: vec![],
            start_command: String::new(),
            build_command: String::new(),
            health_check_path: None,
            replica_count: 1,
        });
        let mut vars = Map::new();
        vars.insert("DB_HOST".to_string(), "db.internal:5432".to_string());
        platform.add_variables("svc_web_a", vars);

        let (pipeline, store) = pipeline_with(platform, FakeCodeHostAdapter::new());
        pipeline.run().await;

        let flags = store.list_flags(Some("web-a"));
        assert!(flags.iter().any(|f| f.flag_type == "hardcoded_db"));
    }

    #[tokio::test]
    async fn missing_dependency_flag_names_the_unknown_service() {
        let platform = FakePlatformAdapter::new();
        platform.add_service(RawService {
            name: "web-a".to_string(),
            id: "svc_web_a".to_string(),
            repo_owner: String::new(),
            repo_name: String::new(),
            repo_branch: "main".to_string(),
            domains: vec![],
            start_command: String::new(),
            build_command: String::new(),
            health_check_path: None,
            replica_count: 1,
        });
        let mut vars = Map::new();
        vars.insert("QUEUE_URL".to_string(), "${{redis-old.REDIS_URL}}".to_string());
        platform.add_variables("svc_web_a", vars);

        let (pipeline, store) = pipeline_with(platform, FakeCodeHostAdapter::new());
        pipeline.run().await;

        let flags = store.list_flags(Some("web-a"));
        let flag = flags.iter().find(|f| f.flag_type == "missing_dependency").unwrap();
        assert!(flag.message.contains("redis-old"));
    }

    #[tokio::test]
    async fn inconsistent_variable_flags_both_services() {
        let platform = FakePlatformAdapter::new();
        for (name, id) in [("svc-a", "svc_a"), ("svc-b", "svc_b")] {
            platform.add_service(RawService {
                name: name.to_string(),
                id: id.to_string(),
                repo_owner: String::new(),
                repo_name: String::new(),
                repo_branch: "main".to_string(),
                domains: vec![],
                start_command: String::new(),
                build_command: String::new(),
                health_check_path: None,
                replica_count: 1,
            });
        }
        let mut a_vars = Map::new();
        a_vars.insert("APP_ENV".to_string(), "production".to_string());
        platform.add_variables("svc_a", a_vars);
        let mut b_vars = Map::new();
        b_vars.insert("APP_ENV".to_string(), "staging".to_string());
        platform.add_variables("svc_b", b_vars);

        let (pipeline, store) = pipeline_with(platform, FakeCodeHostAdapter::new());
        pipeline.run().await;

        assert!(store
            .list_flags(Some("svc-a"))
            .iter()
            .any(|f| f.flag_type == "inconsistent_variable"));
        assert!(store
            .list_flags(Some("svc-b"))
            .iter()
            .any(|f| f.flag_type == "inconsistent_variable"));
    }

    #[tokio::test]
    async fn missing_variable_check_runs_for_non_laravel_app_services_too() {
        let platform = FakePlatformAdapter::new();
        platform.add_service(RawService {
            name: "web-a".to_string(),
            id: "svc_web_a".to_string(),
            repo_owner: String::new(),
            repo_name: String::new(),
            repo_branch: "main".to_string(),
            domains: vec![],
            start_command: "node server.js".to_string(),
            build_command: String::new(),
            health_check_path: None,
            replica_count: 1,
        });

        let (pipeline, store) = pipeline_with(platform, FakeCodeHostAdapter::new());
        pipeline.run().await;

        let flags = store.list_flags(Some("web-a"));
        assert!(flags.iter().any(|f| f.flag_type == "missing_variable" && f.message.contains("APP_KEY")));
        assert!(flags.iter().any(|f| f.flag_type == "missing_variable" && f.message.contains("APP_ENV")));
    }

    #[tokio::test]
    async fn pg_prefixed_variable_counts_as_database_config() {
        let platform = FakePlatformAdapter::new();
        platform.add_service(RawService {
            name: "web-a".to_string(),
            id: "svc_web_a".to_string(),
            repo_owner: String::new(),
            repo_name: String::new(),
            repo_branch: "main".to_string(),
            domains: vec![],
            start_command: String::new(),
            build_command: String::new(),
            health_check_path: None,
            replica_count: 1,
        });
        let mut vars = Map::new();
        vars.insert("PGHOST".to_string(), "db.internal".to_string());
        platform.add_variables("svc_web_a", vars);

        let (pipeline, store) = pipeline_with(platform, FakeCodeHostAdapter::new());
        pipeline.run().await;

        let flags = store.list_flags(Some("web-a"));
        assert!(!flags.iter().any(|f| f.flag_type == "no_database_config"));
    }

    #[tokio::test]
    async fn phase2_resolves_default_branch_from_repo_metadata_when_platform_branch_is_empty() {
        let platform = FakePlatformAdapter::new();
        platform.add_service(RawService {
            name: "web-a".to_string(),
            id: "svc_web_a".to_string(),
            repo_owner: "acme".to_string(),
            repo_name: "web".to_string(),
            repo_branch: String::new(),
            domains: vec![],
            start_command: String::new(),
            build_command: String::new(),
            health_check_path: None,
            replica_count: 1,
        });

        let codehost = FakeCodeHostAdapter::new();
        codehost.add_repo_metadata("acme", "web", "master");
        codehost.add_tree("acme", "web", vec!["package.json".to_string()]);

        let (pipeline, store) = pipeline_with(platform, codehost);
        pipeline.run().await;

        let svc = store.get_service("web-a").unwrap();
        assert_eq!(svc.repo_branch, "master");
    }

    #[tokio::test]
    async fn phase2_skips_repo_when_default_branch_cannot_be_resolved() {
        let platform = FakePlatformAdapter::new();
        platform.add_service(RawService {
            name: "web-a".to_string(),
            id: "svc_web_a".to_string(),
            repo_owner: "acme".to_string(),
            repo_name: "web".to_string(),
            repo_branch: String::new(),
            domains: vec![],
            start_command: String::new(),
            build_command: String::new(),
            health_check_path: None,
            replica_count: 1,
        });

        let (pipeline, store) = pipeline_with(platform, FakeCodeHostAdapter::new());
        pipeline.run().await;

        let svc = store.get_service("web-a").unwrap();
        assert_eq!(svc.repo_branch, "");
        assert!(store.get_project_info("web-a").is_none());
    }

    #[tokio::test]
    async fn running_twice_is_idempotent_for_flags() {
        let platform = FakePlatformAdapter::new();
        platform.add_service(RawService {
            name: "web-a".to_string(),
            id: "svc_web_a".to_string(),
            repo_owner: String::new(),
            repo_name: String::new(),
            repo_branch: "main".to_string(),
            domains: vec![],
            start_command: String::new(),
            build_command: String::new(),
            health_check_path: None,
            replica_count: 1,
        });
        let mut vars = Map::new();
        vars.insert("DB_HOST".to_string(), "db.internal:5432".to_string());
        platform.add_variables("svc_web_a", vars);

        let (pipeline, store) = pipeline_with(platform, FakeCodeHostAdapter::new());
        pipeline.run().await;
        let first: Vec<_> = store.list_flags(Some("web-a")).into_iter().map(|f| f.flag_type).collect();
        pipeline.run().await;
        let second: Vec<_> = store.list_flags(Some("web-a")).into_iter().map(|f| f.flag_type).collect();
        assert_eq!(first, second);
    }
}
