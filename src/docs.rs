//! Reference Docs Loader: picks stack-appropriate Markdown reference
//! material plus accumulated incident learnings and concatenates it into a
//! single block for the Investigation Engine's system prompt.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const MAX_DOCS_CHARS: usize = 30_000;
const ALWAYS_INCLUDE: &[&str] = &["platform.md", "incidents.md"];

fn stack_docs(stack: &str) -> &'static [&'static str] {
    match stack {
        "laravel" => &["railway.md", "laravel.md", "postgres.md", "redis.md"],
        "php" => &["railway.md", "laravel.md", "postgres.md"],
        "node" => &["railway.md", "node.md"],
        "nextjs" => &["railway.md", "node.md"],
        "nuxt" => &["railway.md", "node.md", "vue-vite-tailwind.md"],
        "python" => &["railway.md", "python.md"],
        "django" => &["railway.md", "python.md", "postgres.md"],
        "postgres" | "postgresql" => &["railway.md", "postgres.md"],
        "redis" => &["railway.md", "redis.md"],
        _ => &["railway.md"],
    }
}

pub struct DocsLoader {
    knowledge_dir: PathBuf,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DocSummary {
    pub file: String,
    pub size_kb: f64,
}

impl DocsLoader {
    pub fn new(knowledge_dir: impl Into<PathBuf>) -> Self {
        Self {
            knowledge_dir: knowledge_dir.into(),
        }
    }

    /// Loads relevant knowledge docs for a service's stack/type, returning a
    /// formatted string ready for injection into the system prompt. Empty
    /// string if nothing was found.
    pub fn get_relevant_docs(&self, stack: &str, service_type: &str) -> String {
        let mut doc_files: BTreeSet<String> = stack_docs(stack).iter().map(|s| s.to_string()).collect();

        match service_type {
            "database" => {
                doc_files.insert("postgres.md".to_string());
            }
            "cache" | "cache-and-queue" => {
                doc_files.insert("redis.md".to_string());
            }
            "worker" | "queue-worker" => {
                doc_files.insert("redis.md".to_string());
            }
            _ => {}
        }

        for f in ALWAYS_INCLUDE {
            doc_files.insert(f.to_string());
        }

        let mut sections = Vec::new();
        let mut total_chars = 0usize;

        for filename in &doc_files {
            let path = self.knowledge_dir.join(filename);
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let content = content.trim();
            if content.is_empty() {
                continue;
            }

            let content = if total_chars + content.len() > MAX_DOCS_CHARS {
                let remaining = MAX_DOCS_CHARS.saturating_sub(total_chars);
                if remaining > 500 {
                    format!("{}\n\n[... truncated for context length ...]", &content[..remaining])
                } else {
                    break;
                }
            } else {
                content.to_string()
            };

            total_chars += content.len();
            sections.push(format!("=== {filename} ===\n{content}"));
        }

        if sections.is_empty() {
            return String::new();
        }

        format!("REFERENCE DOCUMENTATION (use for diagnosis):\n\n{}", sections.join("\n\n"))
    }

    pub fn list_available_docs(&self) -> Vec<DocSummary> {
        let Ok(entries) = std::fs::read_dir(&self.knowledge_dir) else {
            return Vec::new();
        };

        let mut docs: Vec<DocSummary> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("md"))
            .filter_map(|e| {
                let meta = e.metadata().ok()?;
                Some(DocSummary {
                    file: e.file_name().to_string_lossy().into_owned(),
                    size_kb: (meta.len() as f64 / 1024.0 * 10.0).round() / 10.0,
                })
            })
            .collect();

        docs.sort_by(|a, b| a.file.cmp(&b.file));
        docs
    }

    /// Appends a resolved incident to `incidents.md` so future investigations
    /// for a similar stack see the prior resolution verbatim.
    pub fn add_incident_learning(
        &self,
        service_name: &str,
        stack: &str,
        error_summary: &str,
        resolution: &str,
        conversation_summary: &str,
    ) {
        let path = self.knowledge_dir.join("incidents.md");
        let entry = format!(
            "\n### {service_name} ({stack})\n**Error:** {error_summary}\n**Resolution:** {resolution}\n**Key insight:** {conversation_summary}\n\n---\n"
        );

        if let Err(e) = std::fs::create_dir_all(&self.knowledge_dir) {
            tracing::warn!("could not create knowledge dir: {e}");
            return;
        }

        use std::io::Write;
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path);
        match file {
            Ok(mut f) => {
                if let Err(e) = f.write_all(entry.as_bytes()) {
                    tracing::warn!("could not write incident learning: {e}");
                }
            }
            Err(e) => tracing::warn!("could not open {}: {e}", path.display()),
        }
    }
}

pub fn docs_dir_exists(dir: &Path) -> bool {
    dir.exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tempdir() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("cortex-docs-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    #[test]
    fn budget_truncates_with_ellipsis() {
        let dir = tempdir();
        let big = "x".repeat(40_000);
        std::fs::write(dir.join("railway.md"), &big).unwrap();
        std::fs::write(dir.join("platform.md"), "short").unwrap();
        std::fs::write(dir.join("incidents.md"), "short2").unwrap();

        let loader = DocsLoader::new(dir);
        let out = loader.get_relevant_docs("unknown", "app");
        assert!(out.contains("truncated for context length"));
    }

    #[test]
    fn missing_dir_returns_empty_string() {
        let loader = DocsLoader::new("/nonexistent/path/for/cortex/tests");
        assert_eq!(loader.get_relevant_docs("unknown", "app"), "");
    }

    #[test]
    fn incident_learning_is_appended() {
        let dir = tempdir();
        let loader = DocsLoader::new(&dir);
        loader.add_incident_learning("web-a", "node", "crash loop", "restarted", "OOM due to leak");
        let contents = std::fs::read_to_string(dir.join("incidents.md")).unwrap();
        assert!(contents.contains("web-a"));
        assert!(contents.contains("OOM due to leak"));

        let mut f = std::fs::OpenOptions::new().append(true).open(dir.join("incidents.md")).unwrap();
        writeln!(f, "marker-for-append-check").unwrap();
        loader.add_incident_learning("web-b", "python", "timeout", "scaled up", "slow query");
        let contents = std::fs::read_to_string(dir.join("incidents.md")).unwrap();
        assert!(contents.contains("marker-for-append-check"));
        assert!(contents.contains("web-b"));
    }
}
