use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CortexConfig {
    pub bind_address: String,
    pub api_token: String,

    pub llm_api_key: String,
    pub llm_model: String,
    pub max_turns: u32,

    pub platform_token: String,
    pub platform_project_id: String,
    pub platform_environment_id: String,

    pub codehost_token: String,

    pub knowledge_store_path: String,
    pub config_dir: String,
    pub knowledge_dir: String,

    #[serde(rename = "monitor_interval")]
    pub monitor_interval_secs: u64,
    #[serde(rename = "discovery_interval")]
    pub discovery_interval_secs: u64,

    pub slack_webhook: String,
    pub notify_email: String,
    pub notify_webhook: String,

    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl CortexConfig {
    /// Load configuration from defaults, then config/cortex.toml (if present),
    /// then CORTEX_* environment variables, in that order of precedence.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = config::Config::try_from(&CortexConfig::default())
            .context("failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        let config_paths = ["/etc/cortex/cortex", "config/cortex"];
        for path in config_paths {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CORTEX")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_address
            .parse::<std::net::SocketAddr>()
            .context("invalid bind_address")?;

        if self.max_turns == 0 {
            tracing::warn!("max_turns is 0 — investigations will record no diagnosis");
        }

        if self.llm_api_key.is_empty() {
            tracing::warn!("CORTEX_LLM_API_KEY is unset — investigations will fail at the LLM call");
        }
        if self.platform_token.is_empty() {
            tracing::warn!("CORTEX_PLATFORM_TOKEN is unset — platform adapter calls will fail");
        }
        if self.codehost_token.is_empty() {
            tracing::warn!("CORTEX_CODEHOST_TOKEN is unset — discovery Phase 2 (code inspection) will be skipped");
        }

        Ok(())
    }
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            api_token: String::new(),

            llm_api_key: String::new(),
            llm_model: "claude-sonnet-4-20250514".to_string(),
            max_turns: 8,

            platform_token: String::new(),
            platform_project_id: String::new(),
            platform_environment_id: String::new(),

            codehost_token: String::new(),

            knowledge_store_path: "./data/knowledge.json".to_string(),
            config_dir: "./config".to_string(),
            knowledge_dir: "./knowledge".to_string(),

            monitor_interval_secs: 300,
            discovery_interval_secs: 3600,

            slack_webhook: String::new(),
            notify_email: String::new(),
            notify_webhook: String::new(),

            log_level: "info,cortex=debug".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = CortexConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bad_bind_address_fails_validation() {
        let mut cfg = CortexConfig::default();
        cfg.bind_address = "not-an-address".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_max_turns_still_validates() {
        let mut cfg = CortexConfig::default();
        cfg.max_turns = 0;
        assert!(cfg.validate().is_ok());
    }
}
