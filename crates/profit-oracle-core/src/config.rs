use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{PipelineError, SecretValue, require_env};

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "PROFIT_ORACLE_CONFIG";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configured service secret value (from environment only).
    pub fn service_api_key(&self) -> Result<SecretValue, PipelineError> {
        require_env(&self.service.api_key_env)
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `PROFIT_ORACLE_CONFIG` environment variable.
    /// 3. `config.toml` in the current working directory.
    ///
    /// Only the implicit default may be missing; built-in defaults are used then.
    pub fn load(path: Option<PathBuf>) -> Result<Config, PipelineError> {
        let (candidate, explicit) = resolve_path(path);

        if !explicit && !candidate.exists() {
            let config = Config::default();
            Self::validate(&config)?;
            return Ok(config);
        }

        let raw = fs::read_to_string(&candidate)
            .map_err(|err| PipelineError::config_io(candidate.clone(), err))?;
        let config = Self::parse(&raw)?;
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Config, PipelineError> {
        toml::from_str(raw).map_err(|err| PipelineError::InvalidConfiguration(err.to_string()))
    }

    fn validate(config: &Config) -> Result<(), PipelineError> {
        if config.service.api_key_env.trim().is_empty() {
            return Err(PipelineError::InvalidConfiguration(
                "service.api_key_env must reference an environment variable".into(),
            ));
        }
        if config.research.max_attempts == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "research.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path, true);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return (PathBuf::from(from_env), true);
        }
    }

    (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "ServiceConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "ServiceConfig::default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "ServiceConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ServiceConfig {
    fn default_base_url() -> String {
        "https://api.openai.com/v1".to_string()
    }

    fn default_api_key_env() -> String {
        "OPENAI_API_KEY".to_string()
    }

    const fn default_timeout_secs() -> u64 {
        3_600
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            api_key_env: Self::default_api_key_env(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

/// Model identifiers per role.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "ModelConfig::default_manager")]
    pub manager: String,
    #[serde(default = "ModelConfig::default_research")]
    pub research: String,
    #[serde(default = "ModelConfig::default_simplifier")]
    pub simplifier: String,
    #[serde(default = "ModelConfig::default_analytics")]
    pub analytics: String,
    #[serde(default = "ModelConfig::default_synthesizer")]
    pub synthesizer: String,
}

impl ModelConfig {
    fn default_manager() -> String {
        "gpt-4o-mini".to_string()
    }

    fn default_research() -> String {
        "o3-deep-research".to_string()
    }

    fn default_simplifier() -> String {
        "gpt-4o-mini".to_string()
    }

    fn default_analytics() -> String {
        "gpt-4.1".to_string()
    }

    fn default_synthesizer() -> String {
        "gpt-5".to_string()
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            manager: Self::default_manager(),
            research: Self::default_research(),
            simplifier: Self::default_simplifier(),
            analytics: Self::default_analytics(),
            synthesizer: Self::default_synthesizer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "ResearchConfig::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "ResearchConfig::default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl ResearchConfig {
    const fn default_max_attempts() -> u32 {
        3
    }

    const fn default_retry_delay_ms() -> u64 {
        2_000
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            retry_delay_ms: Self::default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "AnalyticsConfig::default_upload_retention_secs")]
    pub upload_retention_secs: u64,
    #[serde(default = "AnalyticsConfig::default_artifact_dir")]
    pub artifact_dir: PathBuf,
}

impl AnalyticsConfig {
    const fn default_upload_retention_secs() -> u64 {
        43_200
    }

    fn default_artifact_dir() -> PathBuf {
        PathBuf::from("data/artifacts")
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            upload_retention_secs: Self::default_upload_retention_secs(),
            artifact_dir: Self::default_artifact_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "OutputConfig::default_records_dir")]
    pub records_dir: PathBuf,
}

impl OutputConfig {
    fn default_records_dir() -> PathBuf {
        PathBuf::from("data/reports")
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            records_dir: Self::default_records_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}
