//! Configuration for the relay.
//!
//! The relay reads two YAML documents at startup: the service config (this
//! module's [`RelayConfig`]) and the tenant policy referenced by its
//! `policy_path` ([`policy::PolicyConfig`]). Both support environment
//! variable interpolation using `${VAR_NAME}` syntax. The policy is loaded
//! once and treated as immutable; reload is a restart.

mod policy;

use std::path::Path;

pub use policy::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Root configuration for the relay service. All sections are optional with
/// defaults, so an empty file is a valid local-dev configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Generative backend the scheduler workers call.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Embedding model used by the semantic cache.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Connection URLs for the key-value, trace, and vector stores.
    /// Omitted URLs fall back to in-memory implementations (single-node only).
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Path to the tenant policy YAML, resolved relative to the working
    /// directory when not absolute.
    #[serde(default = "default_policy_path")]
    pub policy_path: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backend: BackendConfig::default(),
            embedding: EmbeddingConfig::default(),
            storage: StorageConfig::default(),
            cache: CacheSettings::default(),
            observability: ObservabilityConfig::default(),
            policy_path: default_policy_path(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a YAML file, expanding `${VAR}` references.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: RelayConfig = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.exact_ttl_seconds == 0 {
            return Err(ConfigError::Validation(
                "cache.exact_ttl_seconds must be greater than 0".into(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Validation(
                "embedding.dimensions must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8088
}

/// Which backend adapter to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// HTTP adapter for an Ollama-style `/api/generate` endpoint.
    #[default]
    Ollama,
    /// Deterministic echo adapter for CI and local development.
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    #[serde(default)]
    pub mode: BackendMode,
    #[serde(default = "default_backend_base_url")]
    pub base_url: String,
    #[serde(default = "default_backend_model")]
    pub model: String,
    /// Per-call timeout for backend generation requests.
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::default(),
            base_url: default_backend_base_url(),
            model: default_backend_model(),
            timeout_secs: default_backend_timeout_secs(),
        }
    }
}

fn default_backend_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_backend_model() -> String {
    "llama3.2:1b".to_string()
}

fn default_backend_timeout_secs() -> u64 {
    120
}

/// Which embedder the semantic cache uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMode {
    /// HTTP embedder for an Ollama-style `/api/embeddings` endpoint.
    #[default]
    Ollama,
    /// Deterministic token-hash embedder, used in CI where no embedding
    /// model is reachable.
    Hashing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub mode: EmbeddingMode,
    #[serde(default = "default_backend_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Fixed vector dimension for all entries of a tenant/plan partition.
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            mode: EmbeddingMode::default(),
            base_url: default_backend_base_url(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
        }
    }
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_dimensions() -> usize {
    768
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Redis URL for the exact cache and metrics counters.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Postgres URL for the trace store and the pgvector semantic store.
    #[serde(default)]
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    /// TTL for exact-cache entries in seconds.
    #[serde(default = "default_exact_ttl")]
    pub exact_ttl_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            exact_ttl_seconds: default_exact_ttl(),
        }
    }
}

fn default_exact_ttl() -> u64 {
    300
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// Default log level when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_policy_path() -> String {
    "policies/policy.dev.yaml".to_string()
}

/// Expand `${VAR_NAME}` references against the process environment.
/// Missing variables are an error rather than an empty expansion.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    let mut result = String::with_capacity(input.len());
    let mut last_end = 0;

    for cap in re.captures_iter(input) {
        let whole = cap.get(0).unwrap();
        result.push_str(&input[last_end..whole.start()]);

        let var_name = &cap[1];
        let value = std::env::var(var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
        result.push_str(&value);

        last_end = whole.end();
    }

    result.push_str(&input[last_end..]);
    Ok(result)
}
