use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};
use crate::types::title_case;

/// Top-level Weft configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    /// Tool providers keyed by provider name.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl AppConfig {
    /// Load config from a TOML file, resolving `${ENV_VAR}` references
    /// in the model API key.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            WeftError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: AppConfig = toml::from_str(&raw)
            .map_err(|e| WeftError::Config(format!("invalid {}: {}", path.display(), e)))?;

        if let Some(key) = config.model.api_key.take() {
            config.model.api_key = resolve_env_ref(&key);
        }
        Ok(config)
    }
}

/// Model endpoint configuration (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Raw value or `${ENV_VAR}` reference.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_temperature() -> f32 {
    0.7
}

/// Retry configuration for rate-limited language-model calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    1000
}
fn default_max_backoff() -> u64 {
    30000
}

/// Configuration for a single tool provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub transport: ProviderTransport,
    /// Shown in user-facing error messages and statuses.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Connected at startup in non-multi-tenant mode.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ProviderConfig {
    pub fn display_name_or(&self, provider: &str) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| title_case(provider))
    }
}

/// Provider transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        /// Values of the form `${VAR}` take the tenant credential when one
        /// is available, else the process environment variable.
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        url: String,
    },
}

/// Resolve a `${ENV_VAR}` reference against the process environment;
/// plain values pass through unchanged.
pub fn resolve_env_ref(value: &str) -> Option<String> {
    match env_ref_name(value) {
        Some(var) => std::env::var(var).ok().filter(|v| !v.is_empty()),
        None => Some(value.to_string()),
    }
}

/// Returns the variable name if `value` is a `${VAR}` reference.
pub fn env_ref_name(value: &str) -> Option<&str> {
    value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
}
