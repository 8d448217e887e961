//! Typed LLM configuration for the two call surfaces.
//!
//! Two distinct configs exist on purpose: [`MasLlmConfig`] drives agent-facing
//! calls, [`MonitorLlmConfig`] drives monitors and judges and carries the
//! stricter retry/timeout discipline those hot paths demand. The split keeps a
//! misconfigured agent LLM from silently changing monitor behavior.
//!
//! Both load from YAML files (`mas_llm_config.yaml` / `monitor_llm_config.yaml`)
//! and resolve API keys from the config value first, then from the environment
//! variable named by `api_key_env`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// LLM configuration for the multi-agent system under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasLlmConfig {
    /// Provider name (`openai` or `anthropic`).
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// API key, if configured directly.
    pub api_key: Option<String>,
    /// Environment variable to read the API key from when `api_key` is unset.
    pub api_key_env: Option<String>,
    /// Optional base URL override for self-hosted gateways.
    pub base_url: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
}

impl Default for MasLlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_owned(),
            model: "gpt-4o-mini".to_owned(),
            api_key: None,
            api_key_env: None,
            base_url: None,
            temperature: 0.0,
            max_tokens: 4096,
        }
    }
}

impl MasLlmConfig {
    /// Load the config from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the file is missing or malformed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load_yaml(path.as_ref(), "mas_llm_config.yaml")
    }

    /// Resolve the API key, preferring the direct value over the environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when neither source yields a key.
    pub fn api_key(&self) -> Result<String> {
        resolve_api_key(
            self.api_key.as_deref(),
            self.api_key_env.as_deref(),
            "mas_llm_config.yaml",
        )
    }
}

/// LLM configuration for monitor agents and judges.
///
/// Extends the MAS surface with judge sampling parameters and the retry,
/// delay, and timeout settings applied by the client on every attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorLlmConfig {
    /// Provider name (`openai` or `anthropic`).
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// API key, if configured directly.
    pub api_key: Option<String>,
    /// Environment variable to read the API key from when `api_key` is unset.
    pub api_key_env: Option<String>,
    /// Optional base URL override for self-hosted gateways.
    pub base_url: Option<String>,
    /// Sampling temperature for non-judge calls.
    pub temperature: f32,
    /// Maximum tokens per completion for non-judge calls.
    pub max_tokens: u32,

    /// Sampling temperature for judge calls.
    pub judge_temperature: f32,
    /// Maximum tokens per judge completion.
    pub judge_max_tokens: u32,
    /// Attempts per LLM call before giving up.
    pub retry_count: u32,
    /// Fixed delay between attempts, in seconds.
    pub retry_delay: f64,
    /// Per-attempt timeout, in seconds.
    pub timeout: u64,
}

impl Default for MonitorLlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_owned(),
            model: "gpt-4o-mini".to_owned(),
            api_key: None,
            api_key_env: None,
            base_url: None,
            temperature: 0.0,
            max_tokens: 4096,
            judge_temperature: 0.1,
            judge_max_tokens: 500,
            retry_count: 3,
            retry_delay: 1.0,
            timeout: 30,
        }
    }
}

impl MonitorLlmConfig {
    /// Load the config from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the file is missing or malformed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load_yaml(path.as_ref(), "monitor_llm_config.yaml")
    }

    /// Resolve the API key, preferring the direct value over the environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when neither source yields a key.
    pub fn api_key(&self) -> Result<String> {
        resolve_api_key(
            self.api_key.as_deref(),
            self.api_key_env.as_deref(),
            "monitor_llm_config.yaml",
        )
    }
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path, hint: &str) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::configuration(format!(
            "LLM config file not found: {} ({e}). Create {hint} with provider, \
             model, api_key or api_key_env, temperature, max_tokens.",
            path.display()
        ))
    })?;
    serde_yaml::from_str(&raw)
        .map_err(|e| Error::configuration(format!("invalid {hint}: {e}")))
}

fn resolve_api_key(direct: Option<&str>, env_var: Option<&str>, hint: &str) -> Result<String> {
    if let Some(key) = direct
        && !key.is_empty()
    {
        return Ok(key.to_owned());
    }
    if let Some(var) = env_var
        && let Ok(key) = std::env::var(var)
        && !key.is_empty()
    {
        return Ok(key);
    }
    Err(Error::configuration(format!(
        "No API key configured. Set 'api_key' in {hint} or set the environment \
         variable named by 'api_key_env'."
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn mas_defaults() {
        let cfg = MasLlmConfig::default();
        assert_eq!(cfg.provider, "openai");
        assert_eq!(cfg.model, "gpt-4o-mini");
        assert_eq!(cfg.max_tokens, 4096);
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn monitor_defaults_carry_retry_discipline() {
        let cfg = MonitorLlmConfig::default();
        assert!((cfg.judge_temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(cfg.judge_max_tokens, 500);
        assert_eq!(cfg.retry_count, 3);
        assert!((cfg.retry_delay - 1.0).abs() < f64::EPSILON);
        assert_eq!(cfg.timeout, 30);
    }

    #[test]
    fn api_key_prefers_direct_value() {
        let cfg = MasLlmConfig {
            api_key: Some("sk-direct".into()),
            api_key_env: Some("SENTINEL_TEST_UNSET_VAR".into()),
            ..Default::default()
        };
        assert_eq!(cfg.api_key().unwrap(), "sk-direct");
    }

    #[test]
    fn api_key_missing_everywhere_fails() {
        let cfg = MasLlmConfig::default();
        let err = cfg.api_key().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn loads_partial_yaml_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "provider: anthropic\nmodel: claude-3-5-haiku\njudge_max_tokens: 256")
            .unwrap();

        let cfg = MonitorLlmConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.provider, "anthropic");
        assert_eq!(cfg.model, "claude-3-5-haiku");
        assert_eq!(cfg.judge_max_tokens, 256);
        // Unspecified fields keep their defaults.
        assert_eq!(cfg.retry_count, 3);
    }

    #[test]
    fn missing_file_fails_fast() {
        let err = MasLlmConfig::from_file("/nonexistent/mas_llm_config.yaml").unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }
}
