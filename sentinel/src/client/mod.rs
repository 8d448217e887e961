//! LLM client abstraction used by agents, judges, and the attack harness.
//!
//! The [`LlmClient`] trait exposes the two message forms the safety layer
//! needs (`generate`, `generate_with_system`); concrete implementations wrap
//! the OpenAI-compatible and Anthropic chat APIs over `reqwest`. Every call is
//! retried with a fixed delay and a per-attempt timeout — monitors run on hot
//! paths, and a single flaky HTTP attempt must not blind the safety layer.

mod anthropic;
mod mock;
mod openai;

pub use anthropic::AnthropicClient;
pub use mock::MockLlm;
pub use openai::OpenAiClient;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::{MasLlmConfig, MonitorLlmConfig};
use crate::error::{Error, Result};

/// Per-call generation options.
///
/// Unset fields fall back to the client's configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerateOptions {
    /// Sampling temperature override.
    pub temperature: Option<f32>,
    /// Max-token override.
    pub max_tokens: Option<u32>,
}

impl GenerateOptions {
    /// Options with a temperature override.
    #[must_use]
    pub const fn temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            max_tokens: None,
        }
    }

    /// Sets the max-token override.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Trait for LLM backends.
///
/// Object-safe so callers hold a [`SharedLlmClient`]; the judge, the global
/// monitor, and PAIR are all provider-agnostic through this trait.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate text from a single user prompt.
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String>;

    /// Generate text from a system prompt plus a user message.
    async fn generate_with_system(
        &self,
        system: &str,
        user: &str,
        options: &GenerateOptions,
    ) -> Result<String>;

    /// Provider name, used in error messages and logging.
    fn provider_name(&self) -> &'static str;
}

impl std::fmt::Debug for dyn LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.provider_name())
            .finish()
    }
}

/// A shared, thread-safe [`LlmClient`] trait object.
pub type SharedLlmClient = Arc<dyn LlmClient>;

/// Retry discipline applied to every provider call.
#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    /// Attempts before giving up.
    pub attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 1,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetrySettings {
    /// Derive retry settings from a monitor config.
    #[must_use]
    pub fn from_monitor_config(config: &MonitorLlmConfig) -> Self {
        Self {
            attempts: config.retry_count.max(1),
            delay: Duration::from_secs_f64(config.retry_delay.max(0.0)),
        }
    }

    /// Run `op` up to `attempts` times with the configured delay between
    /// failures. The last error is wrapped in [`Error::Llm`] with the
    /// provider name and attempt count.
    pub(crate) async fn run<T, F, Fut>(&self, provider: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let attempts = self.attempts.max(1);
        let mut last_error: Option<Error> = None;

        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(provider, attempt, attempts, %err, "LLM attempt failed");
                    last_error = Some(err);
                    if attempt < attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }

        let last = last_error.map_or_else(String::new, |e| e.to_string());
        Err(Error::llm(format!(
            "{provider} API error after {attempts} attempts: {last}"
        )))
    }
}

/// Build a client for agent-facing calls from a MAS config.
///
/// Agent calls use a single attempt; the tighter retry discipline belongs to
/// the monitor surface.
///
/// # Errors
///
/// Returns [`Error::Configuration`] on a missing API key and [`Error::Llm`]
/// on an unsupported provider name.
pub fn client_for_mas(config: &MasLlmConfig) -> Result<SharedLlmClient> {
    let api_key = config.api_key()?;
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiClient::new(
            api_key,
            config.model.clone(),
            config.base_url.clone(),
            config.temperature,
            config.max_tokens,
            RetrySettings::default(),
            None,
        )?)),
        "anthropic" => Ok(Arc::new(AnthropicClient::new(
            api_key,
            config.model.clone(),
            config.base_url.clone(),
            config.temperature,
            config.max_tokens,
            RetrySettings::default(),
            None,
        )?)),
        other => Err(Error::llm(format!("unsupported LLM provider: {other}"))),
    }
}

/// Build a client for monitor and judge calls from a monitor config.
///
/// Applies the configured retry count, retry delay, and per-attempt timeout.
///
/// # Errors
///
/// Returns [`Error::Configuration`] on a missing API key and [`Error::Llm`]
/// on an unsupported provider name.
pub fn client_for_monitor(config: &MonitorLlmConfig) -> Result<SharedLlmClient> {
    let api_key = config.api_key()?;
    let retry = RetrySettings::from_monitor_config(config);
    let timeout = Some(Duration::from_secs(config.timeout.max(1)));
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiClient::new(
            api_key,
            config.model.clone(),
            config.base_url.clone(),
            config.temperature,
            config.max_tokens,
            retry,
            timeout,
        )?)),
        "anthropic" => Ok(Arc::new(AnthropicClient::new(
            api_key,
            config.model.clone(),
            config.base_url.clone(),
            config.temperature,
            config.max_tokens,
            retry,
            timeout,
        )?)),
        other => Err(Error::llm(format!("unsupported LLM provider: {other}"))),
    }
}
