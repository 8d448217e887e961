//! Anthropic messages API client.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{GenerateOptions, LlmClient, RetrySettings};
use crate::error::{Error, Result};

/// Default Anthropic API base URL.
pub const ANTHROPIC_API_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages client with retry and timeout support.
#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetrySettings,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl AnthropicClient {
    /// Create a new client.
    ///
    /// `timeout`, when set, bounds each individual attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the underlying HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<String>,
        temperature: f32,
        max_tokens: u32,
        retry: RetrySettings,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.unwrap_or_else(|| ANTHROPIC_API_BASE_URL.to_owned()),
            model: model.into(),
            temperature,
            max_tokens,
            retry,
        })
    }

    async fn request(
        &self,
        system: Option<&str>,
        user: &str,
        options: &GenerateOptions,
    ) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": options.max_tokens.unwrap_or(self.max_tokens),
            "temperature": options.temperature.unwrap_or(self.temperature),
            "messages": [{"role": "user", "content": user}],
        });
        if let Some(system) = system {
            body["system"] = Value::String(system.to_owned());
        }

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload: Value = response.json().await?;
        if !status.is_success() {
            return Err(Error::llm(format!(
                "Anthropic request failed with status {status}: {payload}"
            )));
        }

        payload["content"][0]["text"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| Error::llm("Anthropic response missing text content"))
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        self.retry
            .run(self.provider_name(), || self.request(None, prompt, options))
            .await
    }

    async fn generate_with_system(
        &self,
        system: &str,
        user: &str,
        options: &GenerateOptions,
    ) -> Result<String> {
        self.retry
            .run(self.provider_name(), || {
                self.request(Some(system), user, options)
            })
            .await
    }

    fn provider_name(&self) -> &'static str {
        "Anthropic"
    }
}
