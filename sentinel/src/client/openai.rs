//! OpenAI-compatible chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{GenerateOptions, LlmClient, RetrySettings};
use crate::error::{Error, Result};

/// Default OpenAI API base URL.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat completions client with retry and timeout support.
///
/// `base_url` reroutes requests to any OpenAI-compatible gateway.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetrySettings,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
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
            base_url: base_url.unwrap_or_else(|| OPENAI_API_BASE_URL.to_owned()),
            model: model.into(),
            temperature,
            max_tokens,
            retry,
        })
    }

    async fn request(&self, messages: &Value, options: &GenerateOptions) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature.unwrap_or(self.temperature),
            "max_tokens": options.max_tokens.unwrap_or(self.max_tokens),
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload: Value = response.json().await?;
        if !status.is_success() {
            return Err(Error::llm(format!(
                "OpenAI request failed with status {status}: {payload}"
            )));
        }

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| Error::llm("OpenAI response missing message content"))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let messages = json!([{"role": "user", "content": prompt}]);
        self.retry
            .run(self.provider_name(), || self.request(&messages, options))
            .await
    }

    async fn generate_with_system(
        &self,
        system: &str,
        user: &str,
        options: &GenerateOptions,
    ) -> Result<String> {
        let messages = json!([
            {"role": "system", "content": system},
            {"role": "user", "content": user},
        ]);
        self.retry
            .run(self.provider_name(), || self.request(&messages, options))
            .await
    }

    fn provider_name(&self) -> &'static str {
        "OpenAI"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client() -> OpenAiClient {
        OpenAiClient::new(
            "sk-test",
            "gpt-4o-mini",
            None,
            0.0,
            256,
            RetrySettings::default(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn debug_redacts_api_key() {
        let repr = format!("{:?}", client());
        assert!(repr.contains("[REDACTED]"));
        assert!(!repr.contains("sk-test"));
    }

    #[test]
    fn default_base_url_applies() {
        assert_eq!(client().base_url, OPENAI_API_BASE_URL);
    }

    #[test]
    fn base_url_override_reroutes() {
        let client = OpenAiClient::new(
            "sk-test",
            "gpt-4o-mini",
            Some("http://localhost:8080/v1".into()),
            0.0,
            256,
            RetrySettings::default(),
            None,
        )
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
