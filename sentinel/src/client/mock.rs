//! Scripted LLM client for testing.
//!
//! Returns predefined responses in sequence, cycling through them, and can
//! inject a number of leading failures to exercise retry and fallback paths.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{GenerateOptions, LlmClient};
use crate::error::{Error, Result};

/// A recorded call made against a [`MockLlm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// System prompt, when `generate_with_system` was used.
    pub system: Option<String>,
    /// User message.
    pub user: String,
}

/// A scripted LLM client for tests.
///
/// Cycles through its responses; with `failing_calls(n)` the first `n` calls
/// fail with [`Error::Llm`] before the script resumes.
#[derive(Debug, Default)]
pub struct MockLlm {
    responses: Vec<String>,
    index: AtomicUsize,
    failures_remaining: AtomicUsize,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockLlm {
    /// Create a mock that cycles through the given responses.
    #[must_use]
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            ..Default::default()
        }
    }

    /// Create a mock that always returns the same response.
    #[must_use]
    pub fn always(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Fail the first `n` calls before the script takes over.
    #[must_use]
    pub fn failing_calls(self, n: usize) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Number of calls made so far, including failed ones.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Snapshot of all recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn respond(&self, system: Option<&str>, user: &str) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                system: system.map(str::to_owned),
                user: user.to_owned(),
            });
        }

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::llm("mock failure"));
        }

        if self.responses.is_empty() {
            return Ok(String::new());
        }
        let index = self.index.fetch_add(1, Ordering::SeqCst);
        Ok(self.responses[index % self.responses.len()].clone())
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String> {
        self.respond(None, prompt)
    }

    async fn generate_with_system(
        &self,
        system: &str,
        user: &str,
        _options: &GenerateOptions,
    ) -> Result<String> {
        self.respond(Some(system), user)
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cycles_responses() {
        let mock = MockLlm::new(vec!["first".into(), "second".into()]);
        let opts = GenerateOptions::default();

        assert_eq!(mock.generate("a", &opts).await.unwrap(), "first");
        assert_eq!(mock.generate("b", &opts).await.unwrap(), "second");
        assert_eq!(mock.generate("c", &opts).await.unwrap(), "first");
    }

    #[tokio::test]
    async fn records_system_and_user() {
        let mock = MockLlm::always("ok");
        let opts = GenerateOptions::default();
        mock.generate_with_system("sys", "usr", &opts).await.unwrap();

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].system.as_deref(), Some("sys"));
        assert_eq!(calls[0].user, "usr");
    }

    #[tokio::test]
    async fn leading_failures_then_script() {
        let mock = MockLlm::always("recovered").failing_calls(2);
        let opts = GenerateOptions::default();

        assert!(mock.generate("x", &opts).await.is_err());
        assert!(mock.generate("x", &opts).await.is_err());
        assert_eq!(mock.generate("x", &opts).await.unwrap(), "recovered");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn empty_script_yields_empty_string() {
        let mock = MockLlm::new(vec![]);
        let opts = GenerateOptions::default();
        assert_eq!(mock.generate("x", &opts).await.unwrap(), "");
    }
}
