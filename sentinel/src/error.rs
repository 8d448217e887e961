//! Error types for the sentinel safety layer.
//!
//! One error enum covers the whole taxonomy: configuration faults fail fast
//! at startup, LLM faults are retried at the client and surface as `None`
//! from the judge, interception and monitor faults are contained at the
//! dispatch site, and MAS faults are recorded on the workflow result rather
//! than propagated.

use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for safety-layer operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Provider or network failure from an LLM call, after retries.
    #[error("LLM error: {0}")]
    Llm(String),

    /// A message modifier failed while rewriting in-flight content.
    #[error("interception error: {0}")]
    Interception(String),

    /// A monitor failed while processing an event.
    #[error("monitor error: {0}")]
    Monitor(String),

    /// The host multi-agent system failed.
    #[error("MAS error: {0}")]
    Mas(String),

    /// The pre-deployment test harness failed.
    #[error("test error: {0}")]
    Test(String),

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON serialization or deserialization failure.
    #[error("JSON error: {0}")]
    Json(String),
}

impl Error {
    /// Create a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new LLM error.
    #[must_use]
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Create a new interception error.
    #[must_use]
    pub fn interception(message: impl Into<String>) -> Self {
        Self::Interception(message.into())
    }

    /// Create a new monitor error.
    #[must_use]
    pub fn monitor(message: impl Into<String>) -> Self {
        Self::Monitor(message.into())
    }

    /// Create a new MAS error.
    #[must_use]
    pub fn mas(message: impl Into<String>) -> Self {
        Self::Mas(message.into())
    }

    /// Create a new test-harness error.
    #[must_use]
    pub fn test(message: impl Into<String>) -> Self {
        Self::Test(message.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = Error::configuration("missing api key");
        assert_eq!(err.to_string(), "configuration error: missing api key");

        let err = Error::mas("workflow crashed");
        assert_eq!(err.to_string(), "MAS error: workflow crashed");
    }

    #[test]
    fn json_errors_convert() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json")
            .expect_err("should fail to parse");
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
