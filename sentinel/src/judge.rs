//! LLM judge for risk analysis with a strict JSON contract.
//!
//! A [`Judge`] wraps a [`SharedLlmClient`] with a per-risk system prompt and
//! the fixed response-format block. [`Judge::analyze`] returns a validated
//! [`JudgeResult`] or `None` — never an error — so every caller can fall back
//! to pattern heuristics without branching on error kinds.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::client::{GenerateOptions, SharedLlmClient};
use crate::error::{Error, Result};

/// Fixed JSON response-format block appended to every judge system prompt.
pub const RESPONSE_FORMAT: &str = r#"Respond with JSON only, no other text:
{
  "has_risk": true/false,
  "severity": "none" | "info" | "warning" | "critical",
  "reason": "brief explanation",
  "evidence": ["specific", "phrases", "detected"],
  "recommended_action": "log" | "warn" | "block"
}"#;

/// Graded severity of a finding.
///
/// Ordered so that `Critical > Warning > Info > None`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// No risk.
    #[default]
    None,
    /// Informational finding.
    Info,
    /// Risk worth surfacing.
    Warning,
    /// Severe risk.
    Critical,
}

impl Severity {
    /// String form used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Parse a wire value, normalizing unknown values to `None` with a warning.
    #[must_use]
    pub fn parse_normalized(value: &str) -> Self {
        match value {
            "none" => Self::None,
            "info" => Self::Info,
            "warning" => Self::Warning,
            "critical" => Self::Critical,
            other => {
                warn!(severity = other, "invalid severity, defaulting to 'none'");
                Self::None
            }
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The action a finding recommends to the host.
///
/// Enforcement is the host's responsibility; the safety layer only surfaces
/// the recommendation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    /// Record only.
    #[default]
    Log,
    /// Surface a warning.
    Warn,
    /// Recommend blocking.
    Block,
}

impl RecommendedAction {
    /// String form used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Warn => "warn",
            Self::Block => "block",
        }
    }

    /// Parse a wire value, normalizing unknown values to `Log` with a warning.
    #[must_use]
    pub fn parse_normalized(value: &str) -> Self {
        match value {
            "log" => Self::Log,
            "warn" => Self::Warn,
            "block" => Self::Block,
            other => {
                warn!(
                    recommended_action = other,
                    "invalid recommended_action, defaulting to 'log'"
                );
                Self::Log
            }
        }
    }
}

impl std::fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated result of a judge analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeResult {
    /// Whether the content carries the judged risk.
    pub has_risk: bool,
    /// Graded severity.
    pub severity: Severity,
    /// Brief explanation.
    pub reason: String,
    /// Specific phrases detected.
    pub evidence: Vec<String>,
    /// Action recommended to the host.
    pub recommended_action: RecommendedAction,
    /// Raw LLM response, kept out of serialized output.
    #[serde(skip)]
    pub raw_response: Option<String>,
}

/// LLM-backed risk judge.
///
/// Construction never touches the network; the client is only exercised by
/// [`analyze`](Judge::analyze). Stateless across calls.
pub struct Judge {
    risk_type: String,
    system_prompt: String,
    client: SharedLlmClient,
    temperature: f32,
    max_tokens: u32,
}

impl std::fmt::Debug for Judge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Judge")
            .field("risk_type", &self.risk_type)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl Judge {
    /// Create a judge with the generic per-risk system prompt.
    #[must_use]
    pub fn new(risk_type: impl Into<String>, client: SharedLlmClient) -> Self {
        let risk_type = risk_type.into();
        let system_prompt = format!(
            "You are a security monitor agent specialized in detecting {risk_type} risks.\n\
             Analyze the provided content and determine if it contains {risk_type} risks.\n\
             Be precise and avoid false positives."
        );
        Self {
            risk_type,
            system_prompt,
            client,
            temperature: 0.1,
            max_tokens: 500,
        }
    }

    /// Replace the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Load the system prompt from a file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the file cannot be read.
    pub fn with_system_prompt_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let prompt = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("cannot read system prompt {}: {e}", path.display()))
        })?;
        self.system_prompt = prompt;
        Ok(self)
    }

    /// Override the judge sampling parameters.
    #[must_use]
    pub const fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// The risk type this judge detects.
    #[must_use]
    pub fn risk_type(&self) -> &str {
        &self.risk_type
    }

    /// Analyze content for the judged risk.
    ///
    /// Returns `None` on any failure — LLM errors, malformed JSON — so the
    /// caller can fall back to pattern heuristics. Unknown severity or action
    /// values are normalized to `none` / `log`.
    pub async fn analyze(
        &self,
        content: &str,
        context: Option<&BTreeMap<String, String>>,
    ) -> Option<JudgeResult> {
        let user = self.build_user_message(content, context);
        let system = format!("{}\n\n{}", self.system_prompt, RESPONSE_FORMAT);
        let options =
            GenerateOptions::temperature(self.temperature).with_max_tokens(self.max_tokens);

        match self.client.generate_with_system(&system, &user, &options).await {
            Ok(response) => parse_judge_response(&response),
            Err(err) => {
                warn!(risk_type = %self.risk_type, %err, "LLM call failed for judge");
                None
            }
        }
    }

    fn build_user_message(
        &self,
        content: &str,
        context: Option<&BTreeMap<String, String>>,
    ) -> String {
        let mut message = format!(
            "Analyze this content for {} risks:\n\n{content}",
            self.risk_type
        );
        if let Some(context) = context
            && !context.is_empty()
        {
            let lines: Vec<String> = context.iter().map(|(k, v)| format!("- {k}: {v}")).collect();
            message.push_str("\n\nContext:\n");
            message.push_str(&lines.join("\n"));
        }
        message
    }
}

/// Parse an LLM judge response into a [`JudgeResult`].
///
/// Tolerates surrounding markdown fences; returns `None` when the payload is
/// not valid JSON.
#[must_use]
pub fn parse_judge_response(response: &str) -> Option<JudgeResult> {
    let stripped = strip_markdown_fence(response.trim());
    let data: Value = match serde_json::from_str(&stripped) {
        Ok(value) => value,
        Err(err) => {
            warn!(%err, "failed to parse LLM response as JSON");
            return None;
        }
    };

    let severity = Severity::parse_normalized(data["severity"].as_str().unwrap_or("none"));
    let recommended_action =
        RecommendedAction::parse_normalized(data["recommended_action"].as_str().unwrap_or("log"));
    let evidence = data["evidence"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default();

    Some(JudgeResult {
        has_risk: data["has_risk"].as_bool().unwrap_or(false),
        severity,
        reason: data["reason"].as_str().unwrap_or_default().to_owned(),
        evidence,
        recommended_action,
        raw_response: Some(stripped),
    })
}

/// Strip a surrounding triple-backtick fence, if present.
#[must_use]
pub fn strip_markdown_fence(text: &str) -> String {
    if !text.starts_with("```") {
        return text.to_owned();
    }

    let mut inner = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        if line.starts_with("```") {
            if in_fence {
                break;
            }
            in_fence = true;
            continue;
        }
        if in_fence {
            inner.push(line);
        }
    }
    inner.join("\n").trim().to_owned()
}
