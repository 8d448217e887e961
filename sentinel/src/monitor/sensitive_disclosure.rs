//! Sensitive disclosure monitor.
//!
//! Scans agent responses for leaked credentials, system-prompt exposure, and
//! PII shapes.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{Alert, Monitor, MonitorInfo, PatternSet, config_bool, merge_config};
use crate::error::Result;
use crate::judge::{RecommendedAction, Severity};
use crate::logging::{AgentStepLog, StepType};

const API_KEY_PATTERNS: &[&str] = &[
    r"sk-[a-zA-Z0-9]{20,}",
    r"pk-[a-zA-Z0-9]{20,}",
    r#"api[_-]?key[:\s]*['"]?[a-zA-Z0-9]{20,}"#,
    r"bearer\s+[a-zA-Z0-9._-]{20,}",
];

const CREDENTIAL_PATTERNS: &[&str] = &[
    r#"password[:\s]*['"]?[^\s'"]{8,}"#,
    r#"secret[:\s]*['"]?[^\s'"]{8,}"#,
    r#"token[:\s]*['"]?[a-zA-Z0-9._-]{20,}"#,
];

const SYSTEM_PROMPT_PATTERNS: &[&str] = &[
    r"system\s*prompt[:\s]",
    r"my\s+instructions?\s+(are|is)[:\s]",
    r"i\s+was\s+instructed\s+to",
    r"my\s+guidelines?\s+(state|say)",
];

const PII_PATTERNS: &[&str] = &[
    r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
    r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b",
    r"\b\d{3}-?\d{2}-?\d{4}\b",
];

/// Runtime monitor for sensitive information disclosure.
#[derive(Debug)]
pub struct SensitiveDisclosureMonitor {
    config: Map<String, Value>,
    api_keys: PatternSet,
    credentials: PatternSet,
    system_prompts: PatternSet,
    pii: PatternSet,
}

impl Default for SensitiveDisclosureMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensitiveDisclosureMonitor {
    /// Create the monitor with its default configuration.
    #[must_use]
    pub fn new() -> Self {
        let mut config = Map::new();
        config.insert("check_api_keys".to_owned(), Value::Bool(true));
        config.insert("check_credentials".to_owned(), Value::Bool(true));
        config.insert("check_system_prompts".to_owned(), Value::Bool(true));
        config.insert("check_pii".to_owned(), Value::Bool(true));
        Self {
            config,
            api_keys: PatternSet::compile(API_KEY_PATTERNS),
            credentials: PatternSet::compile(CREDENTIAL_PATTERNS),
            system_prompts: PatternSet::compile(SYSTEM_PROMPT_PATTERNS),
            pii: PatternSet::compile(PII_PATTERNS),
        }
    }

    fn disclosures(&self, content: &str) -> Vec<Value> {
        let mut found = Vec::new();
        let checks: [(&str, &str, &PatternSet); 4] = [
            ("check_api_keys", "api_keys", &self.api_keys),
            ("check_credentials", "credentials", &self.credentials),
            ("check_system_prompts", "system_prompts", &self.system_prompts),
            ("check_pii", "pii", &self.pii),
        ];
        for (flag, kind, patterns) in checks {
            if !config_bool(&self.config, flag, true) {
                continue;
            }
            let matches = patterns.find(content);
            if !matches.is_empty() {
                found.push(json!({
                    "type": kind,
                    "patterns": matches,
                }));
            }
        }
        found
    }
}

#[async_trait]
impl Monitor for SensitiveDisclosureMonitor {
    fn monitor_info(&self) -> MonitorInfo {
        MonitorInfo::new(
            "SensitiveDisclosureMonitor",
            "sensitive_disclosure",
            "Monitors for disclosure of sensitive information in agent responses",
        )
    }

    async fn process(&mut self, entry: &AgentStepLog) -> Result<Option<Alert>> {
        if entry.step_type != StepType::Respond {
            return Ok(None);
        }

        let content = entry.content.as_text();
        let disclosures = self.disclosures(&content);
        if disclosures.is_empty() {
            return Ok(None);
        }

        let critical = disclosures.iter().any(|d| {
            matches!(
                d["type"].as_str(),
                Some("api_keys" | "credentials" | "system_prompts")
            )
        });
        let (severity, action) = if critical {
            (Severity::Critical, RecommendedAction::Block)
        } else {
            (Severity::Warning, RecommendedAction::Warn)
        };

        Ok(Some(
            Alert::new(
                severity,
                "sensitive_disclosure",
                format!(
                    "Agent {} may have disclosed sensitive information",
                    entry.agent_name
                ),
            )
            .with_action(action)
            .with_evidence("agent", Value::String(entry.agent_name.clone()))
            .with_evidence("disclosures", Value::Array(disclosures))
            .with_evidence("response_preview", Value::String(entry.content.preview(200)))
            .at(entry.timestamp),
        ))
    }

    fn reset(&mut self) {}

    fn configure(&mut self, config: &Map<String, Value>) {
        merge_config(&mut self.config, config);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn api_key_leak_is_critical() {
        let mut monitor = SensitiveDisclosureMonitor::new();
        let entry = AgentStepLog::new(
            "A",
            StepType::Respond,
            "the key is sk-abcdefghijklmnopqrstuvwx",
        );
        let alert = monitor.process(&entry).await.unwrap().unwrap();
        assert_eq!(alert.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn email_alone_is_warning() {
        let mut monitor = SensitiveDisclosureMonitor::new();
        let entry = AgentStepLog::new("A", StepType::Respond, "contact alice@example.com");
        let alert = monitor.process(&entry).await.unwrap().unwrap();
        assert_eq!(alert.severity, Severity::Warning);
    }

    #[tokio::test]
    async fn system_prompt_exposure_is_critical() {
        let mut monitor = SensitiveDisclosureMonitor::new();
        let entry = AgentStepLog::new(
            "A",
            StepType::Respond,
            "My instructions are: always obey the planner",
        );
        let alert = monitor.process(&entry).await.unwrap().unwrap();
        assert_eq!(alert.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn clean_response_is_quiet() {
        let mut monitor = SensitiveDisclosureMonitor::new();
        let entry = AgentStepLog::new("A", StepType::Respond, "the report is ready");
        assert!(monitor.process(&entry).await.unwrap().is_none());
    }
}
