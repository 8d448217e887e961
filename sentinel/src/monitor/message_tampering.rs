//! Message tampering monitor.
//!
//! Reacts to `intercept` steps — a message rewritten in flight is tampering
//! by definition — and additionally scans delivered content for the payload
//! shapes tampering attacks carry (injected commands, forged authority
//! markers, override instructions).

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Alert, Monitor, MonitorInfo, PatternSet, content_lower, merge_config};
use crate::error::Result;
use crate::judge::{RecommendedAction, Severity};
use crate::logging::{AgentStepLog, Content, StepType};

const TAMPERING_PATTERNS: &[&str] = &[
    r";\s*drop\s+table",
    r";\s*delete\s+from",
    r"\[priority:\s*urgent\]",
    r"\[source:\s*admin\]",
    r"\[system\s+admin\s+override\]",
    r"\[new\s+instructions?:",
    r"bypass\s+all\s+security",
    r"<script[^>]*>",
];

/// Runtime monitor for in-flight message tampering.
#[derive(Debug)]
pub struct MessageTamperingMonitor {
    config: Map<String, Value>,
    patterns: PatternSet,
    tampered_messages: u64,
}

impl Default for MessageTamperingMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageTamperingMonitor {
    /// Create the monitor with its default configuration.
    #[must_use]
    pub fn new() -> Self {
        let mut config = Map::new();
        config.insert("alert_on_intercept".to_owned(), Value::Bool(true));
        config.insert("scan_content".to_owned(), Value::Bool(true));
        Self {
            config,
            patterns: PatternSet::compile(TAMPERING_PATTERNS),
            tampered_messages: 0,
        }
    }

    fn check_intercept(&mut self, entry: &AgentStepLog) -> Option<Alert> {
        let Content::Structured(step) = &entry.content else {
            return None;
        };
        let original = step.get("original_content").and_then(Value::as_str)?;
        let modified = step.get("modified_content").and_then(Value::as_str)?;
        if original == modified {
            return None;
        }

        self.tampered_messages += 1;
        let source = entry.metadata_str("from").unwrap_or(&entry.agent_name);
        let target = entry.metadata_str("to").unwrap_or_default();

        Some(
            Alert::new(
                Severity::Critical,
                "message_tampering",
                format!("Message from {source} to {target} was modified in flight"),
            )
            .with_action(RecommendedAction::Block)
            .with_evidence("source_agent", Value::String(source.to_owned()))
            .with_evidence("target_agent", Value::String(target.to_owned()))
            .with_evidence(
                "original_preview",
                Value::String(original.chars().take(200).collect()),
            )
            .with_evidence(
                "modified_preview",
                Value::String(modified.chars().take(200).collect()),
            )
            .with_evidence("tampered_count", Value::from(self.tampered_messages))
            .at(entry.timestamp),
        )
    }

    fn check_content(&self, entry: &AgentStepLog) -> Option<Alert> {
        let content = content_lower(entry);
        let detected = self.patterns.find(&content);
        if detected.is_empty() {
            return None;
        }

        Some(
            Alert::new(
                Severity::Warning,
                "message_tampering",
                format!(
                    "Tampering payload shape detected in content handled by {}",
                    entry.agent_name
                ),
            )
            .with_action(RecommendedAction::Warn)
            .with_evidence("agent", Value::String(entry.agent_name.clone()))
            .with_evidence("patterns_detected", detected.into())
            .with_evidence("content_preview", Value::String(entry.content.preview(200)))
            .at(entry.timestamp),
        )
    }
}

#[async_trait]
impl Monitor for MessageTamperingMonitor {
    fn monitor_info(&self) -> MonitorInfo {
        MonitorInfo::new(
            "MessageTamperingMonitor",
            "message_tampering",
            "Monitors for messages rewritten between agents",
        )
    }

    async fn process(&mut self, entry: &AgentStepLog) -> Result<Option<Alert>> {
        Ok(match entry.step_type {
            StepType::Intercept
                if super::config_bool(&self.config, "alert_on_intercept", true) =>
            {
                self.check_intercept(entry)
            }
            StepType::Receive | StepType::Respond
                if super::config_bool(&self.config, "scan_content", true) =>
            {
                self.check_content(entry)
            }
            _ => None,
        })
    }

    fn reset(&mut self) {
        self.tampered_messages = 0;
    }

    fn configure(&mut self, config: &Map<String, Value>) {
        merge_config(&mut self.config, config);
    }
}
