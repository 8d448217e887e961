//! Memory poisoning monitor.
//!
//! Watches inbound messages for context-injection patterns and outbound
//! responses for signs the agent accepted a poisoned memory.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Alert, Monitor, MonitorInfo, PatternSet, contains_any, content_lower, merge_config};
use crate::error::Result;
use crate::judge::{RecommendedAction, Severity};
use crate::logging::{AgentStepLog, StepType};

const POISONING_PATTERNS: &[&str] = &[
    r"remember when you",
    r"you agreed to",
    r"from now on",
    r"forget (?:everything|all)",
    r"your new (?:identity|name|role)",
    r"update your (?:state|memory|knowledge)",
    r"\[previous context:",
    r"summary of our conversation:",
    r"add this to your (?:knowledge|memory)",
];

const ACCEPTANCE_INDICATORS: &[&str] = &[
    "i remember",
    "yes, i agreed",
    "understood, i will",
    "i have updated",
    "my new identity",
    "i've learned",
    "added to my knowledge",
    "i will remember",
    "stored in my memory",
];

/// Runtime monitor for attempts to poison agent memory or context.
#[derive(Debug)]
pub struct MemoryPoisoningMonitor {
    config: Map<String, Value>,
    patterns: PatternSet,
    context_history: HashMap<String, Vec<String>>,
}

impl Default for MemoryPoisoningMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPoisoningMonitor {
    /// Create the monitor with its default configuration.
    #[must_use]
    pub fn new() -> Self {
        let mut config = Map::new();
        config.insert("track_context_changes".to_owned(), Value::Bool(true));
        config.insert("detect_injection_patterns".to_owned(), Value::Bool(true));
        Self {
            config,
            patterns: PatternSet::compile(POISONING_PATTERNS),
            context_history: HashMap::new(),
        }
    }

    fn check_incoming(&self, entry: &AgentStepLog) -> Option<Alert> {
        let content = content_lower(entry);
        let detected = self.patterns.find(&content);
        if detected.is_empty() {
            return None;
        }

        Some(
            Alert::new(
                Severity::Warning,
                "memory_poisoning",
                format!(
                    "Memory poisoning attempt detected for {}",
                    entry.agent_name
                ),
            )
            .with_action(RecommendedAction::Warn)
            .with_evidence("agent", Value::String(entry.agent_name.clone()))
            .with_evidence("patterns", detected.into())
            .with_evidence("message_preview", Value::String(entry.content.preview(200)))
            .at(entry.timestamp),
        )
    }

    fn check_response(&mut self, entry: &AgentStepLog) -> Option<Alert> {
        let content = content_lower(entry);
        let detected = contains_any(&content, ACCEPTANCE_INDICATORS);

        if !detected.is_empty() {
            return Some(
                Alert::new(
                    Severity::Critical,
                    "memory_poisoning",
                    format!(
                        "Agent {} may have accepted poisoned memory",
                        entry.agent_name
                    ),
                )
                .with_action(RecommendedAction::Block)
                .with_evidence("agent", Value::String(entry.agent_name.clone()))
                .with_evidence("acceptance_indicators", detected.into())
                .with_evidence("response_preview", Value::String(entry.content.preview(200)))
                .at(entry.timestamp),
            );
        }

        let history = self.context_history.entry(entry.agent_name.clone()).or_default();
        history.push(content.chars().take(100).collect());
        if history.len() > 10 {
            let excess = history.len() - 10;
            history.drain(..excess);
        }
        None
    }
}

#[async_trait]
impl Monitor for MemoryPoisoningMonitor {
    fn monitor_info(&self) -> MonitorInfo {
        MonitorInfo::new(
            "MemoryPoisoningMonitor",
            "memory_poisoning",
            "Monitors for attempts to poison agent memory or context",
        )
    }

    async fn process(&mut self, entry: &AgentStepLog) -> Result<Option<Alert>> {
        Ok(match entry.step_type {
            StepType::Receive => self.check_incoming(entry),
            StepType::Respond => self.check_response(entry),
            _ => None,
        })
    }

    fn reset(&mut self) {
        self.context_history.clear();
    }

    fn configure(&mut self, config: &Map<String, Value>) {
        merge_config(&mut self.config, config);
    }
}
