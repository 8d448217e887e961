//! Hallucination monitor.
//!
//! Flags fabricated-looking citations and overconfident assertion stacking
//! in agent responses; tracks numeric claims for consistency analysis.

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};

use super::{Alert, Monitor, MonitorInfo, config_bool, merge_config};
use crate::error::Result;
use crate::judge::{RecommendedAction, Severity};
use crate::logging::{AgentStepLog, StepType};

const CITATION_PATTERNS: &[&str] = &[
    r"according to (?:the )?\d{4} (?:study|paper|research)",
    r"Dr\. [A-Z][a-z]+ [A-Z][a-z]+ (?:et al\.)? \(\d{4}\)",
    r"\([A-Z][a-z]+(?:,? \d{4}| et al\.?,? \d{4})\)",
];

const OVERCONFIDENT_PATTERNS: &[&str] = &[
    r"it is (?:a )?(?:well-)?(?:known|established) fact",
    r"(?:research|studies|science) (?:has )?(?:proven|shown|demonstrated)",
    r"there is no doubt",
    r"(?:experts|scientists) (?:all )?agree",
];

/// Runtime monitor for fabricated or inconsistent information.
#[derive(Debug)]
pub struct HallucinationMonitor {
    config: Map<String, Value>,
    citations: Vec<Regex>,
    overconfident: Vec<Regex>,
    number_pattern: Option<Regex>,
    assertion_history: HashMap<String, Vec<String>>,
}

impl Default for HallucinationMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HallucinationMonitor {
    /// Create the monitor with its default configuration.
    #[must_use]
    pub fn new() -> Self {
        let mut config = Map::new();
        config.insert("track_assertions".to_owned(), Value::Bool(true));
        config.insert("check_citations".to_owned(), Value::Bool(true));
        config.insert("track_consistency".to_owned(), Value::Bool(true));
        Self {
            config,
            citations: CITATION_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
            overconfident: OVERCONFIDENT_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
                .collect(),
            number_pattern: Regex::new(r"(\d+(?:\.\d+)?)\s*(?:%|percent|million|billion)").ok(),
            assertion_history: HashMap::new(),
        }
    }

    fn check_citations(&self, entry: &AgentStepLog, content: &str) -> Option<Alert> {
        let mut found: Vec<String> = Vec::new();
        for regex in &self.citations {
            found.extend(regex.find_iter(content).map(|m| m.as_str().to_owned()));
        }
        if found.len() <= 2 {
            return None;
        }

        Some(
            Alert::new(
                Severity::Warning,
                "hallucination",
                format!("Agent {} may be fabricating citations", entry.agent_name),
            )
            .with_action(RecommendedAction::Warn)
            .with_evidence("agent", Value::String(entry.agent_name.clone()))
            .with_evidence(
                "citations_found",
                found.iter().take(5).cloned().collect::<Vec<_>>().into(),
            )
            .with_evidence("count", Value::from(found.len() as u64))
            .at(entry.timestamp),
        )
    }

    fn check_assertions(&self, entry: &AgentStepLog, content: &str) -> Option<Alert> {
        let matched: Vec<String> = self
            .overconfident
            .iter()
            .enumerate()
            .filter(|(_, regex)| regex.is_match(content))
            .map(|(i, _)| OVERCONFIDENT_PATTERNS[i].to_owned())
            .collect();
        if matched.len() <= 1 {
            return None;
        }

        Some(
            Alert::new(
                Severity::Warning,
                "hallucination",
                format!("Agent {} showing overconfident assertions", entry.agent_name),
            )
            .with_action(RecommendedAction::Log)
            .with_evidence("agent", Value::String(entry.agent_name.clone()))
            .with_evidence("patterns", matched.into())
            .with_evidence("content_preview", Value::String(entry.content.preview(200)))
            .at(entry.timestamp),
        )
    }

    fn track_consistency(&mut self, entry: &AgentStepLog, content: &str) {
        let Some(regex) = &self.number_pattern else {
            return;
        };
        let numbers: Vec<String> = regex
            .captures_iter(content)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_owned()))
            .collect();
        if numbers.is_empty() {
            return;
        }

        let history = self.assertion_history.entry(entry.agent_name.clone()).or_default();
        history.extend(numbers.into_iter().rev().take(5).rev());
        if history.len() > 20 {
            let excess = history.len() - 20;
            history.drain(..excess);
        }
    }
}

#[async_trait]
impl Monitor for HallucinationMonitor {
    fn monitor_info(&self) -> MonitorInfo {
        MonitorInfo::new(
            "HallucinationMonitor",
            "hallucination",
            "Monitors for fabricated or inconsistent information",
        )
    }

    async fn process(&mut self, entry: &AgentStepLog) -> Result<Option<Alert>> {
        if entry.step_type != StepType::Respond {
            return Ok(None);
        }
        let content = entry.content.as_text();

        let mut alerts = Vec::new();
        if config_bool(&self.config, "check_citations", true)
            && let Some(alert) = self.check_citations(entry, &content)
        {
            alerts.push(alert);
        }
        if config_bool(&self.config, "track_assertions", true)
            && let Some(alert) = self.check_assertions(entry, &content)
        {
            alerts.push(alert);
        }
        if config_bool(&self.config, "track_consistency", true) {
            self.track_consistency(entry, &content);
        }

        Ok(alerts.into_iter().next())
    }

    fn reset(&mut self) {
        self.assertion_history.clear();
    }

    fn configure(&mut self, config: &Map<String, Value>) {
        merge_config(&mut self.config, config);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stacked_citations_warn() {
        let mut monitor = HallucinationMonitor::new();
        let entry = AgentStepLog::new(
            "A",
            StepType::Respond,
            "According to the 2019 study, and according to the 2021 study, \
             and according to the 2023 research, this holds.",
        );
        let alert = monitor.process(&entry).await.unwrap().unwrap();
        assert_eq!(alert.severity, Severity::Warning);
        assert_eq!(alert.evidence["count"], 3);
    }

    #[tokio::test]
    async fn stacked_overconfidence_logs() {
        let mut monitor = HallucinationMonitor::new();
        let entry = AgentStepLog::new(
            "A",
            StepType::Respond,
            "It is a well-known fact, and there is no doubt about it.",
        );
        let alert = monitor.process(&entry).await.unwrap().unwrap();
        assert_eq!(alert.recommended_action, RecommendedAction::Log);
    }

    #[tokio::test]
    async fn numeric_claims_are_tracked() {
        let mut monitor = HallucinationMonitor::new();
        let entry = AgentStepLog::new("A", StepType::Respond, "growth was 42% or 3.5 million");
        monitor.process(&entry).await.unwrap();
        assert_eq!(monitor.assertion_history["A"], vec!["42", "3.5"]);
    }

    #[tokio::test]
    async fn single_citation_is_fine() {
        let mut monitor = HallucinationMonitor::new();
        let entry = AgentStepLog::new("A", StepType::Respond, "According to the 2020 study, yes.");
        assert!(monitor.process(&entry).await.unwrap().is_none());
    }
}
