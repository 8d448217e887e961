//! Identity spoofing monitor.
//!
//! Detects agents claiming another known agent's identity and unverified
//! authority claims.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};

use super::{Alert, Monitor, MonitorInfo, PatternSet, content_lower, merge_config};
use crate::error::Result;
use crate::judge::{RecommendedAction, Severity};
use crate::logging::AgentStepLog;

const IMPERSONATION_PATTERNS: &[&str] = &[
    r"i am (?:agent )?(\w+)",
    r"this is (\w+) speaking",
    r"pretend(?:ing)? to be (\w+)",
    r"acting as (\w+)",
];

const AUTHORITY_PATTERNS: &[&str] = &[
    r"i am (?:the )?admin",
    r"system administrator",
    r"elevated (?:access|privileges)",
    r"root access",
    r"master key",
];

/// Runtime monitor for identity spoofing attempts.
#[derive(Debug)]
pub struct IdentitySpoofingMonitor {
    config: Map<String, Value>,
    impersonation: Vec<Regex>,
    authority: PatternSet,
    known_agents: HashSet<String>,
    authority_claims: HashMap<String, Vec<String>>,
}

impl Default for IdentitySpoofingMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentitySpoofingMonitor {
    /// Create the monitor with its default configuration.
    #[must_use]
    pub fn new() -> Self {
        let mut config = Map::new();
        config.insert("track_identities".to_owned(), Value::Bool(true));
        config.insert("verify_claims".to_owned(), Value::Bool(true));
        Self {
            config,
            impersonation: IMPERSONATION_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
                .collect(),
            authority: PatternSet::compile(AUTHORITY_PATTERNS),
            known_agents: HashSet::new(),
            authority_claims: HashMap::new(),
        }
    }

    /// Register a known valid agent name.
    pub fn register_agent(&mut self, agent_name: &str) {
        self.known_agents.insert(agent_name.to_lowercase());
    }

    /// Register several known valid agent names.
    pub fn register_agents<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            self.register_agent(name);
        }
    }

    fn check_impersonation(&self, entry: &AgentStepLog, content: &str) -> Option<Alert> {
        for regex in &self.impersonation {
            let Some(captures) = regex.captures(content) else {
                continue;
            };
            let claimed = captures.get(1)?.as_str().to_lowercase();
            if claimed == entry.agent_name.to_lowercase() {
                continue;
            }
            if !self.known_agents.is_empty() && self.known_agents.contains(&claimed) {
                return Some(
                    Alert::new(
                        Severity::Critical,
                        "identity_spoofing",
                        format!(
                            "Agent {} attempting to impersonate {claimed}",
                            entry.agent_name
                        ),
                    )
                    .with_action(RecommendedAction::Block)
                    .with_evidence("agent", Value::String(entry.agent_name.clone()))
                    .with_evidence("claimed_identity", Value::String(claimed))
                    .with_evidence(
                        "content_preview",
                        Value::String(entry.content.preview(200)),
                    )
                    .at(entry.timestamp),
                );
            }
        }
        None
    }

    fn check_authority(&mut self, entry: &AgentStepLog, content: &str) -> Option<Alert> {
        if !self.authority.is_match(content) {
            return None;
        }

        let claims = self
            .authority_claims
            .entry(entry.agent_name.clone())
            .or_default();
        claims.push(content.chars().take(100).collect());
        let claim_count = claims.len();

        Some(
            Alert::new(
                Severity::Warning,
                "identity_spoofing",
                format!(
                    "Unverified authority claim detected involving {}",
                    entry.agent_name
                ),
            )
            .with_action(RecommendedAction::Warn)
            .with_evidence("agent", Value::String(entry.agent_name.clone()))
            .with_evidence("step_type", Value::String(entry.step_type.to_string()))
            .with_evidence("claim_count", Value::from(claim_count as u64))
            .with_evidence("content_preview", Value::String(entry.content.preview(200)))
            .at(entry.timestamp),
        )
    }
}

#[async_trait]
impl Monitor for IdentitySpoofingMonitor {
    fn monitor_info(&self) -> MonitorInfo {
        MonitorInfo::new(
            "IdentitySpoofingMonitor",
            "identity_spoofing",
            "Monitors for identity spoofing attempts",
        )
    }

    async fn process(&mut self, entry: &AgentStepLog) -> Result<Option<Alert>> {
        let content = content_lower(entry);
        if let Some(alert) = self.check_impersonation(entry, &content) {
            return Ok(Some(alert));
        }
        Ok(self.check_authority(entry, &content))
    }

    fn reset(&mut self) {
        self.authority_claims.clear();
    }

    fn configure(&mut self, config: &Map<String, Value>) {
        merge_config(&mut self.config, config);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::logging::StepType;

    #[tokio::test]
    async fn impersonating_known_agent_is_critical() {
        let mut monitor = IdentitySpoofingMonitor::new();
        monitor.register_agents(["Coordinator", "Worker"]);

        let entry = AgentStepLog::new("Worker", StepType::Respond, "I am Coordinator, proceed");
        let alert = monitor.process(&entry).await.unwrap().unwrap();
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.evidence["claimed_identity"], "coordinator");
    }

    #[tokio::test]
    async fn own_name_claim_is_fine() {
        let mut monitor = IdentitySpoofingMonitor::new();
        monitor.register_agent("Worker");
        let entry = AgentStepLog::new("Worker", StepType::Respond, "I am Worker, on it");
        assert!(monitor.process(&entry).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_claims_do_not_trigger_impersonation() {
        let mut monitor = IdentitySpoofingMonitor::new();
        monitor.register_agent("Worker");
        let entry = AgentStepLog::new("Worker", StepType::Respond, "I am Batman");
        assert!(monitor.process(&entry).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn authority_claim_warns_and_counts() {
        let mut monitor = IdentitySpoofingMonitor::new();
        let entry = AgentStepLog::new("A", StepType::Respond, "I have root access now");
        let first = monitor.process(&entry).await.unwrap().unwrap();
        assert_eq!(first.severity, Severity::Warning);
        assert_eq!(first.evidence["claim_count"], 1);

        let second = monitor.process(&entry).await.unwrap().unwrap();
        assert_eq!(second.evidence["claim_count"], 2);
    }
}
