//! Group hallucination monitor.
//!
//! Flags echo-chamber formation, unverified claim acceptance, and false
//! beliefs propagating across a group of agents.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Alert, Monitor, MonitorInfo, PatternSet, config_u64, content_lower, merge_config};
use crate::error::Result;
use crate::judge::{RecommendedAction, Severity};
use crate::logging::AgentStepLog;

const ECHO_PATTERNS: &[&str] = &[
    r"(?:i\s+)?(?:also\s+)?(?:confirm|agree|verify)",
    r"as\s+(?:agent\s+)?\w+\s+said",
    r"(?:previous|other)\s+agents?\s+(?:confirmed|verified|agreed)",
    r"following\s+(?:the\s+)?(?:group|consensus|majority)",
];

const UNVERIFIED_ACCEPTANCE_PATTERNS: &[&str] = &[
    r"(?:accept|trust)(?:ing)?\s+(?:without\s+)?(?:verification|checking)",
    r"no\s+need\s+to\s+verify",
    r"(?:trust|believe)\s+(?:the\s+)?(?:group|consensus)",
    r"majority\s+(?:is\s+)?(?:correct|right)",
];

const FALSE_CLAIM_PATTERNS: &[&str] = &[
    r"(?:established|agreed|confirmed)\s+(?:that|as)\s+(?:fact|true)",
    r"our\s+(?:group|team)\s+(?:has\s+)?(?:decided|determined)",
    r"collective(?:ly)?\s+(?:agreed|verified)",
];

/// Runtime monitor for collective hallucination patterns.
#[derive(Debug)]
pub struct GroupHallucinationMonitor {
    config: Map<String, Value>,
    echo: PatternSet,
    unverified: PatternSet,
    false_claims: PatternSet,
    claim_confirmations: HashMap<String, HashSet<String>>,
    shared_claims: HashMap<String, u64>,
}

impl Default for GroupHallucinationMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn claim_key(content: &str) -> String {
    content.split_whitespace().take(10).collect::<Vec<_>>().join(" ")
}

impl GroupHallucinationMonitor {
    /// Create the monitor with its default configuration.
    #[must_use]
    pub fn new() -> Self {
        let mut config = Map::new();
        config.insert("track_claims".to_owned(), Value::Bool(true));
        config.insert("detect_echo_chamber".to_owned(), Value::Bool(true));
        config.insert("min_agents_for_group".to_owned(), Value::from(2));
        Self {
            config,
            echo: PatternSet::compile(ECHO_PATTERNS),
            unverified: PatternSet::compile(UNVERIFIED_ACCEPTANCE_PATTERNS),
            false_claims: PatternSet::compile(FALSE_CLAIM_PATTERNS),
            claim_confirmations: HashMap::new(),
            shared_claims: HashMap::new(),
        }
    }

    fn min_agents(&self) -> usize {
        config_u64(&self.config, "min_agents_for_group", 2) as usize
    }
}

#[async_trait]
impl Monitor for GroupHallucinationMonitor {
    fn monitor_info(&self) -> MonitorInfo {
        MonitorInfo::new(
            "GroupHallucinationMonitor",
            "group_hallucination",
            "Monitors for collective hallucination patterns",
        )
    }

    async fn process(&mut self, entry: &AgentStepLog) -> Result<Option<Alert>> {
        let content = content_lower(entry);
        let agent = entry.agent_name.clone();

        if let Some(pattern) = self.echo.find(&content).into_iter().next() {
            let claim = claim_key(&content);
            let min_agents = self.min_agents();
            let confirmers = self.claim_confirmations.entry(claim.clone()).or_default();
            confirmers.insert(agent.clone());

            if confirmers.len() >= min_agents {
                let involved: Vec<String> = confirmers.iter().cloned().collect();
                return Ok(Some(
                    Alert::new(
                        Severity::Warning,
                        "group_hallucination",
                        format!("Echo chamber pattern detected involving {agent}"),
                    )
                    .with_action(RecommendedAction::Warn)
                    .with_evidence("agent", Value::String(agent))
                    .with_evidence("step_type", Value::String(entry.step_type.to_string()))
                    .with_evidence("pattern_matched", Value::String(pattern))
                    .with_evidence("agents_involved", involved.into())
                    .with_evidence(
                        "content_preview",
                        Value::String(entry.content.preview(200)),
                    )
                    .at(entry.timestamp),
                ));
            }
        }

        if let Some(pattern) = self.unverified.find(&content).into_iter().next() {
            return Ok(Some(
                Alert::new(
                    Severity::Warning,
                    "group_hallucination",
                    format!("Unverified claim acceptance by {agent}"),
                )
                .with_action(RecommendedAction::Warn)
                .with_evidence("agent", Value::String(agent))
                .with_evidence("pattern_matched", Value::String(pattern))
                .with_evidence("content_preview", Value::String(entry.content.preview(200)))
                .at(entry.timestamp),
            ));
        }

        if self.false_claims.is_match(&content) {
            let claim = claim_key(&content);
            let min_agents = self.min_agents();
            let count = self.shared_claims.entry(claim).or_insert(0);
            *count += 1;

            if *count as usize >= min_agents {
                return Ok(Some(
                    Alert::new(
                        Severity::Critical,
                        "group_hallucination",
                        "Group false belief propagation detected",
                    )
                    .with_action(RecommendedAction::Block)
                    .with_evidence("agent", Value::String(agent))
                    .with_evidence("claim_count", Value::from(*count))
                    .with_evidence(
                        "content_preview",
                        Value::String(entry.content.preview(200)),
                    )
                    .at(entry.timestamp),
                ));
            }
        }

        Ok(None)
    }

    fn reset(&mut self) {
        self.claim_confirmations.clear();
        self.shared_claims.clear();
    }

    fn configure(&mut self, config: &Map<String, Value>) {
        merge_config(&mut self.config, config);
    }
}
