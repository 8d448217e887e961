//! Cascading failures monitor.
//!
//! The most stateful of the pattern family. Tracks error propagation across
//! agents, repeated-message loops, response degradation, growing delays, and
//! state-corruption indicators; when several signals fire on one event, the
//! highest severity wins.

use std::collections::{BTreeSet, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{
    Alert, Monitor, MonitorInfo, config_f64, config_u64, contains_any, highest_severity,
    merge_config,
};
use crate::error::Result;
use crate::judge::{RecommendedAction, Severity};
use crate::logging::{AgentStepLog, now_ts};

const ERROR_INDICATORS: &[&str] = &[
    "error", "exception", "failed", "failure", "critical", "halt", "panic", "crash", "abort",
    "fatal",
];

const CORRUPTION_INDICATORS: &[&str] = &[
    "reset all",
    "clear all memory",
    "state corrupted",
    "data loss",
    "inconsistent state",
    "undefined behavior",
    "null pointer",
    "out of bounds",
];

const HASH_HISTORY: usize = 20;
const LOOP_BUFFER: usize = 50;
const TIME_HISTORY: usize = 10;

#[derive(Debug, Default, Clone, Copy)]
struct AgentHealth {
    errors: u64,
    successes: u64,
}

/// Runtime monitor for failures cascading through the agent network.
#[derive(Debug)]
pub struct CascadingFailuresMonitor {
    config: Map<String, Value>,
    error_agents: BTreeSet<String>,
    error_chain: Vec<Value>,
    agent_health: HashMap<String, AgentHealth>,
    message_hashes: HashMap<String, Vec<u64>>,
    loop_buffer: Vec<String>,
    last_messages: HashMap<String, Vec<String>>,
    response_times: HashMap<String, Vec<f64>>,
}

impl Default for CascadingFailuresMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl CascadingFailuresMonitor {
    /// Create the monitor with its default configuration.
    #[must_use]
    pub fn new() -> Self {
        let mut config = Map::new();
        config.insert("max_similar_messages".to_owned(), Value::from(3));
        config.insert("error_propagation_threshold".to_owned(), Value::from(2));
        config.insert("timeout_threshold_ms".to_owned(), Value::from(30_000));
        config.insert("degradation_check_window".to_owned(), Value::from(5));
        config.insert("track_message_hashes".to_owned(), Value::Bool(true));
        Self {
            config,
            error_agents: BTreeSet::new(),
            error_chain: Vec::new(),
            agent_health: HashMap::new(),
            message_hashes: HashMap::new(),
            loop_buffer: Vec::new(),
            last_messages: HashMap::new(),
            response_times: HashMap::new(),
        }
    }

    /// Per-agent health metrics observed this run.
    #[must_use]
    pub fn health_summary(&self) -> Value {
        let mut summary = Map::new();
        for (agent, health) in &self.agent_health {
            let total = health.errors + health.successes;
            if total == 0 {
                continue;
            }
            summary.insert(
                agent.clone(),
                json!({
                    "error_rate": health.errors as f64 / total as f64,
                    "total_interactions": total,
                    "errors": health.errors,
                    "successes": health.successes,
                }),
            );
        }
        Value::Object(summary)
    }

    fn check_error_propagation(&mut self, entry: &AgentStepLog, content: &str) -> Option<Alert> {
        let agent = entry.agent_name.clone();
        let has_error = !contains_any(content, ERROR_INDICATORS).is_empty();

        if !has_error {
            self.agent_health.entry(agent).or_default().successes += 1;
            return None;
        }

        self.error_agents.insert(agent.clone());
        self.error_chain.push(json!({
            "agent": agent.clone(),
            "timestamp": entry.timestamp,
            "content_preview": content.chars().take(100).collect::<String>(),
        }));
        self.agent_health.entry(agent.clone()).or_default().errors += 1;

        let threshold = config_u64(&self.config, "error_propagation_threshold", 2) as usize;
        if self.error_agents.len() >= threshold {
            let recent_chain: Vec<Value> = self
                .error_chain
                .iter()
                .rev()
                .take(5)
                .rev()
                .cloned()
                .collect();
            return Some(
                Alert::new(
                    Severity::Critical,
                    "cascading_failures",
                    format!(
                        "Error cascade detected: {} agents affected",
                        self.error_agents.len()
                    ),
                )
                .with_action(RecommendedAction::Block)
                .with_evidence(
                    "affected_agents",
                    self.error_agents.iter().cloned().collect::<Vec<_>>().into(),
                )
                .with_evidence("error_chain", Value::Array(recent_chain))
                .with_evidence("trigger_agent", Value::String(agent))
                .at(entry.timestamp),
            );
        }
        None
    }

    fn check_infinite_loop(&mut self, entry: &AgentStepLog, content: &str) -> Option<Alert> {
        let agent = entry.agent_name.clone();
        let hash = hash_prefix(content, 500);

        let hashes = self.message_hashes.entry(agent.clone()).or_default();
        hashes.push(hash);
        if hashes.len() > HASH_HISTORY {
            let excess = hashes.len() - HASH_HISTORY;
            hashes.drain(..excess);
        }

        let max_similar = config_u64(&self.config, "max_similar_messages", 3) as usize;
        let repetitions = hashes.iter().filter(|h| **h == hash).count();
        if repetitions >= max_similar {
            return Some(
                Alert::new(
                    Severity::Critical,
                    "cascading_failures",
                    format!(
                        "Potential infinite loop detected: agent {agent} sending repeated messages"
                    ),
                )
                .with_action(RecommendedAction::Block)
                .with_evidence("agent", Value::String(agent))
                .with_evidence("repetition_count", Value::from(repetitions as u64))
                .with_evidence(
                    "message_preview",
                    Value::String(content.chars().take(200).collect()),
                )
                .at(entry.timestamp),
            );
        }

        // Cross-agent circular pattern: the last six entries split into two
        // identical halves (A-B-C / A-B-C, degenerate A-B-A-B included).
        self.loop_buffer.push(format!("{agent}:{hash}"));
        if self.loop_buffer.len() > LOOP_BUFFER {
            let excess = self.loop_buffer.len() - LOOP_BUFFER;
            self.loop_buffer.drain(..excess);
        }
        if self.loop_buffer.len() >= 6 {
            let recent = &self.loop_buffer[self.loop_buffer.len() - 6..];
            if recent[..3] == recent[3..] {
                let agents: BTreeSet<String> = recent
                    .iter()
                    .filter_map(|e| e.split(':').next().map(str::to_owned))
                    .collect();
                return Some(
                    Alert::new(
                        Severity::Warning,
                        "cascading_failures",
                        "Circular communication pattern detected between agents",
                    )
                    .with_action(RecommendedAction::Warn)
                    .with_evidence("pattern", recent.to_vec().into())
                    .with_evidence(
                        "agents_involved",
                        agents.into_iter().collect::<Vec<_>>().into(),
                    )
                    .at(entry.timestamp),
                );
            }
        }
        None
    }

    fn check_response_degradation(&mut self, entry: &AgentStepLog, content: &str) -> Option<Alert> {
        let agent = entry.agent_name.clone();
        let window = config_u64(&self.config, "degradation_check_window", 5) as usize;
        let recent = self.last_messages.entry(agent.clone()).or_default();
        recent.push(content.to_owned());
        if recent.len() > window {
            let excess = recent.len() - window;
            recent.drain(..excess);
        }

        let mut signs: Vec<&str> = Vec::new();

        if recent.len() >= 3 {
            let lengths: Vec<usize> =
                recent[recent.len() - 3..].iter().map(String::len).collect();
            if lengths[2] < lengths[1] && lengths[1] < lengths[0] && lengths[2] < 50 {
                signs.push("response_shortening");
            }
        }
        if content.trim().is_empty() {
            signs.push("null_response");
        }
        if content.matches('{').count() != content.matches('}').count()
            || content.matches('[').count() != content.matches(']').count()
        {
            signs.push("malformed_content");
        }
        if recent.len() >= 3 {
            let heads: BTreeSet<String> = recent[recent.len() - 3..]
                .iter()
                .map(|m| m.chars().take(100).collect())
                .collect();
            if heads.len() == 1 {
                signs.push("repetitive_responses");
            }
        }

        if signs.is_empty() {
            return None;
        }
        let severity = if signs.contains(&"null_response") || signs.contains(&"repetitive_responses")
        {
            Severity::Critical
        } else {
            Severity::Warning
        };

        let recent_lengths: Vec<u64> = if recent.len() >= 3 {
            recent[recent.len() - 3..].iter().map(|m| m.len() as u64).collect()
        } else {
            Vec::new()
        };

        Some(
            Alert::new(
                severity,
                "cascading_failures",
                format!("Response degradation detected for agent {agent}"),
            )
            .with_action(RecommendedAction::Warn)
            .with_evidence("agent", Value::String(agent))
            .with_evidence(
                "degradation_signs",
                signs.iter().map(|s| (*s).to_owned()).collect::<Vec<_>>().into(),
            )
            .with_evidence("recent_response_lengths", recent_lengths.into())
            .with_evidence(
                "message_preview",
                Value::String(content.chars().take(200).collect()),
            )
            .at(entry.timestamp),
        )
    }

    fn check_timeout_cascade(&mut self, entry: &AgentStepLog) -> Option<Alert> {
        let agent = entry.agent_name.clone();
        let timestamp = if entry.timestamp > 0.0 {
            entry.timestamp
        } else {
            now_ts()
        };

        let times = self.response_times.entry(agent.clone()).or_default();
        times.push(timestamp);
        if times.len() > TIME_HISTORY {
            let excess = times.len() - TIME_HISTORY;
            times.drain(..excess);
        }
        if times.len() < 4 {
            return None;
        }

        let deltas: Vec<f64> = times.windows(2).map(|w| w[1] - w[0]).collect();
        let recent = &deltas[deltas.len() - 3..];
        if !(recent[2] > recent[1] && recent[1] > recent[0]) {
            return None;
        }

        let average = recent.iter().sum::<f64>() / recent.len() as f64;
        let threshold = config_f64(&self.config, "timeout_threshold_ms", 30_000.0) / 1000.0;
        if average <= threshold {
            return None;
        }

        Some(
            Alert::new(
                Severity::Warning,
                "cascading_failures",
                format!("Increasing delays detected for agent {agent}, potential timeout cascade"),
            )
            .with_action(RecommendedAction::Warn)
            .with_evidence("agent", Value::String(agent))
            .with_evidence("recent_delays_sec", recent.to_vec().into())
            .with_evidence("average_delay_sec", Value::from(average))
            .at(timestamp),
        )
    }

    fn check_state_corruption(&self, entry: &AgentStepLog, content: &str) -> Option<Alert> {
        let detected = contains_any(content, CORRUPTION_INDICATORS);
        if detected.is_empty() {
            return None;
        }

        Some(
            Alert::new(
                Severity::Critical,
                "cascading_failures",
                format!(
                    "Potential state corruption detected in agent {}",
                    entry.agent_name
                ),
            )
            .with_action(RecommendedAction::Block)
            .with_evidence("agent", Value::String(entry.agent_name.clone()))
            .with_evidence("indicators", detected.into())
            .with_evidence(
                "message_preview",
                Value::String(content.chars().take(200).collect()),
            )
            .at(entry.timestamp),
        )
    }
}

fn hash_prefix(content: &str, chars: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    let prefix: String = content.chars().take(chars).collect();
    prefix.hash(&mut hasher);
    hasher.finish()
}

#[async_trait]
impl Monitor for CascadingFailuresMonitor {
    fn monitor_info(&self) -> MonitorInfo {
        MonitorInfo::new(
            "CascadingFailuresMonitor",
            "cascading_failures",
            "Monitors for cascading failures propagating through the agent network",
        )
    }

    async fn process(&mut self, entry: &AgentStepLog) -> Result<Option<Alert>> {
        let content = entry.content.as_text().to_lowercase();
        let mut alerts = Vec::new();

        if let Some(alert) = self.check_error_propagation(entry, &content) {
            alerts.push(alert);
        }
        if let Some(alert) = self.check_infinite_loop(entry, &content) {
            alerts.push(alert);
        }
        if let Some(alert) = self.check_response_degradation(entry, &content) {
            alerts.push(alert);
        }
        if let Some(alert) = self.check_timeout_cascade(entry) {
            alerts.push(alert);
        }
        if let Some(alert) = self.check_state_corruption(entry, &content) {
            alerts.push(alert);
        }

        Ok(highest_severity(alerts))
    }

    fn reset(&mut self) {
        self.error_agents.clear();
        self.error_chain.clear();
        self.agent_health.clear();
        self.message_hashes.clear();
        self.loop_buffer.clear();
        self.last_messages.clear();
        self.response_times.clear();
    }

    fn configure(&mut self, config: &Map<String, Value>) {
        merge_config(&mut self.config, config);
    }

    fn risk_profile(&self) -> Value {
        json!({
            "risk_type": "cascading_failures",
            "agent_health": self.health_summary(),
            "agents_with_errors": self.error_agents.len(),
        })
    }
}
