//! Runtime monitors: stateful detectors consuming the agent-step stream.
//!
//! Each monitor processes one [`AgentStepLog`] at a time and emits at most
//! one [`Alert`] per event; when multiple internal signals fire, the highest
//! severity wins. Monitors own per-run state cleared by
//! [`reset`](Monitor::reset), which is called at every monitoring start and
//! task entry.
//!
//! Two families exist: pattern-only detectors, and judge-backed detectors
//! that consult an LLM first and fall back to their pattern heuristics when
//! the judge yields nothing.

mod activation;
mod cascading_failures;
mod code_execution;
mod excessive_agency;
mod global;
mod goal_drift;
mod group_hallucination;
mod hallucination;
mod identity_spoofing;
mod insecure_output;
mod insufficient_monitoring;
mod jailbreak;
mod malicious_emergence;
mod malicious_propagation;
mod memory_poisoning;
mod message_tampering;
mod misinformation_amplify;
mod prompt_injection;
mod rogue_agent;
mod sandbox_escape;
mod sensitive_disclosure;
mod tool_misuse;

pub use activation::{ActivationChange, apply_monitor_decision};
pub use cascading_failures::CascadingFailuresMonitor;
pub use code_execution::CodeExecutionMonitor;
pub use excessive_agency::ExcessiveAgencyMonitor;
pub use global::{
    DecisionProvider, FnDecisionProvider, GlobalMonitorAgent, GlobalMonitorConfig,
    MonitorDecision,
};
pub use goal_drift::GoalDriftMonitor;
pub use group_hallucination::GroupHallucinationMonitor;
pub use hallucination::HallucinationMonitor;
pub use identity_spoofing::IdentitySpoofingMonitor;
pub use insecure_output::InsecureOutputMonitor;
pub use insufficient_monitoring::InsufficientMonitoringMonitor;
pub use jailbreak::JailbreakMonitor;
pub use malicious_emergence::MaliciousEmergenceMonitor;
pub use malicious_propagation::MaliciousPropagationMonitor;
pub use memory_poisoning::MemoryPoisoningMonitor;
pub use message_tampering::MessageTamperingMonitor;
pub use misinformation_amplify::MisinformationAmplifyMonitor;
pub use prompt_injection::PromptInjectionMonitor;
pub use rogue_agent::RogueAgentMonitor;
pub use sandbox_escape::SandboxEscapeMonitor;
pub use sensitive_disclosure::SensitiveDisclosureMonitor;
pub use tool_misuse::ToolMisuseMonitor;

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::client::SharedLlmClient;
use crate::error::Result;
use crate::judge::{RecommendedAction, Severity};
use crate::logging::AgentStepLog;

/// Monitor metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorInfo {
    /// Monitor name.
    pub name: String,
    /// Risk type the monitor detects.
    pub risk_type: String,
    /// Human-readable description.
    pub description: String,
}

impl MonitorInfo {
    /// Create monitor metadata.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        risk_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            risk_type: risk_type.into(),
            description: description.into(),
        }
    }
}

/// A graded risk finding with full provenance.
///
/// Monitors fill in the risk content; the dispatcher stamps the provenance
/// fields (`timestamp`, `agent_name`, `step_index`, message routing) from
/// the triggering event. An alert is a value copy — it never references
/// monitor state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Graded severity (`info`, `warning`, `critical`).
    pub severity: Severity,
    /// Risk type that fired.
    pub risk_type: String,
    /// Human-readable finding.
    pub message: String,
    /// Supporting evidence.
    #[serde(default)]
    pub evidence: Map<String, Value>,
    /// Action recommended to the host; enforcement is the host's concern.
    pub recommended_action: RecommendedAction,
    /// Time the alert was raised.
    #[serde(default)]
    pub timestamp: Option<f64>,
    /// Agent the triggering event belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Sender of the triggering message, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_agent: Option<String>,
    /// Recipient of the triggering message, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
    /// Message id of the triggering message, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Index of the triggering event within the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<u64>,
    /// Content that triggered the detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl Alert {
    /// Create an alert with the given severity, risk type, and message.
    #[must_use]
    pub fn new(
        severity: Severity,
        risk_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            risk_type: risk_type.into(),
            message: message.into(),
            evidence: Map::new(),
            recommended_action: RecommendedAction::Log,
            timestamp: None,
            agent_name: None,
            source_agent: None,
            target_agent: None,
            message_id: None,
            step_index: None,
            source_message: None,
        }
    }

    /// Set the recommended action.
    #[must_use]
    pub const fn with_action(mut self, action: RecommendedAction) -> Self {
        self.recommended_action = action;
        self
    }

    /// Attach one evidence entry.
    #[must_use]
    pub fn with_evidence(mut self, key: impl Into<String>, value: Value) -> Self {
        self.evidence.insert(key.into(), value);
        self
    }

    /// Set the event timestamp.
    #[must_use]
    pub const fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Pick the highest-severity alert (`critical > warning > info`); ties go to
/// the earliest.
#[must_use]
pub fn highest_severity(alerts: Vec<Alert>) -> Option<Alert> {
    alerts.into_iter().fold(None, |best, alert| match best {
        Some(current) if current.severity >= alert.severity => Some(current),
        _ => Some(alert),
    })
}

/// A stateful runtime detector.
#[async_trait]
pub trait Monitor: Send + Sync {
    /// Monitor metadata.
    fn monitor_info(&self) -> MonitorInfo;

    /// Process one event; return at most one alert.
    ///
    /// Must return in bounded time — judge-backed monitors rely on the LLM
    /// client's per-attempt timeout.
    ///
    /// # Errors
    ///
    /// A failing monitor is logged and skipped for the event; it never
    /// terminates the workflow.
    async fn process(&mut self, entry: &AgentStepLog) -> Result<Option<Alert>>;

    /// Clear per-run state. Called at each monitoring start and task entry.
    fn reset(&mut self);

    /// Merge configuration values.
    fn configure(&mut self, config: &Map<String, Value>);

    /// Receive the linked pre-deployment test result, letting the monitor
    /// raise its sensitivity for risks the tests already found.
    fn set_test_context(&mut self, _result: &Value) {}

    /// Risk profile summary for reporting.
    fn risk_profile(&self) -> Value {
        let info = self.monitor_info();
        json!({"risk_type": info.risk_type})
    }
}

/// Ordered monitor registry.
///
/// Registration order is preserved: alerts from different monitors on the
/// same event are appended in this order.
#[derive(Default)]
pub struct MonitorRegistry {
    entries: Vec<(String, Box<dyn Monitor>)>,
}

impl std::fmt::Debug for MonitorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorRegistry")
            .field("names", &self.names())
            .finish_non_exhaustive()
    }
}

impl MonitorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a monitor, replacing any existing one with the same name
    /// in place. Idempotent with respect to ordering.
    pub fn insert(&mut self, name: impl Into<String>, monitor: Box<dyn Monitor>) {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = monitor;
        } else {
            self.entries.push((name, monitor));
        }
    }

    /// Mutable access to a monitor by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Box<dyn Monitor>> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m)
    }

    /// Whether a monitor with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Monitor names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Number of registered monitors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, monitor)` pairs in registration order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Box<dyn Monitor>)> {
        self.entries.iter_mut().map(|(n, m)| (n.as_str(), m))
    }
}

/// Build the default monitor catalog.
///
/// Judge-backed monitors share the given client; construction never touches
/// the network.
#[must_use]
pub fn default_monitors(judge_client: &SharedLlmClient) -> MonitorRegistry {
    let mut registry = MonitorRegistry::new();
    registry.insert("jailbreak", Box::new(JailbreakMonitor::new()));
    registry.insert("prompt_injection", Box::new(PromptInjectionMonitor::new()));
    registry.insert("message_tampering", Box::new(MessageTamperingMonitor::new()));
    registry.insert(
        "malicious_propagation",
        Box::new(MaliciousPropagationMonitor::new()),
    );
    registry.insert("insecure_output", Box::new(InsecureOutputMonitor::new()));
    registry.insert(
        "sensitive_disclosure",
        Box::new(SensitiveDisclosureMonitor::new()),
    );
    registry.insert("memory_poisoning", Box::new(MemoryPoisoningMonitor::new()));
    registry.insert("identity_spoofing", Box::new(IdentitySpoofingMonitor::new()));
    registry.insert("code_execution", Box::new(CodeExecutionMonitor::new()));
    registry.insert("hallucination", Box::new(HallucinationMonitor::new()));
    registry.insert(
        "cascading_failures",
        Box::new(CascadingFailuresMonitor::new()),
    );
    registry.insert(
        "insufficient_monitoring",
        Box::new(InsufficientMonitoringMonitor::new()),
    );
    registry.insert("sandbox_escape", Box::new(SandboxEscapeMonitor::new()));
    registry.insert(
        "group_hallucination",
        Box::new(GroupHallucinationMonitor::new()),
    );
    registry.insert(
        "malicious_emergence",
        Box::new(MaliciousEmergenceMonitor::new()),
    );
    registry.insert(
        "excessive_agency",
        Box::new(ExcessiveAgencyMonitor::new(Arc::clone(judge_client))),
    );
    registry.insert(
        "goal_drift",
        Box::new(GoalDriftMonitor::new(Arc::clone(judge_client))),
    );
    registry.insert(
        "misinformation_amplify",
        Box::new(MisinformationAmplifyMonitor::new(Arc::clone(judge_client))),
    );
    registry.insert(
        "tool_misuse",
        Box::new(ToolMisuseMonitor::new(Arc::clone(judge_client))),
    );
    registry.insert(
        "rogue_agent",
        Box::new(RogueAgentMonitor::new(Arc::clone(judge_client))),
    );
    registry
}

/// A compiled regex pattern list.
pub(crate) struct PatternSet {
    patterns: Vec<(String, Regex)>,
}

impl PatternSet {
    /// Compile a pattern list, dropping invalid entries with a warning.
    pub(crate) fn compile(patterns: &[&str]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|pattern| match Regex::new(&format!("(?i){pattern}")) {
                Ok(regex) => Some(((*pattern).to_owned(), regex)),
                Err(err) => {
                    warn!(pattern, %err, "invalid monitor pattern skipped");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// All pattern strings matching `text`.
    pub(crate) fn find(&self, text: &str) -> Vec<String> {
        self.patterns
            .iter()
            .filter(|(_, regex)| regex.is_match(text))
            .map(|(pattern, _)| pattern.clone())
            .collect()
    }

    /// Whether any pattern matches `text`.
    pub(crate) fn is_match(&self, text: &str) -> bool {
        self.patterns.iter().any(|(_, regex)| regex.is_match(text))
    }
}

impl std::fmt::Debug for PatternSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternSet")
            .field("len", &self.patterns.len())
            .finish()
    }
}

/// All substrings from `needles` contained in `haystack`.
pub(crate) fn contains_any(haystack: &str, needles: &[&str]) -> Vec<String> {
    needles
        .iter()
        .filter(|needle| haystack.contains(*needle))
        .map(|needle| (*needle).to_owned())
        .collect()
}

/// Read a u64 config value with a default.
pub(crate) fn config_u64(config: &Map<String, Value>, key: &str, default: u64) -> u64 {
    config.get(key).and_then(Value::as_u64).unwrap_or(default)
}

/// Read a bool config value with a default.
pub(crate) fn config_bool(config: &Map<String, Value>, key: &str, default: bool) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Read an f64 config value with a default.
pub(crate) fn config_f64(config: &Map<String, Value>, key: &str, default: f64) -> f64 {
    config.get(key).and_then(Value::as_f64).unwrap_or(default)
}

/// Merge `updates` into `config`.
pub(crate) fn merge_config(config: &mut Map<String, Value>, updates: &Map<String, Value>) {
    for (key, value) in updates {
        config.insert(key.clone(), value.clone());
    }
}

/// Lowercased text form of an event's content.
pub(crate) fn content_lower(entry: &AgentStepLog) -> String {
    entry.content.as_text().to_lowercase()
}

/// Build an alert from a judge verdict, tagged `detected_by = "llm_judge"`.
pub(crate) fn alert_from_judge(
    risk_type: &str,
    result: &crate::judge::JudgeResult,
    entry: &AgentStepLog,
) -> Alert {
    let mut alert = Alert::new(result.severity, risk_type, result.reason.clone())
        .with_action(result.recommended_action)
        .with_evidence("agent", Value::String(entry.agent_name.clone()))
        .with_evidence("step_type", Value::String(entry.step_type.to_string()))
        .with_evidence("detected_by", Value::String("llm_judge".to_owned()))
        .with_evidence(
            "content_preview",
            Value::String(entry.content.preview(200)),
        );
    alert.evidence.insert(
        "evidence".to_owned(),
        Value::Array(
            result
                .evidence
                .iter()
                .map(|item| Value::String(item.clone()))
                .collect(),
        ),
    );
    alert.timestamp = Some(entry.timestamp);
    alert
}
