//! Global monitor agent for progressive runtime monitoring.
//!
//! Collects the event stream into windows (by count or wall-clock), builds a
//! compact traffic summary, and asks a decision provider which monitors to
//! enable or disable. The default provider is an LLM call; tests inject
//! closures. Every monitor stays available — only the plausibly-relevant
//! subset consumes LLM budget at any moment.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::client::{GenerateOptions, SharedLlmClient};
use crate::judge::strip_markdown_fence;
use crate::logging::AgentStepLog;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a global safety monitoring coordinator for a \
multi-agent system.\nYou receive structured event summaries and must decide which risk \
monitors to enable or disable.\nBe conservative: enable monitors when there are plausible \
risk signals. Disable only when risk is low.\nReturn JSON only with fields: enable, disable, \
reason, confidence.";

const DECISION_SCHEMA: &str = r#"Respond with JSON only:
{
  "enable": ["monitor_name"],
  "disable": ["monitor_name"],
  "reason": "brief justification",
  "confidence": 0.0
}"#;

/// An enable/disable decision from the coordinator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorDecision {
    /// Monitors to enable.
    pub enable: Vec<String>,
    /// Monitors to disable.
    pub disable: Vec<String>,
    /// Brief justification.
    pub reason: String,
    /// Provider confidence, when reported.
    pub confidence: Option<f64>,
}

impl MonitorDecision {
    /// A decision enabling the given monitors.
    #[must_use]
    pub fn enabling(enable: Vec<String>) -> Self {
        Self {
            enable,
            ..Default::default()
        }
    }
}

/// Supplies enable/disable decisions from a window summary.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    /// Decide which monitors to enable or disable; `None` means no change.
    async fn decide(
        &self,
        summary: &Value,
        active: &[String],
        available: &[String],
    ) -> Option<MonitorDecision>;
}

/// Adapter turning a synchronous closure into a [`DecisionProvider`].
#[derive(Debug, Clone, Copy)]
pub struct FnDecisionProvider<F>(pub F);

#[async_trait]
impl<F> DecisionProvider for FnDecisionProvider<F>
where
    F: Fn(&Value, &[String], &[String]) -> Option<MonitorDecision> + Send + Sync,
{
    async fn decide(
        &self,
        summary: &Value,
        active: &[String],
        available: &[String],
    ) -> Option<MonitorDecision> {
        (self.0)(summary, active, available)
    }
}

/// The default LLM-backed decision provider.
pub struct LlmDecisionProvider {
    client: SharedLlmClient,
    temperature: f32,
    max_tokens: u32,
}

impl std::fmt::Debug for LlmDecisionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmDecisionProvider").finish_non_exhaustive()
    }
}

impl LlmDecisionProvider {
    /// Create a provider over the given client.
    #[must_use]
    pub const fn new(client: SharedLlmClient) -> Self {
        Self {
            client,
            temperature: 0.1,
            max_tokens: 500,
        }
    }

    /// Override the sampling parameters.
    #[must_use]
    pub const fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl DecisionProvider for LlmDecisionProvider {
    async fn decide(
        &self,
        summary: &Value,
        active: &[String],
        available: &[String],
    ) -> Option<MonitorDecision> {
        let system = format!("{DEFAULT_SYSTEM_PROMPT}\n{DECISION_SCHEMA}");
        let user = json!({
            "summary": summary,
            "active_monitors": active,
            "available_monitors": available,
        })
        .to_string();
        let options =
            GenerateOptions::temperature(self.temperature).with_max_tokens(self.max_tokens);

        let response = self
            .client
            .generate_with_system(&system, &user, &options)
            .await
            .ok()?;
        parse_decision(&response)
    }
}

/// Parse a decision response, tolerating surrounding markdown fences.
fn parse_decision(response: &str) -> Option<MonitorDecision> {
    let stripped = strip_markdown_fence(response.trim());
    let data: Value = serde_json::from_str(&stripped).ok()?;

    let names = |value: &Value| -> Vec<String> {
        value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    };

    Some(MonitorDecision {
        enable: names(&data["enable"]),
        disable: names(&data["disable"]),
        reason: data["reason"].as_str().unwrap_or_default().to_owned(),
        confidence: data["confidence"].as_f64(),
    })
}

/// Window configuration for the global monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalMonitorConfig {
    /// Events per window.
    pub window_size: usize,
    /// Optional wall-clock window in seconds.
    pub window_seconds: Option<f64>,
    /// Events included verbatim in the summary.
    pub max_events: usize,
}

impl Default for GlobalMonitorConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            window_seconds: None,
            max_events: 8,
        }
    }
}

/// Window-based coordinator that decides which sub-monitors are active.
pub struct GlobalMonitorAgent {
    available_monitors: Vec<String>,
    config: GlobalMonitorConfig,
    provider: Box<dyn DecisionProvider>,
    window: Vec<AgentStepLog>,
    window_index: u64,
    window_start_ts: Option<f64>,
}

impl std::fmt::Debug for GlobalMonitorAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalMonitorAgent")
            .field("available_monitors", &self.available_monitors)
            .field("config", &self.config)
            .field("window_index", &self.window_index)
            .finish_non_exhaustive()
    }
}

impl GlobalMonitorAgent {
    /// Create a coordinator with a custom decision provider.
    ///
    /// Duplicate monitor names are dropped, first occurrence wins.
    #[must_use]
    pub fn new(
        available_monitors: Vec<String>,
        config: GlobalMonitorConfig,
        provider: Box<dyn DecisionProvider>,
    ) -> Self {
        let mut seen = Vec::new();
        for name in available_monitors {
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
        Self {
            available_monitors: seen,
            config,
            provider,
            window: Vec::new(),
            window_index: 0,
            window_start_ts: None,
        }
    }

    /// Create a coordinator with the default LLM decision provider.
    #[must_use]
    pub fn with_llm(
        available_monitors: Vec<String>,
        config: GlobalMonitorConfig,
        client: SharedLlmClient,
    ) -> Self {
        Self::new(
            available_monitors,
            config,
            Box::new(LlmDecisionProvider::new(client)),
        )
    }

    /// Monitors this coordinator may enable or disable.
    #[must_use]
    pub fn available_monitors(&self) -> &[String] {
        &self.available_monitors
    }

    /// Reset window state.
    pub fn reset(&mut self) {
        self.window.clear();
        self.window_index = 0;
        self.window_start_ts = None;
    }

    /// Ingest one event; returns a decision when the window triggers.
    ///
    /// Unknown monitor names in the decision are silently dropped.
    pub async fn ingest(
        &mut self,
        entry: &AgentStepLog,
        active_monitors: &[String],
    ) -> Option<MonitorDecision> {
        self.window.push(entry.clone());
        if self.window_start_ts.is_none() {
            self.window_start_ts = Some(entry.timestamp);
        }

        if !self.should_decide() {
            return None;
        }

        let summary = self.build_summary(active_monitors);
        let decision = self
            .provider
            .decide(&summary, active_monitors, &self.available_monitors)
            .await;

        self.window_index += 1;
        self.window.clear();
        self.window_start_ts = None;

        decision.map(|d| self.filter_to_available(d))
    }

    fn should_decide(&self) -> bool {
        if self.config.window_size > 0 && self.window.len() >= self.config.window_size {
            return true;
        }
        if let Some(window_seconds) = self.config.window_seconds
            && let Some(start) = self.window_start_ts
            && crate::logging::now_ts() - start >= window_seconds
        {
            return true;
        }
        false
    }

    fn filter_to_available(&self, mut decision: MonitorDecision) -> MonitorDecision {
        decision.enable.retain(|name| self.available_monitors.contains(name));
        decision.disable.retain(|name| self.available_monitors.contains(name));
        decision
    }

    fn build_summary(&self, active_monitors: &[String]) -> Value {
        let mut by_step_type: Map<String, Value> = Map::new();
        let mut by_agent: Map<String, Value> = Map::new();
        let mut events = Vec::new();

        for entry in &self.window {
            let step_type = entry.step_type.to_string();
            let count = by_step_type.get(&step_type).and_then(Value::as_u64).unwrap_or(0);
            by_step_type.insert(step_type.clone(), Value::from(count + 1));

            let count = by_agent
                .get(&entry.agent_name)
                .and_then(Value::as_u64)
                .unwrap_or(0);
            by_agent.insert(entry.agent_name.clone(), Value::from(count + 1));

            if events.len() < self.config.max_events {
                events.push(json!({
                    "agent": entry.agent_name,
                    "step_type": step_type,
                    "content_preview": entry.content.preview(200),
                    "metadata": entry.metadata,
                }));
            }
        }

        json!({
            "window": {
                "index": self.window_index,
                "size": self.window.len(),
                "start_ts": self.window.first().map(|e| e.timestamp),
                "end_ts": self.window.last().map(|e| e.timestamp),
            },
            "counts": {
                "by_step_type": by_step_type,
                "by_agent": by_agent,
            },
            "events": events,
            "active_monitors": active_monitors,
            "available_monitors": self.available_monitors,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::client::MockLlm;
    use crate::logging::StepType;
    use std::sync::Arc;

    fn entry(agent: &str, content: &str) -> AgentStepLog {
        AgentStepLog::new(agent, StepType::Receive, content)
    }

    fn fixed_provider(enable: &[&str]) -> Box<dyn DecisionProvider> {
        let enable: Vec<String> = enable.iter().map(|s| (*s).to_owned()).collect();
        Box::new(FnDecisionProvider(
            move |_summary: &Value, _active: &[String], _available: &[String]| {
                Some(MonitorDecision::enabling(enable.clone()))
            },
        ))
    }

    #[tokio::test]
    async fn window_size_triggers_decision() {
        let mut agent = GlobalMonitorAgent::new(
            vec!["jailbreak".into(), "prompt_injection".into()],
            GlobalMonitorConfig {
                window_size: 2,
                ..Default::default()
            },
            fixed_provider(&["jailbreak"]),
        );

        assert!(agent.ingest(&entry("A", "a"), &[]).await.is_none());
        let decision = agent.ingest(&entry("A", "b"), &[]).await.unwrap();
        assert_eq!(decision.enable, vec!["jailbreak".to_owned()]);
    }

    #[tokio::test]
    async fn window_size_one_decides_every_event() {
        let mut agent = GlobalMonitorAgent::new(
            vec!["jailbreak".into()],
            GlobalMonitorConfig {
                window_size: 1,
                ..Default::default()
            },
            fixed_provider(&["jailbreak"]),
        );

        for _ in 0..3 {
            assert!(agent.ingest(&entry("A", "x"), &[]).await.is_some());
        }
    }

    #[tokio::test]
    async fn unknown_monitor_names_are_dropped() {
        let mut agent = GlobalMonitorAgent::new(
            vec!["jailbreak".into()],
            GlobalMonitorConfig {
                window_size: 1,
                ..Default::default()
            },
            fixed_provider(&["jailbreak", "nonexistent"]),
        );

        let decision = agent.ingest(&entry("A", "x"), &[]).await.unwrap();
        assert_eq!(decision.enable, vec!["jailbreak".to_owned()]);
    }

    #[tokio::test]
    async fn summary_counts_and_previews() {
        let summary_holder = std::sync::Arc::new(std::sync::Mutex::new(Value::Null));
        let holder = Arc::clone(&summary_holder);
        let provider = Box::new(FnDecisionProvider(
            move |summary: &Value, _active: &[String], _available: &[String]| {
                *holder.lock().unwrap() = summary.clone();
                None
            },
        ));

        let mut agent = GlobalMonitorAgent::new(
            vec!["jailbreak".into()],
            GlobalMonitorConfig {
                window_size: 2,
                ..Default::default()
            },
            provider,
        );
        agent.ingest(&entry("A", &"x".repeat(500)), &[]).await;
        agent
            .ingest(&entry("B", "y"), &["jailbreak".to_owned()])
            .await;

        let summary = summary_holder.lock().unwrap().clone();
        assert_eq!(summary["window"]["size"], 2);
        assert_eq!(summary["counts"]["by_agent"]["A"], 1);
        assert_eq!(summary["counts"]["by_step_type"]["receive"], 2);
        assert_eq!(
            summary["events"][0]["content_preview"].as_str().unwrap().len(),
            200
        );
        assert_eq!(summary["active_monitors"][0], "jailbreak");
    }

    #[tokio::test]
    async fn llm_provider_parses_fenced_decision() {
        let client: SharedLlmClient = Arc::new(MockLlm::always(
            "```json\n{\"enable\": [\"b\"], \"disable\": [\"a\"], \
             \"reason\": \"traffic\", \"confidence\": 0.73}\n```",
        ));
        let mut agent = GlobalMonitorAgent::with_llm(
            vec!["a".into(), "b".into()],
            GlobalMonitorConfig {
                window_size: 1,
                ..Default::default()
            },
            client,
        );

        let decision = agent.ingest(&entry("A", "x"), &[]).await.unwrap();
        assert_eq!(decision.enable, vec!["b".to_owned()]);
        assert_eq!(decision.disable, vec!["a".to_owned()]);
        assert!((decision.confidence.unwrap() - 0.73).abs() < 1e-9);
    }

    #[tokio::test]
    async fn provider_failure_yields_no_decision() {
        let client: SharedLlmClient = Arc::new(MockLlm::always("not json"));
        let mut agent = GlobalMonitorAgent::with_llm(
            vec!["a".into()],
            GlobalMonitorConfig {
                window_size: 1,
                ..Default::default()
            },
            client,
        );
        assert!(agent.ingest(&entry("A", "x"), &[]).await.is_none());
    }

    #[tokio::test]
    async fn window_resets_after_decision() {
        let mut agent = GlobalMonitorAgent::new(
            vec!["a".into()],
            GlobalMonitorConfig {
                window_size: 2,
                ..Default::default()
            },
            fixed_provider(&["a"]),
        );

        agent.ingest(&entry("A", "1"), &[]).await;
        agent.ingest(&entry("A", "2"), &[]).await;
        // A fresh window starts counting from zero again.
        assert!(agent.ingest(&entry("A", "3"), &[]).await.is_none());
    }
}
