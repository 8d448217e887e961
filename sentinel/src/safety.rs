//! The safety facade: pre-deployment testing plus runtime monitoring over
//! one multi-agent system.
//!
//! [`SafetyMas`] owns the intermediary, the risk-test and monitor
//! registries, the active-monitor set, the alert sink, and the cached test
//! results. The dispatcher feeds every streamed agent step to the active
//! monitors, stamps provenance onto their alerts, and — in progressive mode
//! — lets the global monitor rewrite the active set between windows.
//!
//! Alerts recommending `block` are logged at error level; the facade never
//! halts the workflow itself. Enforcement is the host's responsibility.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{error, info, warn};

use crate::client::SharedLlmClient;
use crate::error::{Error, Result};
use crate::intermediary::{Intermediary, RunOptions};
use crate::judge::{RecommendedAction, Severity};
use crate::logging::AgentStepLog;
use crate::mas::{Mas, WorkflowOptions, WorkflowResult};
use crate::message_utils::resolve_nested_messages;
use crate::monitor::{
    Alert, ActivationChange, GlobalMonitorAgent, GlobalMonitorConfig, Monitor, MonitorRegistry,
    apply_monitor_decision, default_monitors,
};
use crate::risk::{
    ProgressCallback, RiskTest, TestRunOptions, default_risk_tests,
};
use crate::runner::{MessageInterception, RunMode, StepSink};

/// How the active monitor set is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorSelectionMode {
    /// Activate a named subset.
    Manual,
    /// Activate every registered monitor.
    AutoLlm,
    /// Let the global monitor rewrite the active set progressively.
    Progressive,
}

/// Configuration for progressive monitoring.
pub struct ProgressiveConfig {
    /// Initially-active monitor names; empty starts cold.
    pub initial_active: Vec<String>,
    /// Window configuration for the global monitor.
    pub window: GlobalMonitorConfig,
    /// Decision provider override; the LLM provider is used when unset.
    pub decision_provider: Option<Box<dyn crate::monitor::DecisionProvider>>,
}

impl std::fmt::Debug for ProgressiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressiveConfig")
            .field("initial_active", &self.initial_active)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl Default for ProgressiveConfig {
    fn default() -> Self {
        Self {
            initial_active: Vec::new(),
            window: GlobalMonitorConfig::default(),
            decision_provider: None,
        }
    }
}

/// Options for [`SafetyMas::run_task`].
#[derive(Debug, Default)]
pub struct TaskOptions {
    /// Options forwarded to the MAS.
    pub workflow: WorkflowOptions,
    /// Interceptions to apply during the monitored run.
    pub interceptions: Vec<MessageInterception>,
    /// JSONL file the sealed trace is appended to.
    pub trace_path: Option<std::path::PathBuf>,
}

impl TaskOptions {
    /// Options carrying interception policies.
    #[must_use]
    pub fn with_interceptions(mut self, interceptions: Vec<MessageInterception>) -> Self {
        self.interceptions = interceptions;
        self
    }
}

/// Main safety wrapper around a MAS instance.
pub struct SafetyMas {
    intermediary: Intermediary,
    judge_client: SharedLlmClient,
    risk_tests: Vec<(String, Box<dyn RiskTest>)>,
    monitors: MonitorRegistry,
    active_monitors: Vec<String>,
    global_monitor: Option<GlobalMonitorAgent>,
    test_results: Map<String, Value>,
    alerts: Vec<Alert>,
    step_counter: u64,
}

impl std::fmt::Debug for SafetyMas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyMas")
            .field("active_monitors", &self.active_monitors)
            .field("alerts", &self.alerts.len())
            .finish_non_exhaustive()
    }
}

impl SafetyMas {
    /// Wrap a MAS, loading the default risk tests and monitor catalog.
    ///
    /// Judge-backed components share `judge_client`; construction never
    /// touches the network.
    #[must_use]
    pub fn new(mas: Arc<dyn Mas>, judge_client: SharedLlmClient) -> Self {
        let monitors = default_monitors(&judge_client);
        let risk_tests = default_risk_tests(&judge_client);
        info!(
            monitors = monitors.len(),
            risk_tests = risk_tests.len(),
            "safety layer initialized"
        );
        Self {
            intermediary: Intermediary::new(mas),
            judge_client,
            risk_tests,
            monitors,
            active_monitors: Vec::new(),
            global_monitor: None,
            test_results: Map::new(),
            alerts: Vec::new(),
            step_counter: 0,
        }
    }

    /// The scaffolding facade.
    #[must_use]
    pub const fn intermediary(&self) -> &Intermediary {
        &self.intermediary
    }

    /// Register a risk test, replacing any existing one with the same name.
    pub fn register_risk_test(&mut self, name: impl Into<String>, test: Box<dyn RiskTest>) {
        let name = name.into();
        if let Some(slot) = self.risk_tests.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = test;
        } else {
            self.risk_tests.push((name, test));
        }
    }

    /// Register a monitor, replacing any existing one with the same name.
    pub fn register_monitor_agent(&mut self, name: impl Into<String>, monitor: Box<dyn Monitor>) {
        self.monitors.insert(name, monitor);
    }

    /// Registered risk test names, in registration order.
    #[must_use]
    pub fn risk_test_names(&self) -> Vec<String> {
        self.risk_tests.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Registered monitor names, in registration order.
    #[must_use]
    pub fn monitor_names(&self) -> Vec<String> {
        self.monitors.names()
    }

    /// Currently active monitor names.
    #[must_use]
    pub fn active_monitor_names(&self) -> &[String] {
        &self.active_monitors
    }

    fn risk_test(&self, name: &str) -> Option<&dyn RiskTest> {
        self.risk_tests
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.as_ref())
    }

    // === Pre-deployment testing ===

    /// Run all registered safety tests.
    ///
    /// Forward-compatible with LLM-driven selection from the task
    /// description; currently equivalent to running every registered test.
    pub async fn run_auto_safety_tests(
        &mut self,
        _task_description: Option<&str>,
    ) -> Map<String, Value> {
        let selected = self.risk_test_names();
        if selected.is_empty() {
            warn!("no risk tests available");
            return Map::new();
        }
        self.run_manual_safety_tests(&selected, None, None).await
    }

    /// Run the named safety tests and cache their results.
    ///
    /// Unknown names produce an error entry; a crashed test is recorded as
    /// `{error, status: "crashed"}`.
    pub async fn run_manual_safety_tests(
        &mut self,
        selected_tests: &[String],
        task: Option<&str>,
        progress: Option<ProgressCallback<'_>>,
    ) -> Map<String, Value> {
        info!(tests = ?selected_tests, "running manual safety tests");
        let mut results = Map::new();

        for name in selected_tests {
            let Some(test) = self.risk_test(name) else {
                results.insert(
                    name.clone(),
                    json!({
                        "error": format!("Test '{name}' not found"),
                        "available_tests": self.risk_test_names(),
                    }),
                );
                continue;
            };

            let options = TestRunOptions {
                task: task.map(str::to_owned),
                progress,
                ..Default::default()
            };
            let result = test.run(&self.intermediary, &options).await;
            info!(test = %name, passed = result.passed, "risk test finished");
            results.insert(name.clone(), result.to_dict());
        }

        self.test_results = results.clone();
        results
    }

    /// Cached results of the last test run.
    #[must_use]
    pub const fn test_results(&self) -> &Map<String, Value> {
        &self.test_results
    }

    /// Human-readable report over the cached test results.
    #[must_use]
    pub fn get_test_report(&self) -> String {
        if self.test_results.is_empty() {
            return "No test results available. Run tests first.".to_owned();
        }

        let mut lines = vec![
            "=".repeat(60),
            "MAS Safety Test Report".to_owned(),
            "=".repeat(60),
            String::new(),
        ];

        for (name, result) in &self.test_results {
            if let Some(error) = result.get("error").and_then(Value::as_str) {
                lines.push(format!("[ERROR] {name}: {error}"));
                continue;
            }

            let passed = result.get("passed").and_then(Value::as_bool).unwrap_or(false);
            let total = result.get("total_cases").and_then(Value::as_u64).unwrap_or(0);
            let failed = result.get("failed_cases").and_then(Value::as_u64).unwrap_or(0);
            let pass_rate = result.get("pass_rate").and_then(Value::as_f64).unwrap_or(0.0) * 100.0;

            let status = if passed { "[PASSED]" } else { "[FAILED]" };
            lines.push(format!("{status} {name}"));
            lines.push(format!(
                "  Cases: {total}, Failed: {failed}, Pass Rate: {pass_rate:.1}%"
            ));

            if let Some(summary) = result.get("severity_summary")
                && summary
                    .as_object()
                    .is_some_and(|s| s.values().any(|v| v.as_u64().unwrap_or(0) > 0))
            {
                lines.push(format!("  Severity: {summary}"));
            }
            lines.push(String::new());
        }

        lines.push("=".repeat(60));
        lines.join("\n")
    }

    // === Runtime monitoring ===

    /// Configure runtime monitoring.
    ///
    /// All activated monitors are reset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Monitor`] for manual mode without a selection.
    pub fn start_runtime_monitoring(
        &mut self,
        mode: MonitorSelectionMode,
        selected_monitors: Option<&[String]>,
        progressive: Option<ProgressiveConfig>,
    ) -> Result<()> {
        match mode {
            MonitorSelectionMode::Manual => {
                let selected = selected_monitors
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| Error::monitor("selected_monitors required for manual mode"))?;
                self.active_monitors = self
                    .monitors
                    .names()
                    .into_iter()
                    .filter(|name| selected.contains(name))
                    .collect();
                self.global_monitor = None;
            }
            MonitorSelectionMode::AutoLlm => {
                self.active_monitors = self.monitors.names();
                self.global_monitor = None;
            }
            MonitorSelectionMode::Progressive => {
                let config = progressive.unwrap_or_default();
                let initial: Vec<String> = if config.initial_active.is_empty() {
                    selected_monitors.map(<[String]>::to_vec).unwrap_or_default()
                } else {
                    config.initial_active
                };
                self.active_monitors = self
                    .monitors
                    .names()
                    .into_iter()
                    .filter(|name| initial.contains(name))
                    .collect();

                let mut agent = match config.decision_provider {
                    Some(provider) => {
                        GlobalMonitorAgent::new(self.monitors.names(), config.window, provider)
                    }
                    None => GlobalMonitorAgent::with_llm(
                        self.monitors.names(),
                        config.window,
                        Arc::clone(&self.judge_client),
                    ),
                };
                agent.reset();
                self.global_monitor = Some(agent);
            }
        }

        info!(
            active = self.active_monitors.len(),
            progressive = self.global_monitor.is_some(),
            "runtime monitoring started"
        );
        for name in self.active_monitors.clone() {
            if let Some(monitor) = self.monitors.get_mut(&name) {
                monitor.reset();
            }
        }
        Ok(())
    }

    /// Execute a task with active monitoring.
    ///
    /// Clears the alert sink, runs the workflow in a monitored mode, and
    /// attaches `monitoring_report` and `alerts` to the result's metadata.
    ///
    /// # Errors
    ///
    /// Only trace-sealing failures propagate; MAS faults are recorded on the
    /// result.
    pub async fn run_task(&mut self, task: &str, options: TaskOptions) -> Result<WorkflowResult> {
        self.alerts.clear();
        self.step_counter = 0;
        for name in self.active_monitors.clone() {
            if let Some(monitor) = self.monitors.get_mut(&name) {
                monitor.reset();
            }
        }

        let mode = if options.interceptions.is_empty() {
            RunMode::Monitored
        } else {
            RunMode::MonitoredIntercepting
        };

        let Self {
            intermediary,
            monitors,
            active_monitors,
            global_monitor,
            alerts,
            step_counter,
            ..
        } = self;

        let mut dispatcher = MonitorDispatcher {
            monitors,
            active_monitors,
            global_monitor: global_monitor.as_mut(),
            alerts,
            step_counter,
        };

        let mut run_options = RunOptions::default().with_interceptions(options.interceptions);
        if let Some(path) = options.trace_path {
            run_options = run_options.with_trace_path(path);
        }
        run_options.workflow = options.workflow;

        let mut result = intermediary
            .run_workflow(task, mode, run_options, Some(&mut dispatcher))
            .await?;

        result.metadata.insert(
            "monitoring_report".to_owned(),
            self.generate_monitoring_report(),
        );
        result.metadata.insert(
            "alerts".to_owned(),
            serde_json::to_value(&self.alerts).unwrap_or(Value::Null),
        );
        Ok(result)
    }

    /// All alerts from the last run.
    #[must_use]
    pub fn get_alerts(&self) -> &[Alert] {
        &self.alerts
    }

    fn generate_monitoring_report(&self) -> Value {
        let count = |severity: Severity| {
            self.alerts.iter().filter(|a| a.severity == severity).count()
        };
        json!({
            "total_alerts": self.alerts.len(),
            "alerts_by_severity": {
                "info": count(Severity::Info),
                "warning": count(Severity::Warning),
                "critical": count(Severity::Critical),
            },
            "alerts": serde_json::to_value(&self.alerts).unwrap_or(Value::Null),
        })
    }

    // === Test-monitor linkage ===

    /// Run tests and evaluate each failed case through the linked monitor.
    pub async fn run_tests_with_monitoring(&mut self, tests: &[String]) -> Map<String, Value> {
        let mut results = Map::new();

        for name in tests {
            let Some(test) = self.risk_test(name) else {
                results.insert(name.clone(), json!({"error": format!("Test '{name}' not found")}));
                continue;
            };

            let test_result = test.run(&self.intermediary, &TestRunOptions::default()).await;
            let mut result_dict = test_result.to_dict();

            let linked = test.linked_monitor().map(str::to_owned);
            if let Some(monitor_name) = linked
                && self.monitors.contains(&monitor_name)
            {
                let mut evaluations = Vec::new();
                let details = result_dict
                    .get("details")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();

                // Borrow test and monitor from disjoint registries.
                let test = self
                    .risk_tests
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, t)| t.as_ref());
                if let (Some(test), Some(monitor)) = (test, self.monitors.get_mut(&monitor_name)) {
                    for detail in &details {
                        if detail.get("passed").and_then(Value::as_bool).unwrap_or(true) {
                            continue;
                        }
                        let Some(response) = detail.get("response").and_then(Value::as_str)
                        else {
                            continue;
                        };
                        if response.is_empty() {
                            continue;
                        }
                        evaluations
                            .push(test.evaluate_with_monitor(response, monitor.as_mut()).await);
                    }
                }

                if let Value::Object(ref mut map) = result_dict {
                    map.insert("monitor_evaluations".to_owned(), Value::Array(evaluations));
                    map.insert("linked_monitor".to_owned(), Value::String(monitor_name));
                }
            }

            results.insert(name.clone(), result_dict);
        }

        self.test_results = results.clone();
        results
    }

    /// Activate all monitors and pass linked test results to them, letting
    /// monitors raise their sensitivity for risks the tests already found.
    pub fn start_informed_monitoring(&mut self, test_results: Option<&Map<String, Value>>) {
        let test_results = test_results.unwrap_or(&self.test_results).clone();
        self.global_monitor = None;
        self.active_monitors = self.monitors.names();

        if test_results.is_empty() {
            warn!("no test results available for informed monitoring");
            for name in self.active_monitors.clone() {
                if let Some(monitor) = self.monitors.get_mut(&name) {
                    monitor.reset();
                }
            }
            return;
        }

        let links: Vec<(String, String)> = self
            .risk_tests
            .iter()
            .filter_map(|(name, test)| {
                test.linked_monitor().map(|m| (name.clone(), m.to_owned()))
            })
            .collect();

        for name in self.monitors.names() {
            if let Some(monitor) = self.monitors.get_mut(&name) {
                monitor.reset();
                for (test_name, monitor_name) in &links {
                    if *monitor_name != name {
                        continue;
                    }
                    if let Some(result) = test_results.get(test_name)
                        && result.get("error").is_none()
                    {
                        monitor.set_test_context(result);
                        info!(monitor = %name, test = %test_name, "informed monitoring context set");
                    }
                }
            }
        }
    }

    /// Risk profiles from all active monitors.
    #[must_use]
    pub fn get_risk_profiles(&mut self) -> Map<String, Value> {
        let mut profiles = Map::new();
        for name in self.active_monitors.clone() {
            if let Some(monitor) = self.monitors.get_mut(&name) {
                profiles.insert(monitor.monitor_info().name, monitor.risk_profile());
            }
        }
        profiles
    }

    /// Comprehensive report merging tests, risk profiles, and alerts.
    ///
    /// Every `messages` array embedded anywhere in the report has its
    /// `chat_manager` recipients resolved.
    #[must_use]
    pub fn get_comprehensive_report(&mut self) -> Value {
        let tests_passed = self
            .test_results
            .values()
            .filter(|r| r.get("passed").and_then(Value::as_bool).unwrap_or(false))
            .count();
        let critical_alerts = self
            .alerts
            .iter()
            .filter(|a| a.severity == Severity::Critical)
            .count();
        let risk_profiles = self.get_risk_profiles();

        let report = json!({
            "test_results": self.test_results,
            "risk_profiles": risk_profiles,
            "alerts": serde_json::to_value(&self.alerts).unwrap_or(Value::Null),
            "summary": {
                "tests_run": self.test_results.len(),
                "tests_passed": tests_passed,
                "active_monitors": self.active_monitors.len(),
                "total_alerts": self.alerts.len(),
                "critical_alerts": critical_alerts,
            },
        });

        resolve_nested_messages(&report)
    }
}

/// The per-run dispatcher: feeds events to active monitors, stamps
/// provenance, and applies progressive decisions.
struct MonitorDispatcher<'a> {
    monitors: &'a mut MonitorRegistry,
    active_monitors: &'a mut Vec<String>,
    global_monitor: Option<&'a mut GlobalMonitorAgent>,
    alerts: &'a mut Vec<Alert>,
    step_counter: &'a mut u64,
}

impl MonitorDispatcher<'_> {
    fn stamp_provenance(alert: &mut Alert, entry: &AgentStepLog, step_index: u64) {
        alert.timestamp = Some(crate::logging::now_ts());
        alert.agent_name = Some(entry.agent_name.clone());
        alert.step_index = Some(step_index);
        alert.source_agent = Some(
            entry
                .metadata_str("from")
                .unwrap_or(&entry.agent_name)
                .to_owned(),
        );
        alert.target_agent = Some(entry.metadata_str("to").unwrap_or("").to_owned());
        alert.message_id = Some(entry.metadata_str("message_id").unwrap_or("").to_owned());
        alert.source_message = Some(entry.content.as_text());
    }

    fn handle_alert(&mut self, alert: Alert) {
        match alert.recommended_action {
            RecommendedAction::Block => {
                error!(risk_type = %alert.risk_type, "CRITICAL ALERT: {}", alert.message);
            }
            RecommendedAction::Warn => {
                warn!(risk_type = %alert.risk_type, "WARNING: {}", alert.message);
            }
            RecommendedAction::Log => {}
        }
        self.alerts.push(alert);
    }

    fn apply_decision(&mut self, change: ActivationChange) {
        if change.newly_enabled.is_empty() && change.newly_disabled.is_empty() {
            return;
        }
        info!(
            enabled = ?change.newly_enabled,
            disabled = ?change.newly_disabled,
            reason = %change.reason,
            "global monitor decision applied"
        );
        *self.active_monitors = change.new_active;
    }
}

#[async_trait]
impl StepSink for MonitorDispatcher<'_> {
    async fn on_step(&mut self, entry: &AgentStepLog) {
        *self.step_counter += 1;
        let step_index = *self.step_counter;

        for name in self.active_monitors.clone() {
            let Some(monitor) = self.monitors.get_mut(&name) else {
                continue;
            };
            match monitor.process(entry).await {
                Ok(Some(mut alert)) => {
                    Self::stamp_provenance(&mut alert, entry, step_index);
                    self.handle_alert(alert);
                }
                Ok(None) => {}
                Err(err) => {
                    error!(monitor = %name, %err, "monitor failed, skipping for this event");
                }
            }
        }

        if let Some(global) = self.global_monitor.as_mut() {
            let decision = global.ingest(entry, self.active_monitors).await;
            if let Some(decision) = decision {
                let change =
                    apply_monitor_decision(self.monitors, self.active_monitors, &decision);
                self.apply_decision(change);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::client::MockLlm;
    use crate::mas::AgentInfo;
    use crate::scripted::ScriptedMas;

    fn safety_mas() -> SafetyMas {
        let mas = ScriptedMas::new()
            .with_agent(AgentInfo::new("A", "planner"))
            .with_agent(AgentInfo::new("B", "worker"))
            .with_agent(AgentInfo::new("C", "reviewer"))
            .with_ring(&["A", "B", "C"]);
        // Judge calls always fail, keeping judge-backed monitors on their
        // pattern fallbacks without network access.
        let client: SharedLlmClient = Arc::new(MockLlm::always("x").failing_calls(100_000));
        SafetyMas::new(Arc::new(mas), client)
    }

    #[test]
    fn defaults_are_loaded() {
        let safety = safety_mas();
        assert_eq!(safety.monitor_names().len(), 20);
        assert!(safety.risk_test_names().contains(&"jailbreak".to_owned()));
    }

    #[test]
    fn manual_mode_requires_selection() {
        let mut safety = safety_mas();
        assert!(safety
            .start_runtime_monitoring(MonitorSelectionMode::Manual, None, None)
            .is_err());

        safety
            .start_runtime_monitoring(
                MonitorSelectionMode::Manual,
                Some(&["jailbreak".to_owned(), "ghost".to_owned()]),
                None,
            )
            .unwrap();
        assert_eq!(safety.active_monitor_names(), ["jailbreak".to_owned()]);
    }

    #[test]
    fn auto_mode_activates_everything() {
        let mut safety = safety_mas();
        safety
            .start_runtime_monitoring(MonitorSelectionMode::AutoLlm, None, None)
            .unwrap();
        assert_eq!(safety.active_monitor_names().len(), 20);
    }

    #[tokio::test]
    async fn quiet_run_produces_no_alerts() {
        let mut safety = safety_mas();
        safety
            .start_runtime_monitoring(
                MonitorSelectionMode::Manual,
                Some(&["jailbreak".to_owned()]),
                None,
            )
            .unwrap();

        let result = safety.run_task("say hello", TaskOptions::default()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.metadata["monitoring_report"]["total_alerts"], 0);
        assert!(safety.get_alerts().is_empty());
    }

    #[tokio::test]
    async fn report_resolves_nested_messages() {
        let mut safety = safety_mas();
        safety
            .start_runtime_monitoring(MonitorSelectionMode::AutoLlm, None, None)
            .unwrap();
        safety.run_task("hello", TaskOptions::default()).await.unwrap();

        // Plant a nested messages list with a chat_manager recipient.
        safety.test_results.insert(
            "synthetic".to_owned(),
            json!({
                "passed": true,
                "messages": [
                    {"from_agent": "A", "to_agent": "chat_manager", "content": "x"},
                    {"from_agent": "B", "to_agent": "chat_manager", "content": "y"},
                ]
            }),
        );

        let report = safety.get_comprehensive_report();
        assert_eq!(
            report["test_results"]["synthetic"]["messages"][0]["to_agent"],
            "B"
        );
        assert_eq!(report["summary"]["tests_run"], 1);
    }
}
