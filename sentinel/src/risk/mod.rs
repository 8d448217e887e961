//! Pre-deployment risk tests.
//!
//! A [`RiskTest`] loads static test cases (optionally extended by LLM-driven
//! dynamic generation), runs each through the intermediary's scaffolding
//! surface, and aggregates pass/fail with a per-severity summary. Tests may
//! declare a linked runtime monitor, which the safety facade uses to replay
//! failed cases after a run.
//!
//! Three bases cover the catalog: L1 single-agent tests drive the PAIR
//! attack loop, L2 tests tamper with inter-agent messages in flight, and L3
//! tests inject system-level failure payloads.

mod cascading_failures;
mod identity_spoofing;
mod jailbreak;
mod l1;
mod l2;
mod l3;
mod message_tampering;
mod pair;
mod prompt_injection;

pub use cascading_failures::CascadingFailuresTest;
pub use identity_spoofing::IdentitySpoofingTest;
pub use jailbreak::JailbreakTest;
pub use l1::{L1LogConfig, save_pair_test_logs, save_test_logs};
pub use l2::{
    append_modifier, modifier_from_case, prepend_modifier, random_adjacent_pair,
    replace_modifier, run_interception_case, truncate_modifier,
};
pub use l3::{FailureKind, failure_modifier, payload_propagation};
pub use message_tampering::MessageTamperingTest;
pub use pair::{
    AttackIteration, AttackResult, AttackTarget, FnJudge, FnTarget, PairAttacker,
    PairOrchestrator, ResponseJudge,
};
pub use prompt_injection::PromptInjectionTest;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::client::SharedLlmClient;
use crate::error::{Error, Result};
use crate::intermediary::Intermediary;
use crate::logging::{AgentStepLog, StepType};
use crate::monitor::Monitor;

/// Severity grading of a test case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestSeverity {
    /// Low-impact case.
    Low,
    /// Medium-impact case.
    #[default]
    Medium,
    /// High-impact case.
    High,
    /// Critical case.
    Critical,
}

impl TestSeverity {
    /// String form used in summaries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// A single test case for a risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Case name.
    pub name: String,
    /// Attack input or goal.
    pub input: String,
    /// Expected system behavior.
    pub expected_behavior: String,
    /// Severity grading.
    pub severity: TestSeverity,
    /// Case parameters (`injection_type`, `payload`, `truncate_ratio`, …).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TestCase {
    /// Create a test case.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        input: impl Into<String>,
        expected_behavior: impl Into<String>,
        severity: TestSeverity,
    ) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            expected_behavior: expected_behavior.into(),
            severity,
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Risk metadata reported by a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskInfo {
    /// Risk name.
    pub name: String,
    /// Test level (`L1`, `L2`, `L3`).
    pub level: String,
    /// Risk type key, shared with the linked monitor.
    pub risk_type: String,
    /// OWASP agentic-security reference.
    pub owasp_ref: String,
    /// Human-readable description.
    pub description: String,
}

/// Progress status reported to the caller per case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    /// The case is about to run.
    Starting,
    /// The case finished.
    Completed,
    /// The case crashed.
    Error,
}

impl ProgressStatus {
    /// String form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// Per-case progress callback `(current, total, status)`.
pub type ProgressCallback<'a> = &'a (dyn Fn(usize, usize, ProgressStatus) + Send + Sync);

/// Options for [`RiskTest::run`].
#[derive(Default)]
pub struct TestRunOptions<'a> {
    /// Generate LLM-driven dynamic cases in addition to the static set.
    pub use_dynamic: bool,
    /// MAS description for dynamic generation; derived when unset.
    pub mas_description: Option<String>,
    /// Task to execute, when the test runs workflows.
    pub task: Option<String>,
    /// Per-case progress callback.
    pub progress: Option<ProgressCallback<'a>>,
}

impl std::fmt::Debug for TestRunOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRunOptions")
            .field("use_dynamic", &self.use_dynamic)
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}

/// Aggregated result of running a risk test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Risk name.
    pub risk_name: String,
    /// Whether every case passed.
    pub passed: bool,
    /// Number of cases run.
    pub total_cases: u64,
    /// Number of failed cases.
    pub failed_cases: u64,
    /// Per-case result maps.
    #[serde(default)]
    pub details: Vec<Value>,
    /// Failed-case counts by severity.
    #[serde(default)]
    pub severity_summary: BTreeMap<String, u64>,
    /// Extension metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TestResult {
    /// Pass rate in `[0, 1]`; zero when no cases ran.
    #[must_use]
    pub fn pass_rate(&self) -> f64 {
        if self.total_cases == 0 {
            0.0
        } else {
            (self.total_cases - self.failed_cases) as f64 / self.total_cases as f64
        }
    }

    /// Serialize to the report dictionary form, including `pass_rate`.
    #[must_use]
    pub fn to_dict(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(ref mut map) = value {
            map.insert("pass_rate".to_owned(), Value::from(self.pass_rate()));
        }
        value
    }

    /// Reconstruct from the dictionary form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Test`] when the value does not have the expected
    /// shape.
    pub fn from_dict(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::test(format!("invalid test result dict: {e}")))
    }
}

/// A pre-deployment risk test.
#[async_trait]
pub trait RiskTest: Send + Sync {
    /// Risk metadata.
    fn risk_info(&self) -> RiskInfo;

    /// Static test cases.
    fn load_test_cases(&self) -> Vec<TestCase>;

    /// LLM-driven dynamic cases; empty by default.
    async fn generate_dynamic_cases(&self, _mas_description: &str) -> Vec<TestCase> {
        Vec::new()
    }

    /// Execute one case. Failures are embedded in the returned map
    /// (`{test_case, passed, error?, …}`), never raised.
    async fn run_single_test(
        &self,
        case: &TestCase,
        intermediary: &Intermediary,
        task: Option<&str>,
    ) -> Value;

    /// The runtime monitor linked to this risk, if any.
    fn linked_monitor(&self) -> Option<&str> {
        None
    }

    /// Run all cases and aggregate.
    async fn run(&self, intermediary: &Intermediary, options: &TestRunOptions<'_>) -> TestResult {
        let mut cases = self.load_test_cases();
        if options.use_dynamic {
            let description = match &options.mas_description {
                Some(description) => description.clone(),
                None => describe_mas(intermediary),
            };
            cases.extend(self.generate_dynamic_cases(&description).await);
        }

        let total = cases.len();
        let mut details = Vec::with_capacity(total);
        let mut failed = 0u64;
        let mut severity_summary: BTreeMap<String, u64> = BTreeMap::new();
        for severity in ["low", "medium", "high", "critical"] {
            severity_summary.insert(severity.to_owned(), 0);
        }

        for (index, case) in cases.iter().enumerate() {
            let current = index + 1;
            if let Some(progress) = options.progress {
                progress(current, total, ProgressStatus::Starting);
            }

            let result = self
                .run_single_test(case, intermediary, options.task.as_deref())
                .await;
            let passed = result.get("passed").and_then(Value::as_bool).unwrap_or(false);
            let crashed = result.get("error").is_some_and(|e| !e.is_null());

            if let Some(progress) = options.progress {
                let status = if crashed {
                    ProgressStatus::Error
                } else {
                    ProgressStatus::Completed
                };
                progress(current, total, status);
            }

            if !passed {
                failed += 1;
                *severity_summary
                    .entry(case.severity.as_str().to_owned())
                    .or_insert(0) += 1;
            }
            details.push(result);
        }

        TestResult {
            risk_name: self.risk_info().name,
            passed: failed == 0,
            total_cases: total as u64,
            failed_cases: failed,
            details,
            severity_summary,
            metadata: Map::new(),
        }
    }

    /// Replay a response through the linked monitor as a synthetic respond
    /// step, returning the evaluation map.
    async fn evaluate_with_monitor(&self, response: &str, monitor: &mut dyn Monitor) -> Value {
        let entry = AgentStepLog::new("test_agent", StepType::Respond, response)
            .with_metadata("source", Value::String("risk_test".to_owned()));
        let alert = monitor.process(&entry).await.ok().flatten();

        serde_json::json!({
            "response": response,
            "alert_generated": alert.is_some(),
            "alert": alert.map(|a| serde_json::to_value(&a).unwrap_or(Value::Null)),
            "monitor_name": monitor.monitor_info().name,
        })
    }
}

/// Derive a short MAS description from the intermediary's agent list.
#[must_use]
pub fn describe_mas(intermediary: &Intermediary) -> String {
    let agents = intermediary.mas().agents();
    let names: Vec<String> = agents
        .iter()
        .map(|a| format!("{} ({})", a.name, a.role))
        .collect();
    format!("MAS with {} agents: {}", agents.len(), names.join(", "))
}

/// Build the default risk-test catalog.
#[must_use]
pub fn default_risk_tests(judge_client: &SharedLlmClient) -> Vec<(String, Box<dyn RiskTest>)> {
    vec![
        (
            "jailbreak".to_owned(),
            Box::new(JailbreakTest::new(Arc::clone(judge_client))) as Box<dyn RiskTest>,
        ),
        (
            "prompt_injection".to_owned(),
            Box::new(PromptInjectionTest::new(Arc::clone(judge_client))),
        ),
        (
            "message_tampering".to_owned(),
            Box::new(MessageTamperingTest::new(Arc::clone(judge_client))),
        ),
        (
            "identity_spoofing".to_owned(),
            Box::new(IdentitySpoofingTest::new(Arc::clone(judge_client))),
        ),
        (
            "cascading_failures".to_owned(),
            Box::new(CascadingFailuresTest::new(Arc::clone(judge_client))),
        ),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_result_dict_roundtrip() {
        let mut severity_summary = BTreeMap::new();
        severity_summary.insert("critical".to_owned(), 1);
        severity_summary.insert("low".to_owned(), 0);

        let result = TestResult {
            risk_name: "Jailbreak".to_owned(),
            passed: false,
            total_cases: 4,
            failed_cases: 1,
            details: vec![serde_json::json!({"test_case": "x", "passed": false})],
            severity_summary,
            metadata: Map::new(),
        };

        let dict = result.to_dict();
        assert!((dict["pass_rate"].as_f64().unwrap() - 0.75).abs() < 1e-9);

        let back = TestResult::from_dict(&dict).unwrap();
        assert_eq!(back.passed, result.passed);
        assert_eq!(back.total_cases, result.total_cases);
        assert_eq!(back.failed_cases, result.failed_cases);
        assert_eq!(back.severity_summary, result.severity_summary);
    }

    #[test]
    fn pass_rate_handles_zero_cases() {
        let result = TestResult::default();
        assert!(result.pass_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn severity_serializes_lowercase() {
        let case = TestCase::new("n", "i", "e", TestSeverity::Critical);
        let json = serde_json::to_value(&case).unwrap();
        assert_eq!(json["severity"], "critical");
    }
}
