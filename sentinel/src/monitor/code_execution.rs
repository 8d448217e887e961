//! Code execution monitor.
//!
//! Flags dangerous shell commands, code injection, SQL injection, and path
//! traversal in tool parameters and agent output.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{Alert, Monitor, MonitorInfo, PatternSet, merge_config};
use crate::error::Result;
use crate::judge::{RecommendedAction, Severity};
use crate::logging::{AgentStepLog, StepType};

const SHELL_COMMANDS: &[&str] = &[
    r"rm\s+-rf",
    r"rm\s+-r",
    r"dd\s+if=",
    r"mkfs\.",
    r">\s*/dev/sd",
    r"chmod\s+777",
    r"wget.*\|.*sh",
    r"curl.*\|.*bash",
];

const CODE_INJECTION: &[&str] = &[
    r"__import__\s*\(",
    r"eval\s*\(",
    r"exec\s*\(",
    r"os\.system\s*\(",
    r"subprocess\.",
    r"import\s+os",
    r"import\s+subprocess",
];

const SQL_INJECTION: &[&str] = &[
    r";\s*drop\s+table",
    r";\s*delete\s+from",
    r";\s*truncate",
    r"union\s+select",
    r"1=1",
];

const PATH_TRAVERSAL: &[&str] = &[
    r"\.\./\.\./",
    r"\.\.\\\.\.\\",
    r"/etc/passwd",
    r"/etc/shadow",
];

const DANGEROUS_TOOLS: &[&str] = &["execute", "shell", "run", "eval", "exec"];

/// Runtime monitor for unauthorized code execution attempts.
#[derive(Debug)]
pub struct CodeExecutionMonitor {
    config: Map<String, Value>,
    shell: PatternSet,
    code: PatternSet,
    sql: PatternSet,
    path: PatternSet,
}

impl Default for CodeExecutionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeExecutionMonitor {
    /// Create the monitor with its default configuration.
    #[must_use]
    pub fn new() -> Self {
        let mut config = Map::new();
        config.insert("block_dangerous".to_owned(), Value::Bool(true));
        config.insert("track_all_code".to_owned(), Value::Bool(true));
        Self {
            config,
            shell: PatternSet::compile(SHELL_COMMANDS),
            code: PatternSet::compile(CODE_INJECTION),
            sql: PatternSet::compile(SQL_INJECTION),
            path: PatternSet::compile(PATH_TRAVERSAL),
        }
    }

    fn detect(&self, content: &str) -> Vec<Value> {
        let mut threats = Vec::new();
        let families: [(&str, &PatternSet); 4] = [
            ("shell_commands", &self.shell),
            ("code_injection", &self.code),
            ("sql_injection", &self.sql),
            ("path_traversal", &self.path),
        ];
        for (kind, patterns) in families {
            for pattern in patterns.find(content) {
                threats.push(json!({"type": kind, "pattern": pattern}));
            }
        }
        threats
    }

    fn check_tool_call(&self, entry: &AgentStepLog) -> Option<Alert> {
        let tool_name = entry.metadata_str("tool_name").unwrap_or("").to_lowercase();
        if !DANGEROUS_TOOLS.iter().any(|d| tool_name.contains(d)) {
            return None;
        }
        let params = entry
            .metadata
            .get("params")
            .map(Value::to_string)
            .unwrap_or_default();
        let threats = self.detect(&params.to_lowercase());
        if threats.is_empty() {
            return None;
        }

        Some(
            Alert::new(
                Severity::Critical,
                "code_execution",
                format!(
                    "Agent {} attempting dangerous code execution",
                    entry.agent_name
                ),
            )
            .with_action(RecommendedAction::Block)
            .with_evidence("agent", Value::String(entry.agent_name.clone()))
            .with_evidence("tool", Value::String(tool_name))
            .with_evidence("threats", Value::Array(threats))
            .with_evidence(
                "params_preview",
                Value::String(params.chars().take(200).collect()),
            )
            .at(entry.timestamp),
        )
    }

    fn check_content(&self, entry: &AgentStepLog) -> Option<Alert> {
        let content = entry.content.as_text().to_lowercase();
        let threats = self.detect(&content);
        if threats.is_empty() {
            return None;
        }

        let critical = threats.iter().any(|t| {
            matches!(
                t["type"].as_str(),
                Some("shell_commands" | "code_injection")
            )
        });
        let (severity, action) = if critical {
            (Severity::Critical, RecommendedAction::Block)
        } else {
            (Severity::Warning, RecommendedAction::Warn)
        };

        Some(
            Alert::new(
                severity,
                "code_execution",
                format!(
                    "Dangerous code patterns detected in {}'s output",
                    entry.agent_name
                ),
            )
            .with_action(action)
            .with_evidence("agent", Value::String(entry.agent_name.clone()))
            .with_evidence("step_type", Value::String(entry.step_type.to_string()))
            .with_evidence("threats", Value::Array(threats))
            .with_evidence("content_preview", Value::String(entry.content.preview(200)))
            .at(entry.timestamp),
        )
    }
}

#[async_trait]
impl Monitor for CodeExecutionMonitor {
    fn monitor_info(&self) -> MonitorInfo {
        MonitorInfo::new(
            "CodeExecutionMonitor",
            "code_execution",
            "Monitors for unauthorized code execution attempts",
        )
    }

    async fn process(&mut self, entry: &AgentStepLog) -> Result<Option<Alert>> {
        Ok(match entry.step_type {
            StepType::ToolCall => self.check_tool_call(entry),
            StepType::Respond | StepType::Think => self.check_content(entry),
            _ => None,
        })
    }

    fn reset(&mut self) {}

    fn configure(&mut self, config: &Map<String, Value>) {
        merge_config(&mut self.config, config);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dangerous_tool_with_shell_payload_is_critical() {
        let mut monitor = CodeExecutionMonitor::new();
        let entry = AgentStepLog::new("A", StepType::ToolCall, "run command")
            .with_metadata("tool_name", Value::String("shell_execute".into()))
            .with_metadata("params", json!({"cmd": "rm -rf /"}));
        let alert = monitor.process(&entry).await.unwrap().unwrap();
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.recommended_action, RecommendedAction::Block);
    }

    #[tokio::test]
    async fn shell_pattern_in_response_is_critical() {
        let mut monitor = CodeExecutionMonitor::new();
        let entry = AgentStepLog::new("A", StepType::Respond, "just run rm -rf / to clean up");
        let alert = monitor.process(&entry).await.unwrap().unwrap();
        assert_eq!(alert.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn path_traversal_alone_is_warning() {
        let mut monitor = CodeExecutionMonitor::new();
        let entry = AgentStepLog::new("A", StepType::Think, "read ../../../etc/passwd maybe");
        let alert = monitor.process(&entry).await.unwrap().unwrap();
        assert_eq!(alert.severity, Severity::Warning);
    }

    #[tokio::test]
    async fn safe_tool_call_is_quiet() {
        let mut monitor = CodeExecutionMonitor::new();
        let entry = AgentStepLog::new("A", StepType::ToolCall, "look up weather")
            .with_metadata("tool_name", Value::String("weather".into()))
            .with_metadata("params", json!({"city": "Paris"}));
        assert!(monitor.process(&entry).await.unwrap().is_none());
    }
}
