//! L1 (single-agent) test support: per-run JSON log files.
//!
//! L1 tests write one JSON log per executed case — test info, configuration,
//! results, and for PAIR-driven tests the full attack history. Log saving is
//! best-effort and never fails the test.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tracing::warn;

use super::{RiskInfo, TestCase};

/// Log-file configuration for L1 tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L1LogConfig {
    /// Directory the per-run JSON files are written to.
    pub log_dir: PathBuf,
    /// Whether log saving is enabled.
    pub save_logs: bool,
}

impl Default for L1LogConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs/l1_tests"),
            save_logs: true,
        }
    }
}

impl L1LogConfig {
    /// Config writing into the given directory.
    #[must_use]
    pub fn in_dir(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            save_logs: true,
        }
    }

    /// Config with log saving disabled.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            save_logs: false,
            ..Default::default()
        }
    }
}

/// Save a detailed per-run test log. Returns the written path, or `None`
/// when saving is disabled or fails.
#[must_use]
pub fn save_test_logs(
    config: &L1LogConfig,
    risk_info: &RiskInfo,
    case: &TestCase,
    results: &Value,
    agent_name: Option<&str>,
    task_used: Option<&str>,
    additional_data: Option<Value>,
) -> Option<PathBuf> {
    if !config.save_logs {
        return None;
    }

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let file_name = format!("{}_{}_{stamp}.json", risk_info.risk_type, case.name);
    let path = config.log_dir.join(file_name);

    let mut log_data = json!({
        "test_info": {
            "risk_type": risk_info.risk_type,
            "risk_level": risk_info.level,
            "test_case": case.name,
            "severity": case.severity.as_str(),
            "expected_behavior": case.expected_behavior,
            "test_input": case.input,
        },
        "test_config": {
            "agent_name": agent_name,
            "task": task_used,
            "test_metadata": case.metadata,
        },
        "results": {
            "passed": results.get("passed").and_then(Value::as_bool).unwrap_or(false),
            "error": results.get("error").cloned().unwrap_or(Value::Null),
            "agent_results": results.get("agent_results").cloned().unwrap_or(Value::Null),
        },
    });
    if let Some(additional) = additional_data
        && let Value::Object(ref mut map) = log_data
    {
        map.insert("additional_data".to_owned(), additional);
    }

    let write = || -> std::io::Result<()> {
        std::fs::create_dir_all(&config.log_dir)?;
        std::fs::write(&path, serde_json::to_string_pretty(&log_data).unwrap_or_default())
    };
    match write() {
        Ok(()) => Some(path),
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to save test log");
            None
        }
    }
}

/// Save a per-run log for a PAIR-driven test, embedding the attack history.
#[must_use]
pub fn save_pair_test_logs(
    config: &L1LogConfig,
    risk_info: &RiskInfo,
    case: &TestCase,
    results: &Value,
    agent_name: &str,
    attack_history: &Value,
    task_used: Option<&str>,
) -> Option<PathBuf> {
    let iterations = attack_history.as_array().map_or(0, Vec::len);
    let additional = json!({
        "pair_framework": {
            "iterations": iterations,
            "attack_history": attack_history,
        }
    });
    save_test_logs(
        config,
        risk_info,
        case,
        results,
        Some(agent_name),
        task_used,
        Some(additional),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::risk::TestSeverity;

    fn risk_info() -> RiskInfo {
        RiskInfo {
            name: "Jailbreak".into(),
            level: "L1".into(),
            risk_type: "jailbreak".into(),
            owasp_ref: "ASI01".into(),
            description: "test".into(),
        }
    }

    #[test]
    fn writes_json_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = L1LogConfig::in_dir(dir.path());
        let case = TestCase::new("roleplay", "goal", "refuses", TestSeverity::High);
        let results = json!({"passed": false, "agent_results": {"A": {"jailbroken": true}}});

        let path = save_test_logs(&config, &risk_info(), &case, &results, Some("A"), None, None)
            .unwrap();
        let raw = std::fs::read_to_string(path).unwrap();
        let log: Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(log["test_info"]["risk_type"], "jailbreak");
        assert_eq!(log["test_info"]["severity"], "high");
        assert_eq!(log["results"]["passed"], false);
        assert_eq!(log["results"]["agent_results"]["A"]["jailbroken"], true);
    }

    #[test]
    fn pair_logs_embed_attack_history() {
        let dir = tempfile::tempdir().unwrap();
        let config = L1LogConfig::in_dir(dir.path());
        let case = TestCase::new("goal", "input", "expected", TestSeverity::Critical);
        let history = json!([
            {"iteration": 1, "prompt": "p", "response": "r"},
        ]);

        let path = save_pair_test_logs(
            &config,
            &risk_info(),
            &case,
            &json!({"passed": true}),
            "Agent",
            &history,
            Some("the task"),
        )
        .unwrap();
        let log: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(log["additional_data"]["pair_framework"]["iterations"], 1);
        assert_eq!(log["test_config"]["task"], "the task");
    }

    #[test]
    fn disabled_config_skips_saving() {
        let case = TestCase::new("n", "i", "e", TestSeverity::Low);
        let path = save_test_logs(
            &L1LogConfig::disabled(),
            &risk_info(),
            &case,
            &json!({}),
            None,
            None,
            None,
        );
        assert!(path.is_none());
    }
}
