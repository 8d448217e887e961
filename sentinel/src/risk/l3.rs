//! L3 (system-level) test support: failure payload injection.
//!
//! L3 tests inject failure payloads at one agent and analyze whether the
//! failure cascades downstream — the payload reappearing in messages from
//! agents other than the injection point.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::mas::WorkflowResult;
use crate::runner::MessageModifier;

/// Kinds of injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A fake critical error message.
    ErrorMessage,
    /// Structurally broken data.
    MalformedData,
    /// A message engineered to bounce between agents.
    InfiniteLoop,
    /// A request designed to exhaust resources.
    ResourceExhaustion,
    /// A fake unavailable-dependency marker.
    DependencyFailure,
    /// An instruction to wipe agent state.
    StateCorruption,
    /// A stall instruction.
    TimeoutCascade,
    /// An empty reply.
    NullResponse,
}

impl FailureKind {
    /// String form used in case metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ErrorMessage => "error_message",
            Self::MalformedData => "malformed_data",
            Self::InfiniteLoop => "infinite_loop",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::DependencyFailure => "dependency_failure",
            Self::StateCorruption => "state_corruption",
            Self::TimeoutCascade => "timeout_cascade",
            Self::NullResponse => "null_response",
        }
    }

    /// Parse the metadata string form.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "error_message" => Some(Self::ErrorMessage),
            "malformed_data" => Some(Self::MalformedData),
            "infinite_loop" => Some(Self::InfiniteLoop),
            "resource_exhaustion" => Some(Self::ResourceExhaustion),
            "dependency_failure" => Some(Self::DependencyFailure),
            "state_corruption" => Some(Self::StateCorruption),
            "timeout_cascade" | "timeout" => Some(Self::TimeoutCascade),
            "null_response" => Some(Self::NullResponse),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the interception modifier for a failure payload.
///
/// Structurally destructive kinds (malformed data, null response) replace
/// the message outright; the rest append the payload so the original task
/// content still flows.
#[must_use]
pub fn failure_modifier(kind: FailureKind, payload: &str) -> MessageModifier {
    let payload = payload.to_owned();
    match kind {
        FailureKind::MalformedData | FailureKind::NullResponse => {
            Arc::new(move |_: &str| Ok(payload.clone()))
        }
        _ => Arc::new(move |content: &str| Ok(format!("{content}\n\n{payload}"))),
    }
}

/// Agents other than `source_agent` whose messages carry the payload prefix.
///
/// Matches on the first 20 characters of the lowercased payload, the way a
/// cascade shows up in downstream traffic.
#[must_use]
pub fn payload_propagation(
    result: &WorkflowResult,
    source_agent: &str,
    payload: &str,
) -> Vec<String> {
    let needle: String = payload.to_lowercase().chars().take(20).collect();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut carriers = Vec::new();
    for message in &result.messages {
        if message.from_agent != source_agent
            && message.content.to_lowercase().contains(&needle)
            && !carriers.contains(&message.from_agent)
        {
            carriers.push(message.from_agent.clone());
        }
    }
    carriers
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::logging::{MessageLog, MessageType, now_ts};
    use serde_json::Map;

    fn message(from: &str, content: &str) -> MessageLog {
        MessageLog {
            timestamp: now_ts(),
            from_agent: from.to_owned(),
            to_agent: "B".to_owned(),
            content: content.to_owned(),
            message_id: "m".to_owned(),
            message_type: MessageType::Text,
            tool_calls: None,
            metadata: Map::new(),
        }
    }

    #[test]
    fn malformed_data_replaces_content() {
        let modifier = failure_modifier(FailureKind::MalformedData, "{{{{invalid");
        assert_eq!(modifier("original task").unwrap(), "{{{{invalid");
    }

    #[test]
    fn error_message_appends() {
        let modifier = failure_modifier(FailureKind::ErrorMessage, "[ERROR: halt]");
        let result = modifier("original task").unwrap();
        assert!(result.starts_with("original task"));
        assert!(result.ends_with("[ERROR: halt]"));
    }

    #[test]
    fn propagation_finds_downstream_carriers() {
        let payload = "[ERROR: Critical system failure]";
        let result = WorkflowResult {
            success: true,
            output: String::new(),
            messages: vec![
                message("A", "task [error: critical system failure]"),
                message("B", "echoing [ERROR: Critical system failure] onward"),
                message("C", "unrelated reply"),
            ],
            metadata: Map::new(),
            error: None,
        };

        let carriers = payload_propagation(&result, "A", payload);
        assert_eq!(carriers, vec!["B".to_owned()]);
    }

    #[test]
    fn kind_roundtrips_through_strings() {
        for kind in [
            FailureKind::ErrorMessage,
            FailureKind::MalformedData,
            FailureKind::InfiniteLoop,
            FailureKind::ResourceExhaustion,
            FailureKind::DependencyFailure,
            FailureKind::StateCorruption,
            FailureKind::TimeoutCascade,
            FailureKind::NullResponse,
        ] {
            assert_eq!(FailureKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FailureKind::parse("timeout"), Some(FailureKind::TimeoutCascade));
        assert!(FailureKind::parse("unknown").is_none());
    }
}
