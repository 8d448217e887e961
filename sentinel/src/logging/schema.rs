//! Log record schemas for workflow execution.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current wall-clock time as fractional seconds since the Unix epoch.
///
/// Sub-millisecond resolution, matching the trace wire format.
#[must_use]
pub fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Types of agent steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Agent received a message.
    Receive,
    /// Agent is reasoning.
    Think,
    /// Agent invoked a tool.
    ToolCall,
    /// A tool returned a result.
    ToolResponse,
    /// Agent produced a response.
    Respond,
    /// An error occurred.
    Error,
    /// A message was intercepted and rewritten in flight.
    Intercept,
}

impl StepType {
    /// String form used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Receive => "receive",
            Self::Think => "think",
            Self::ToolCall => "tool_call",
            Self::ToolResponse => "tool_response",
            Self::Respond => "respond",
            Self::Error => "error",
            Self::Intercept => "intercept",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Types of inter-agent messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Plain text message.
    #[default]
    Text,
    /// Tool invocation.
    ToolCall,
    /// Tool result.
    ToolResponse,
}

/// Opaque step content.
///
/// Events carry text, structured maps, or sequences of either; the variant is
/// resolved at the serialization boundary rather than by runtime reflection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text.
    Text(String),
    /// A structured map.
    Structured(Map<String, Value>),
    /// A sequence of nested content items.
    Sequence(Vec<Content>),
}

impl Content {
    /// Render the content as a single string.
    ///
    /// Structured and sequence variants are rendered as compact JSON.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(map) => {
                serde_json::to_string(map).unwrap_or_default()
            }
            Self::Sequence(items) => serde_json::to_string(items).unwrap_or_default(),
        }
    }

    /// A preview of the content, truncated to at most `max_chars` characters.
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> String {
        let text = self.as_text();
        if text.chars().count() <= max_chars {
            text
        } else {
            text.chars().take(max_chars).collect()
        }
    }

    /// Returns `true` for empty text content.
    #[must_use]
    pub fn is_empty_text(&self) -> bool {
        matches!(self, Self::Text(text) if text.trim().is_empty())
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Map<String, Value>> for Content {
    fn from(map: Map<String, Value>) -> Self {
        Self::Structured(map)
    }
}

/// Log entry for a single agent action.
///
/// The canonical record streamed to monitors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStepLog {
    /// Wall-clock time of the step.
    pub timestamp: f64,
    /// Acting agent.
    pub agent_name: String,
    /// Kind of step.
    pub step_type: StepType,
    /// Opaque step content.
    pub content: Content,
    /// Additional context (message provenance, tool names, parameters).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentStepLog {
    /// Create a step record stamped with the current time.
    #[must_use]
    pub fn new(
        agent_name: impl Into<String>,
        step_type: StepType,
        content: impl Into<Content>,
    ) -> Self {
        Self {
            timestamp: now_ts(),
            agent_name: agent_name.into(),
            step_type,
            content: content.into(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Read a string metadata entry.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Log entry for inter-agent communication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageLog {
    /// Wall-clock time the message was observed.
    pub timestamp: f64,
    /// Sender.
    pub from_agent: String,
    /// Recipient. The literal `"chat_manager"` denotes a next speaker not yet
    /// known at send time, resolved post-hoc.
    pub to_agent: String,
    /// Message content (post-interception when a modifier applied).
    pub content: String,
    /// Unique message id; preserved across interception.
    pub message_id: String,
    /// Kind of message.
    #[serde(default)]
    pub message_type: MessageType,
    /// Tool call details for tool-call messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
    /// Additional context.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Log entry for a message interception event.
///
/// Interceptions mutate content only; sender, recipient, and message id are
/// preserved, and both the original and modified content are recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterceptionLog {
    /// Wall-clock time of the interception.
    pub timestamp: f64,
    /// Original sender.
    pub source_agent: String,
    /// Target recipient.
    pub target_agent: String,
    /// Content before modification.
    pub original_content: String,
    /// Content after modification.
    pub modified_content: String,
    /// Attack being simulated, if declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack_type: Option<String>,
    /// Additional context.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Complete trace of one workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTrace {
    /// The task that was executed.
    pub task: String,
    /// Start of the run.
    pub start_time: f64,
    /// End of the run; set when the trace is sealed.
    pub end_time: Option<f64>,
    /// Agent steps in occurrence order.
    #[serde(default)]
    pub agent_steps: Vec<AgentStepLog>,
    /// Inter-agent messages in occurrence order.
    #[serde(default)]
    pub messages: Vec<MessageLog>,
    /// Interception events in occurrence order.
    #[serde(default)]
    pub interceptions: Vec<InterceptionLog>,
    /// Whether the workflow succeeded.
    pub success: bool,
    /// Error message, if the workflow failed.
    pub error: Option<String>,
}

impl WorkflowTrace {
    /// Create a trace for `task` starting now.
    #[must_use]
    pub fn start(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            start_time: now_ts(),
            end_time: None,
            agent_steps: Vec::new(),
            messages: Vec::new(),
            interceptions: Vec::new(),
            success: true,
            error: None,
        }
    }

    /// Run duration in seconds, when sealed.
    #[must_use]
    pub fn duration(&self) -> Option<f64> {
        self.end_time.map(|end| end - self.start_time)
    }

    /// Serialize including the derived `duration` field, as written to JSONL.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(ref mut map) = value {
            map.insert(
                "duration".to_owned(),
                self.duration().map_or(Value::Null, Value::from),
            );
        }
        value
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod content {
        use super::*;

        #[test]
        fn text_roundtrips_as_plain_string() {
            let content = Content::from("hello");
            let json = serde_json::to_value(&content).unwrap();
            assert_eq!(json, Value::String("hello".into()));

            let back: Content = serde_json::from_value(json).unwrap();
            assert_eq!(back, content);
        }

        #[test]
        fn structured_roundtrips_as_object() {
            let mut map = Map::new();
            map.insert("tool".into(), Value::String("search".into()));
            let content = Content::Structured(map.clone());

            let json = serde_json::to_value(&content).unwrap();
            assert!(json.is_object());

            let back: Content = serde_json::from_value(json).unwrap();
            assert_eq!(back, Content::Structured(map));
        }

        #[test]
        fn as_text_renders_structured_as_json() {
            let mut map = Map::new();
            map.insert("k".into(), Value::from(1));
            assert_eq!(Content::Structured(map).as_text(), r#"{"k":1}"#);
        }

        #[test]
        fn preview_truncates_on_char_boundary() {
            let content = Content::from("héllo wörld");
            assert_eq!(content.preview(5), "héllo");
            assert_eq!(content.preview(100), "héllo wörld");
        }

        #[test]
        fn empty_text_detection() {
            assert!(Content::from("   ").is_empty_text());
            assert!(!Content::from("x").is_empty_text());
            assert!(!Content::Structured(Map::new()).is_empty_text());
        }
    }

    mod step_type {
        use super::*;

        #[test]
        fn serializes_snake_case() {
            assert_eq!(
                serde_json::to_value(StepType::ToolCall).unwrap(),
                Value::String("tool_call".into())
            );
            assert_eq!(StepType::Intercept.as_str(), "intercept");
        }
    }

    mod trace {
        use super::*;

        #[test]
        fn duration_requires_sealing() {
            let mut trace = WorkflowTrace::start("task");
            assert!(trace.duration().is_none());

            trace.end_time = Some(trace.start_time + 1.5);
            assert!((trace.duration().unwrap() - 1.5).abs() < 1e-9);
        }

        #[test]
        fn to_json_carries_duration() {
            let mut trace = WorkflowTrace::start("task");
            trace.end_time = Some(trace.start_time + 2.0);

            let json = trace.to_json();
            assert!((json["duration"].as_f64().unwrap() - 2.0).abs() < 1e-9);
            assert_eq!(json["task"], "task");
            assert_eq!(json["success"], true);
        }

        #[test]
        fn jsonl_roundtrip_preserves_arrays() {
            let mut trace = WorkflowTrace::start("roundtrip");
            trace.agent_steps.push(AgentStepLog::new("A", StepType::Respond, "hi"));
            trace.messages.push(MessageLog {
                timestamp: now_ts(),
                from_agent: "A".into(),
                to_agent: "B".into(),
                content: "hi".into(),
                message_id: "m1".into(),
                message_type: MessageType::Text,
                tool_calls: None,
                metadata: Map::new(),
            });
            trace.interceptions.push(InterceptionLog {
                timestamp: now_ts(),
                source_agent: "A".into(),
                target_agent: "B".into(),
                original_content: "hi".into(),
                modified_content: "hi!".into(),
                attack_type: Some("append".into()),
                metadata: Map::new(),
            });
            trace.end_time = Some(now_ts());

            let line = serde_json::to_string(&trace.to_json()).unwrap();
            let back: WorkflowTrace = serde_json::from_str(&line).unwrap();
            assert_eq!(back.agent_steps, trace.agent_steps);
            assert_eq!(back.messages, trace.messages);
            assert_eq!(back.interceptions, trace.interceptions);
        }
    }

    #[test]
    fn now_ts_is_nondecreasing() {
        let a = now_ts();
        let b = now_ts();
        assert!(b >= a);
    }
}
