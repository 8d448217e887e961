//! The host multi-agent system interface.
//!
//! The safety layer treats the MAS as an opaque collaborator behind the
//! [`Mas`] trait: a list of agents, a topology map, a workflow entry point,
//! and a per-agent chat surface. Message observation is an explicit
//! [`MessageHook`] the MAS invokes for each outbound message — the hook may
//! rewrite the content before delivery, and the workflow runners install
//! themselves as the hook for the duration of a run.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::logging::{MessageLog, MessageType};

/// Description of one agent in the MAS.
///
/// Immutable after workflow start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Agent name, unique within the MAS.
    pub name: String,
    /// Agent role description.
    pub role: String,
    /// Names of tools registered on the agent.
    #[serde(default)]
    pub tools: Vec<String>,
    /// The agent's system prompt.
    #[serde(default)]
    pub system_prompt: String,
}

impl AgentInfo {
    /// Create an agent description with no tools.
    #[must_use]
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            tools: Vec::new(),
            system_prompt: String::new(),
        }
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Add a tool name.
    #[must_use]
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tools.push(tool.into());
        self
    }
}

/// One entry in an agent's conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Message role (`system`, `user`, `assistant`).
    pub role: String,
    /// Message content.
    pub content: String,
    /// Claimed sender name, when distinct from the role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl HistoryEntry {
    /// A user-role entry.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_owned(),
            content: content.into(),
            name: None,
        }
    }

    /// An assistant-role entry.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_owned(),
            content: content.into(),
            name: None,
        }
    }

    /// A system-role entry.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_owned(),
            content: content.into(),
            name: None,
        }
    }

    /// Set the claimed sender name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Options forwarded to the MAS workflow entry point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkflowOptions {
    /// Maximum conversation rounds; the MAS default applies when unset.
    pub max_rounds: Option<usize>,
    /// Suppress native console output of the host framework.
    pub silent: bool,
}

impl WorkflowOptions {
    /// Options with a round limit.
    #[must_use]
    pub const fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = Some(max_rounds);
        self
    }
}

/// Result of a workflow execution.
///
/// `metadata` is the extension point the monitored runner uses to attach the
/// monitoring report and alerts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Whether the workflow completed successfully.
    pub success: bool,
    /// Final output of the workflow.
    pub output: String,
    /// The MAS's native message log.
    #[serde(default)]
    pub messages: Vec<MessageLog>,
    /// Extension metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Error message when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowResult {
    /// A failed result carrying an error message.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// An outbound message observed at delivery time.
///
/// Unlike the MAS's native message record, `to_agent` here is the concrete
/// delivery target, so interception policies can match exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    /// Delivery time.
    pub timestamp: f64,
    /// Sender.
    pub from_agent: String,
    /// Concrete delivery target.
    pub to_agent: String,
    /// Message content about to be delivered.
    pub content: String,
    /// Unique message id.
    pub message_id: String,
    /// Kind of message.
    pub message_type: MessageType,
    /// Tool call details for tool-call messages.
    pub tool_calls: Option<Vec<Value>>,
    /// Additional context.
    pub metadata: Map<String, Value>,
}

/// Hook invoked by the MAS for every outbound message.
///
/// Returning `Some(content)` replaces the message content before delivery;
/// `None` leaves it unchanged. The MAS drives the hook sequentially on the
/// workflow thread.
#[async_trait]
pub trait MessageHook: Send {
    /// Observe (and optionally rewrite) one outbound message.
    async fn on_message(&mut self, event: &MessageEvent) -> Option<String>;
}

/// The opaque multi-agent system under the safety layer.
#[async_trait]
pub trait Mas: Send + Sync {
    /// All agents, in declaration order.
    fn agents(&self) -> Vec<AgentInfo>;

    /// Look up one agent by name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Mas`] for an unknown agent.
    fn agent(&self, name: &str) -> Result<AgentInfo>;

    /// Topology map: agent name to the ordered successors it may send to.
    /// An empty successor list denotes a terminal node.
    fn topology(&self) -> BTreeMap<String, Vec<String>>;

    /// Generate one reply from the named agent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Mas`] for an unknown agent or a failed reply.
    async fn chat(&self, agent_name: &str, message: &str, history: &[HistoryEntry])
    -> Result<String>;

    /// Execute a tool registered on the named agent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Mas`] for an unknown agent or tool.
    async fn call_tool(
        &self,
        agent_name: &str,
        tool_name: &str,
        params: &Map<String, Value>,
    ) -> Result<Value>;

    /// Append content to the named agent's system prompt.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Mas`] for an unknown agent.
    fn append_system_prompt(&self, agent_name: &str, content: &str) -> Result<()>;

    /// Append an entry to the named agent's inbound history.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Mas`] for an unknown agent.
    fn append_history(&self, agent_name: &str, entry: HistoryEntry) -> Result<()>;

    /// The named agent's conversation history.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Mas`] for an unknown agent.
    fn history(&self, agent_name: &str) -> Result<Vec<HistoryEntry>>;

    /// Run the native workflow, invoking `hook` for each outbound message.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Mas`] when the workflow cannot run at all;
    /// partial failures are reported through [`WorkflowResult`].
    async fn run_workflow(
        &self,
        task: &str,
        options: &WorkflowOptions,
        hook: Option<&mut dyn MessageHook>,
    ) -> Result<WorkflowResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_info_builder() {
        let info = AgentInfo::new("A", "planner")
            .with_system_prompt("You plan.")
            .with_tool("search");
        assert_eq!(info.name, "A");
        assert_eq!(info.tools, vec!["search".to_owned()]);
        assert_eq!(info.system_prompt, "You plan.");
    }

    #[test]
    fn history_entry_roles() {
        assert_eq!(HistoryEntry::user("hi").role, "user");
        assert_eq!(HistoryEntry::system("ctx").role, "system");
        let spoofed = HistoryEntry::assistant("msg").with_name("Admin");
        assert_eq!(spoofed.name.as_deref(), Some("Admin"));
    }

    #[test]
    fn failure_result_carries_error() {
        let result = WorkflowResult::failure("boom");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }
}
