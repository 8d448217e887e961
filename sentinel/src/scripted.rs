//! A deterministic in-process MAS for tests and demos.
//!
//! [`ScriptedMas`] walks its topology hop by hop, generating each agent's
//! reply from a per-agent script (cycling through predefined responses) or a
//! reply function, and invoking the installed [`MessageHook`] for every hop.
//! Its native message log records recipients as `chat_manager`, the way
//! group-chat frameworks do, so post-hoc recipient resolution is exercised.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::logging::{MessageLog, MessageType, now_ts};
use crate::mas::{
    AgentInfo, HistoryEntry, Mas, MessageEvent, MessageHook, WorkflowOptions, WorkflowResult,
};
use crate::message_utils::CHAT_MANAGER;

type ReplyFn = Box<dyn Fn(&str, &str) -> String + Send + Sync>;
type ToolFn = Arc<dyn Fn(&Map<String, Value>) -> Result<Value> + Send + Sync>;

#[derive(Debug, Default)]
struct AgentState {
    system_prompt: String,
    history: Vec<HistoryEntry>,
    reply_index: usize,
}

struct AgentSlot {
    name: String,
    role: String,
    tools: Vec<String>,
    state: Mutex<AgentState>,
}

/// A scripted multi-agent system.
pub struct ScriptedMas {
    agents: Vec<AgentSlot>,
    topology: BTreeMap<String, Vec<String>>,
    replies: HashMap<String, Vec<String>>,
    reply_fn: Option<ReplyFn>,
    tools: HashMap<String, HashMap<String, ToolFn>>,
    fail_with: Option<String>,
}

impl std::fmt::Debug for ScriptedMas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedMas")
            .field("agents", &self.agents.iter().map(|a| &a.name).collect::<Vec<_>>())
            .field("topology", &self.topology)
            .finish_non_exhaustive()
    }
}

impl Default for ScriptedMas {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedMas {
    /// Create an empty scripted MAS.
    #[must_use]
    pub fn new() -> Self {
        Self {
            agents: Vec::new(),
            topology: BTreeMap::new(),
            replies: HashMap::new(),
            reply_fn: None,
            tools: HashMap::new(),
            fail_with: None,
        }
    }

    /// Add an agent.
    #[must_use]
    pub fn with_agent(mut self, info: AgentInfo) -> Self {
        self.agents.push(AgentSlot {
            name: info.name.clone(),
            role: info.role,
            tools: info.tools,
            state: Mutex::new(AgentState {
                system_prompt: info.system_prompt,
                ..Default::default()
            }),
        });
        self
    }

    /// Add a directed edge to the topology.
    #[must_use]
    pub fn with_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.topology.entry(from.into()).or_default().push(to.into());
        self
    }

    /// Connect the given agents in a ring (`a → b → … → a`).
    #[must_use]
    pub fn with_ring(mut self, names: &[&str]) -> Self {
        for (i, name) in names.iter().enumerate() {
            let next = names[(i + 1) % names.len()];
            self.topology
                .entry((*name).to_owned())
                .or_default()
                .push(next.to_owned());
        }
        self
    }

    /// Script the named agent's replies; they are cycled in order.
    #[must_use]
    pub fn with_replies(mut self, agent: impl Into<String>, replies: Vec<String>) -> Self {
        self.replies.insert(agent.into(), replies);
        self
    }

    /// Use a reply function `(agent_name, incoming) -> reply` for agents
    /// without a scripted reply list.
    #[must_use]
    pub fn with_reply_fn(
        mut self,
        reply_fn: impl Fn(&str, &str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.reply_fn = Some(Box::new(reply_fn));
        self
    }

    /// Register an executable tool on the named agent.
    #[must_use]
    pub fn with_tool(
        mut self,
        agent: impl Into<String>,
        tool: impl Into<String>,
        tool_fn: impl Fn(&Map<String, Value>) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        let agent = agent.into();
        let tool = tool.into();
        if let Some(slot) = self.agents.iter_mut().find(|a| a.name == agent) {
            slot.tools.push(tool.clone());
        }
        self.tools
            .entry(agent)
            .or_default()
            .insert(tool, Arc::new(tool_fn));
        self
    }

    /// Make `run_workflow` fail with the given error message.
    #[must_use]
    pub fn failing_with(mut self, error: impl Into<String>) -> Self {
        self.fail_with = Some(error.into());
        self
    }

    fn slot(&self, name: &str) -> Result<&AgentSlot> {
        self.agents
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| Error::mas(format!("unknown agent: {name}")))
    }

    fn reply(&self, agent: &str, incoming: &str) -> String {
        if let Some(script) = self.replies.get(agent)
            && !script.is_empty()
        {
            let index = self.slot(agent).map_or(0, |slot| {
                slot.state.lock().map_or(0, |mut state| {
                    let index = state.reply_index;
                    state.reply_index += 1;
                    index
                })
            });
            return script[index % script.len()].clone();
        }
        if let Some(reply_fn) = &self.reply_fn {
            return reply_fn(agent, incoming);
        }
        format!("{agent} acknowledges: {incoming}")
    }
}

#[async_trait]
impl Mas for ScriptedMas {
    fn agents(&self) -> Vec<AgentInfo> {
        self.agents
            .iter()
            .map(|slot| AgentInfo {
                name: slot.name.clone(),
                role: slot.role.clone(),
                tools: slot.tools.clone(),
                system_prompt: slot
                    .state
                    .lock()
                    .map(|s| s.system_prompt.clone())
                    .unwrap_or_default(),
            })
            .collect()
    }

    fn agent(&self, name: &str) -> Result<AgentInfo> {
        let slot = self.slot(name)?;
        Ok(AgentInfo {
            name: slot.name.clone(),
            role: slot.role.clone(),
            tools: slot.tools.clone(),
            system_prompt: slot
                .state
                .lock()
                .map(|s| s.system_prompt.clone())
                .unwrap_or_default(),
        })
    }

    fn topology(&self) -> BTreeMap<String, Vec<String>> {
        self.topology.clone()
    }

    async fn chat(
        &self,
        agent_name: &str,
        message: &str,
        history: &[HistoryEntry],
    ) -> Result<String> {
        let slot = self.slot(agent_name)?;
        let reply = self.reply(agent_name, message);
        if let Ok(mut state) = slot.state.lock() {
            state.history.extend(history.iter().cloned());
            state.history.push(HistoryEntry::user(message));
            state.history.push(HistoryEntry::assistant(reply.clone()));
        }
        Ok(reply)
    }

    async fn call_tool(
        &self,
        agent_name: &str,
        tool_name: &str,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        self.slot(agent_name)?;
        let tool_fn = self
            .tools
            .get(agent_name)
            .and_then(|tools| tools.get(tool_name))
            .ok_or_else(|| {
                Error::mas(format!("tool {tool_name} not found for agent {agent_name}"))
            })?;
        tool_fn(params)
    }

    fn append_system_prompt(&self, agent_name: &str, content: &str) -> Result<()> {
        let slot = self.slot(agent_name)?;
        if let Ok(mut state) = slot.state.lock() {
            if !state.system_prompt.is_empty() {
                state.system_prompt.push('\n');
            }
            state.system_prompt.push_str(content);
        }
        Ok(())
    }

    fn append_history(&self, agent_name: &str, entry: HistoryEntry) -> Result<()> {
        let slot = self.slot(agent_name)?;
        if let Ok(mut state) = slot.state.lock() {
            state.history.push(entry);
        }
        Ok(())
    }

    fn history(&self, agent_name: &str) -> Result<Vec<HistoryEntry>> {
        let slot = self.slot(agent_name)?;
        Ok(slot.state.lock().map(|s| s.history.clone()).unwrap_or_default())
    }

    async fn run_workflow(
        &self,
        task: &str,
        options: &WorkflowOptions,
        mut hook: Option<&mut dyn MessageHook>,
    ) -> Result<WorkflowResult> {
        if let Some(error) = &self.fail_with {
            return Err(Error::mas(error.clone()));
        }
        if self.agents.is_empty() {
            return Err(Error::mas("scripted MAS has no agents"));
        }

        let hops = options.max_rounds.unwrap_or(self.agents.len());
        let mut current = self.agents[0].name.clone();
        let mut incoming = task.to_owned();
        let mut messages = Vec::new();
        let mut output = String::new();

        for _ in 0..hops {
            let Some(next) = self
                .topology
                .get(&current)
                .and_then(|successors| successors.first())
                .cloned()
            else {
                break;
            };

            let outgoing = self.reply(&current, &incoming);
            let event = MessageEvent {
                timestamp: now_ts(),
                from_agent: current.clone(),
                to_agent: next.clone(),
                content: outgoing.clone(),
                message_id: Uuid::new_v4().to_string(),
                message_type: MessageType::Text,
                tool_calls: None,
                metadata: Map::new(),
            };

            let mut delivered = outgoing;
            if let Some(hook) = hook.as_mut()
                && let Some(modified) = hook.on_message(&event).await
            {
                delivered = modified;
            }

            // Native record in group-chat style: the next speaker is not part
            // of the record, only of the delivery.
            messages.push(MessageLog {
                timestamp: event.timestamp,
                from_agent: current.clone(),
                to_agent: CHAT_MANAGER.to_owned(),
                content: delivered.clone(),
                message_id: event.message_id.clone(),
                message_type: MessageType::Text,
                tool_calls: None,
                metadata: Map::new(),
            });

            output = delivered.clone();
            incoming = delivered;
            current = next;
        }

        Ok(WorkflowResult {
            success: true,
            output,
            messages,
            metadata: Map::new(),
            error: None,
        })
    }
}
