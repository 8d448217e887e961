//! Structured log writer.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::warn;

use super::schema::{
    AgentStepLog, Content, InterceptionLog, MessageLog, MessageType, StepType, WorkflowTrace,
    now_ts,
};
use crate::error::{Error, Result};

/// Writer for structured execution logs.
///
/// Single-writer per trace; concurrent monitored workflows must each hold
/// their own writer. Timestamps are clamped to be non-decreasing within a
/// trace.
#[derive(Debug, Default)]
pub struct StructuredLogWriter {
    output_file: Option<PathBuf>,
    current: Option<WorkflowTrace>,
    last_ts: f64,
}

impl StructuredLogWriter {
    /// Create a writer that keeps traces in memory only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer that appends each sealed trace to `path` as one JSON
    /// object per line.
    #[must_use]
    pub fn with_output_file(path: impl Into<PathBuf>) -> Self {
        Self {
            output_file: Some(path.into()),
            current: None,
            last_ts: 0.0,
        }
    }

    /// Start a new workflow trace, discarding any unsealed one.
    pub fn start_trace(&mut self, task: impl Into<String>) -> &WorkflowTrace {
        let trace = WorkflowTrace::start(task);
        self.last_ts = trace.start_time;
        self.current.insert(trace)
    }

    /// Returns `true` while a trace is active.
    #[must_use]
    pub const fn has_active_trace(&self) -> bool {
        self.current.is_some()
    }

    fn next_ts(&mut self) -> f64 {
        let ts = now_ts().max(self.last_ts);
        self.last_ts = ts;
        ts
    }

    /// Log an agent step. No-op when no trace is active.
    pub fn log_agent_step(
        &mut self,
        agent_name: impl Into<String>,
        step_type: StepType,
        content: impl Into<Content>,
        metadata: Option<Map<String, Value>>,
    ) {
        let timestamp = self.next_ts();
        if let Some(trace) = self.current.as_mut() {
            trace.agent_steps.push(AgentStepLog {
                timestamp,
                agent_name: agent_name.into(),
                step_type,
                content: content.into(),
                metadata: metadata.unwrap_or_default(),
            });
        }
    }

    /// Log an inter-agent message. No-op when no trace is active.
    #[allow(clippy::too_many_arguments)]
    pub fn log_message(
        &mut self,
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        content: impl Into<String>,
        message_id: impl Into<String>,
        message_type: MessageType,
        tool_calls: Option<Vec<Value>>,
        metadata: Option<Map<String, Value>>,
    ) {
        let timestamp = self.next_ts();
        if let Some(trace) = self.current.as_mut() {
            trace.messages.push(MessageLog {
                timestamp,
                from_agent: from_agent.into(),
                to_agent: to_agent.into(),
                content: content.into(),
                message_id: message_id.into(),
                message_type,
                tool_calls,
                metadata: metadata.unwrap_or_default(),
            });
        }
    }

    /// Log a message interception event. No-op when no trace is active.
    pub fn log_interception(
        &mut self,
        source_agent: impl Into<String>,
        target_agent: impl Into<String>,
        original_content: impl Into<String>,
        modified_content: impl Into<String>,
        attack_type: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) {
        let timestamp = self.next_ts();
        if let Some(trace) = self.current.as_mut() {
            trace.interceptions.push(InterceptionLog {
                timestamp,
                source_agent: source_agent.into(),
                target_agent: target_agent.into(),
                original_content: original_content.into(),
                modified_content: modified_content.into(),
                attack_type,
                metadata: metadata.unwrap_or_default(),
            });
        }
    }

    /// Seal the current trace, writing it to the output file when configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mas`] when no trace is active.
    pub fn end_trace(&mut self, success: bool, error: Option<String>) -> Result<WorkflowTrace> {
        let mut trace = self
            .current
            .take()
            .ok_or_else(|| Error::mas("no active trace to end"))?;
        trace.end_time = Some(self.next_ts());
        trace.success = success;
        trace.error = error;

        if let Some(path) = self.output_file.clone()
            && let Err(err) = append_trace(&path, &trace)
        {
            warn!(path = %path.display(), %err, "failed to write trace");
        }

        Ok(trace)
    }

    /// Steps of the current trace, empty when no trace is active.
    #[must_use]
    pub fn current_steps(&self) -> &[AgentStepLog] {
        self.current.as_ref().map_or(&[], |t| &t.agent_steps)
    }

    /// Messages of the current trace, empty when no trace is active.
    #[must_use]
    pub fn current_messages(&self) -> &[MessageLog] {
        self.current.as_ref().map_or(&[], |t| &t.messages)
    }
}

fn append_trace(path: &Path, trace: &WorkflowTrace) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| Error::mas(e.to_string()))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::mas(e.to_string()))?;
    let line = serde_json::to_string(&trace.to_json())?;
    writeln!(file, "{line}").map_err(|e| Error::mas(e.to_string()))?;
    Ok(())
}
