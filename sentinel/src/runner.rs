//! Workflow runners: mode-selectable execution over an opaque MAS.
//!
//! Four modes form a small lattice:
//!
//! | Mode                    | Intercepts | Streams events | Trace |
//! |-------------------------|------------|----------------|-------|
//! | Basic                   | no         | no             | optional |
//! | Intercepting            | yes        | no             | optional |
//! | Monitored               | no         | yes            | yes      |
//! | MonitoredIntercepting   | yes        | yes            | yes      |
//!
//! Separating interception from monitoring lets red-team scenarios (modify
//! and observe downstream impact) and blue-team scenarios (observe only)
//! compose cleanly. The runner installs itself as the MAS's [`MessageHook`]
//! for the duration of a run.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::error::Result;
use crate::logging::{AgentStepLog, Content, StepType, StructuredLogWriter, WorkflowTrace};
use crate::mas::{Mas, MessageEvent, MessageHook, WorkflowOptions, WorkflowResult};
use crate::message_utils::resolve_chat_manager_recipients;

/// Workflow execution modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunMode {
    /// Run the native workflow untouched.
    Basic,
    /// Apply message interceptions, no event streaming.
    Intercepting,
    /// Stream agent steps to a sink, no interception.
    Monitored,
    /// Intercept and stream.
    MonitoredIntercepting,
}

impl RunMode {
    /// Whether this mode applies message interceptions.
    #[must_use]
    pub const fn intercepts(self) -> bool {
        matches!(self, Self::Intercepting | Self::MonitoredIntercepting)
    }

    /// Whether this mode streams agent steps to a sink.
    #[must_use]
    pub const fn streams(self) -> bool {
        matches!(self, Self::Monitored | Self::MonitoredIntercepting)
    }

    /// String form used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Intercepting => "intercepting",
            Self::Monitored => "monitored",
            Self::MonitoredIntercepting => "monitored_intercepting",
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message-rewriting function applied during interception.
///
/// A failing modifier maps to the log-and-pass-original path; it never
/// terminates the workflow.
pub type MessageModifier = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Declarative interception policy: rewrite messages from `source_agent`
/// about to be delivered to `target_agent`.
///
/// Matching is exact; multiple matching interceptions are applied in
/// declaration order. Interceptions mutate content only — sender, recipient,
/// and message id are preserved.
#[derive(Clone)]
pub struct MessageInterception {
    /// Sender to match.
    pub source_agent: String,
    /// Recipient to match.
    pub target_agent: String,
    /// The content rewrite.
    pub modifier: MessageModifier,
    /// Attack being simulated, recorded on the interception log.
    pub attack_type: Option<String>,
}

impl std::fmt::Debug for MessageInterception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageInterception")
            .field("source_agent", &self.source_agent)
            .field("target_agent", &self.target_agent)
            .field("attack_type", &self.attack_type)
            .finish_non_exhaustive()
    }
}

impl MessageInterception {
    /// Create an interception policy.
    #[must_use]
    pub fn new(
        source_agent: impl Into<String>,
        target_agent: impl Into<String>,
        modifier: MessageModifier,
    ) -> Self {
        Self {
            source_agent: source_agent.into(),
            target_agent: target_agent.into(),
            modifier,
            attack_type: None,
        }
    }

    /// Record the attack type being simulated.
    #[must_use]
    pub fn with_attack_type(mut self, attack_type: impl Into<String>) -> Self {
        self.attack_type = Some(attack_type.into());
        self
    }
}

/// Consumer of the streamed agent-step events.
///
/// A sink must never fail the workflow; faults inside a sink are the sink's
/// own responsibility to contain.
#[async_trait]
pub trait StepSink: Send {
    /// Receive one agent step, in occurrence order.
    async fn on_step(&mut self, entry: &AgentStepLog);
}

/// Mode-selectable workflow runner.
#[derive(Debug)]
pub struct WorkflowRunner {
    mode: RunMode,
    interceptions: Vec<MessageInterception>,
    trace_path: Option<PathBuf>,
}

impl WorkflowRunner {
    /// Runner for the basic mode.
    #[must_use]
    pub fn basic() -> Self {
        Self::for_mode(RunMode::Basic, Vec::new())
    }

    /// Runner that applies interceptions without streaming.
    #[must_use]
    pub fn intercepting(interceptions: Vec<MessageInterception>) -> Self {
        Self::for_mode(RunMode::Intercepting, interceptions)
    }

    /// Runner that streams events without interception.
    #[must_use]
    pub fn monitored() -> Self {
        Self::for_mode(RunMode::Monitored, Vec::new())
    }

    /// Runner that intercepts and streams.
    #[must_use]
    pub fn monitored_intercepting(interceptions: Vec<MessageInterception>) -> Self {
        Self::for_mode(RunMode::MonitoredIntercepting, interceptions)
    }

    /// Runner for an arbitrary mode.
    ///
    /// Interceptions are ignored by modes that do not intercept.
    #[must_use]
    pub const fn for_mode(mode: RunMode, interceptions: Vec<MessageInterception>) -> Self {
        Self {
            mode,
            interceptions,
            trace_path: None,
        }
    }

    /// Append the sealed trace to a JSONL file at `path`.
    #[must_use]
    pub fn with_trace_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.trace_path = Some(path.into());
        self
    }

    /// The runner's mode.
    #[must_use]
    pub const fn mode(&self) -> RunMode {
        self.mode
    }

    /// Execute `task` on the MAS under this runner's mode.
    ///
    /// A MAS failure is recorded on the returned [`WorkflowResult`] and the
    /// trace is sealed with `success = false`; the error is not propagated.
    /// `chat_manager` recipients in the result's message list are resolved
    /// post-hoc.
    ///
    /// # Errors
    ///
    /// Only trace-sealing failures propagate.
    pub async fn run(
        &self,
        mas: &dyn Mas,
        task: &str,
        options: &WorkflowOptions,
        sink: Option<&mut dyn StepSink>,
    ) -> Result<(WorkflowResult, WorkflowTrace)> {
        let mut writer = match &self.trace_path {
            Some(path) => StructuredLogWriter::with_output_file(path.clone()),
            None => StructuredLogWriter::new(),
        };
        writer.start_trace(task);

        let outcome = {
            let mut hook = RunnerHook {
                writer: &mut writer,
                interceptions: &self.interceptions,
                sink,
                mode: self.mode,
            };
            mas.run_workflow(task, options, Some(&mut hook)).await
        };

        let mut result = match outcome {
            Ok(result) => result,
            Err(err) => {
                error!(mode = %self.mode, %err, "MAS workflow failed");
                WorkflowResult::failure(err.to_string())
            }
        };

        let resolved = resolve_chat_manager_recipients(&result.messages);
        result.messages = resolved;
        let trace = writer.end_trace(result.success, result.error.clone())?;
        Ok((result, trace))
    }
}

struct RunnerHook<'a, 'b> {
    writer: &'a mut StructuredLogWriter,
    interceptions: &'a [MessageInterception],
    sink: Option<&'b mut dyn StepSink>,
    mode: RunMode,
}

impl RunnerHook<'_, '_> {
    fn provenance(event: &MessageEvent) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("from".to_owned(), Value::String(event.from_agent.clone()));
        metadata.insert("to".to_owned(), Value::String(event.to_agent.clone()));
        metadata.insert(
            "message_id".to_owned(),
            Value::String(event.message_id.clone()),
        );
        metadata
    }

    /// Log a step and, in streaming modes, forward it to the sink.
    async fn emit_step(
        &mut self,
        agent: &str,
        step_type: StepType,
        content: Content,
        metadata: Map<String, Value>,
    ) {
        self.writer
            .log_agent_step(agent, step_type, content, Some(metadata));
        if self.mode.streams()
            && let Some(sink) = self.sink.as_mut()
            && let Some(entry) = self.writer.current_steps().last().cloned()
        {
            sink.on_step(&entry).await;
        }
    }

    async fn apply_interceptions(&mut self, event: &MessageEvent, content: &mut String) -> bool {
        let mut modified_any = false;
        let matching: Vec<MessageInterception> = self
            .interceptions
            .iter()
            .filter(|i| i.source_agent == event.from_agent && i.target_agent == event.to_agent)
            .cloned()
            .collect();

        for interception in matching {
            match (interception.modifier)(content) {
                Ok(rewritten) => {
                    self.writer.log_interception(
                        &event.from_agent,
                        &event.to_agent,
                        content.clone(),
                        rewritten.clone(),
                        interception.attack_type.clone(),
                        Some(Self::provenance(event)),
                    );

                    if self.mode.streams() {
                        let mut step_content = Map::new();
                        step_content.insert(
                            "original_content".to_owned(),
                            Value::String(content.clone()),
                        );
                        step_content.insert(
                            "modified_content".to_owned(),
                            Value::String(rewritten.clone()),
                        );
                        if let Some(attack_type) = &interception.attack_type {
                            step_content.insert(
                                "attack_type".to_owned(),
                                Value::String(attack_type.clone()),
                            );
                        }
                        self.emit_step(
                            &event.from_agent.clone(),
                            StepType::Intercept,
                            Content::Structured(step_content),
                            Self::provenance(event),
                        )
                        .await;
                    }

                    *content = rewritten;
                    modified_any = true;
                }
                Err(err) => {
                    warn!(
                        source = %event.from_agent,
                        target = %event.to_agent,
                        %err,
                        "interception modifier failed, passing original content"
                    );
                    self.emit_step(
                        &event.from_agent.clone(),
                        StepType::Error,
                        Content::from(format!("interception modifier failed: {err}")),
                        Self::provenance(event),
                    )
                    .await;
                }
            }
        }
        modified_any
    }
}

#[async_trait]
impl MessageHook for RunnerHook<'_, '_> {
    async fn on_message(&mut self, event: &MessageEvent) -> Option<String> {
        let mut content = event.content.clone();
        let modified = if self.mode.intercepts() {
            self.apply_interceptions(event, &mut content).await
        } else {
            false
        };

        self.writer.log_message(
            &event.from_agent,
            &event.to_agent,
            content.clone(),
            &event.message_id,
            event.message_type,
            event.tool_calls.clone(),
            Some(Self::provenance(event)),
        );

        if self.mode.streams() {
            self.emit_step(
                &event.from_agent.clone(),
                StepType::Respond,
                Content::from(content.clone()),
                Self::provenance(event),
            )
            .await;
            self.emit_step(
                &event.to_agent.clone(),
                StepType::Receive,
                Content::from(content.clone()),
                Self::provenance(event),
            )
            .await;
        }

        modified.then_some(content)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mas::AgentInfo;
    use crate::message_utils::CHAT_MANAGER;
    use crate::scripted::ScriptedMas;

    fn ring_mas() -> ScriptedMas {
        ScriptedMas::new()
            .with_agent(AgentInfo::new("A", "planner"))
            .with_agent(AgentInfo::new("B", "worker"))
            .with_agent(AgentInfo::new("C", "reviewer"))
            .with_ring(&["A", "B", "C"])
    }

    fn append(payload: &str) -> MessageModifier {
        let payload = payload.to_owned();
        Arc::new(move |content: &str| Ok(format!("{content}{payload}")))
    }

    #[derive(Default)]
    struct CollectingSink {
        steps: Vec<AgentStepLog>,
    }

    #[async_trait]
    impl StepSink for CollectingSink {
        async fn on_step(&mut self, entry: &AgentStepLog) {
            self.steps.push(entry.clone());
        }
    }

    mod modes {
        use super::*;

        #[test]
        fn lattice_flags() {
            assert!(!RunMode::Basic.intercepts());
            assert!(!RunMode::Basic.streams());
            assert!(RunMode::Intercepting.intercepts());
            assert!(!RunMode::Intercepting.streams());
            assert!(!RunMode::Monitored.intercepts());
            assert!(RunMode::Monitored.streams());
            assert!(RunMode::MonitoredIntercepting.intercepts());
            assert!(RunMode::MonitoredIntercepting.streams());
        }
    }

    #[tokio::test]
    async fn basic_run_resolves_recipients() {
        let mas = ring_mas();
        let runner = WorkflowRunner::basic();
        let (result, trace) = runner
            .run(&mas, "say hello", &WorkflowOptions::default(), None)
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.messages.len() >= 3);
        // All recipients resolved except possibly the last.
        for message in &result.messages[..result.messages.len() - 1] {
            assert_ne!(message.to_agent, CHAT_MANAGER);
        }
        assert!(trace.agent_steps.is_empty());
        assert_eq!(trace.messages.len(), result.messages.len());
    }

    #[tokio::test]
    async fn monitored_run_streams_respond_and_receive() {
        let mas = ring_mas();
        let runner = WorkflowRunner::monitored();
        let mut sink = CollectingSink::default();
        let (result, trace) = runner
            .run(&mas, "say hello", &WorkflowOptions::default(), Some(&mut sink))
            .await
            .unwrap();

        assert!(result.success);
        // Each message produces a respond and a receive step.
        assert_eq!(sink.steps.len(), 2 * result.messages.len());
        assert_eq!(sink.steps[0].step_type, StepType::Respond);
        assert_eq!(sink.steps[1].step_type, StepType::Receive);
        assert_eq!(sink.steps[0].metadata_str("from"), Some("A"));
        assert_eq!(sink.steps[1].metadata_str("to"), Some("B"));
        assert!(trace.agent_steps.len() >= trace.messages.len());
    }

    #[tokio::test]
    async fn interception_rewrites_matching_hop_only() {
        let mas = ring_mas();
        let interception =
            MessageInterception::new("A", "B", append("; DROP TABLE users; --"));
        let runner = WorkflowRunner::intercepting(vec![interception]);
        let (result, trace) = runner
            .run(&mas, "task", &WorkflowOptions::default(), None)
            .await
            .unwrap();

        assert_eq!(trace.interceptions.len(), 1);
        let log = &trace.interceptions[0];
        assert_eq!(log.source_agent, "A");
        assert_eq!(log.target_agent, "B");
        assert_ne!(log.original_content, log.modified_content);
        assert!(log.modified_content.ends_with("; DROP TABLE users; --"));

        // The modified content reached the native record of the A hop.
        assert!(result.messages[0].content.contains("DROP TABLE"));
        // Downstream hops were not intercepted again.
        assert_eq!(trace.interceptions.len(), 1);
    }

    #[tokio::test]
    async fn interceptions_apply_in_declaration_order() {
        let mas = ring_mas();
        let runner = WorkflowRunner::intercepting(vec![
            MessageInterception::new("A", "B", append(" first")),
            MessageInterception::new("A", "B", append(" second")),
        ]);
        let (_, trace) = runner
            .run(&mas, "task", &WorkflowOptions::default(), None)
            .await
            .unwrap();

        assert_eq!(trace.interceptions.len(), 2);
        assert!(trace.interceptions[0].modified_content.ends_with(" first"));
        assert!(trace.interceptions[1].modified_content.ends_with(" first second"));
        // The message id is preserved across interception.
        assert_eq!(
            trace.interceptions[0].metadata.get("message_id"),
            trace.interceptions[1].metadata.get("message_id"),
        );
    }

    #[tokio::test]
    async fn failing_modifier_passes_original_and_logs_error_step() {
        let mas = ring_mas();
        let failing: MessageModifier =
            Arc::new(|_: &str| Err(crate::error::Error::interception("modifier exploded")));
        let runner = WorkflowRunner::monitored_intercepting(vec![MessageInterception::new(
            "A", "B", failing,
        )]);
        let mut sink = CollectingSink::default();
        let (result, trace) = runner
            .run(&mas, "task", &WorkflowOptions::default(), Some(&mut sink))
            .await
            .unwrap();

        assert!(result.success);
        assert!(trace.interceptions.is_empty());
        let error_steps: Vec<_> = trace
            .agent_steps
            .iter()
            .filter(|s| s.step_type == StepType::Error)
            .collect();
        assert_eq!(error_steps.len(), 1);
        assert!(error_steps[0].content.as_text().contains("modifier exploded"));
        // Original content flowed through unchanged.
        assert!(!result.messages[0].content.contains("exploded"));
    }

    #[tokio::test]
    async fn monitored_intercepting_emits_intercept_step() {
        let mas = ring_mas();
        let runner = WorkflowRunner::monitored_intercepting(vec![
            MessageInterception::new("A", "B", append(" [tampered]"))
                .with_attack_type("append"),
        ]);
        let mut sink = CollectingSink::default();
        let (_, trace) = runner
            .run(&mas, "task", &WorkflowOptions::default(), Some(&mut sink))
            .await
            .unwrap();

        let intercept_steps: Vec<_> = sink
            .steps
            .iter()
            .filter(|s| s.step_type == StepType::Intercept)
            .collect();
        assert_eq!(intercept_steps.len(), 1);
        let content = intercept_steps[0].content.as_text();
        assert!(content.contains("[tampered]"));
        assert!(content.contains("append"));
        // The intercept step precedes the respond/receive pair for the hop.
        let positions: Vec<_> = sink.steps.iter().map(|s| s.step_type).collect();
        let intercept_at = positions.iter().position(|s| *s == StepType::Intercept).unwrap();
        let respond_at = positions.iter().position(|s| *s == StepType::Respond).unwrap();
        assert!(intercept_at < respond_at);
        assert_eq!(trace.interceptions.len(), 1);
    }

    #[tokio::test]
    async fn mas_failure_is_recorded_not_propagated() {
        let mas = ring_mas().failing_with("native crash");
        let runner = WorkflowRunner::monitored();
        let (result, trace) = runner
            .run(&mas, "task", &WorkflowOptions::default(), None)
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("native crash"));
        assert!(!trace.success);
        assert!(trace.end_time.is_some());
    }
}
