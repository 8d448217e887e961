//! Convenience re-exports for common usage.

pub use crate::client::{
    AnthropicClient, GenerateOptions, LlmClient, MockLlm, OpenAiClient, SharedLlmClient,
    client_for_mas, client_for_monitor,
};
pub use crate::config::{MasLlmConfig, MonitorLlmConfig};
pub use crate::error::{Error, Result};
pub use crate::intermediary::{Intermediary, MemoryType, RunOptions};
pub use crate::judge::{Judge, JudgeResult, RecommendedAction, Severity};
pub use crate::logging::{
    AgentStepLog, Content, InterceptionLog, MessageLog, MessageType, StepType,
    StructuredLogWriter, WorkflowTrace,
};
pub use crate::mas::{
    AgentInfo, HistoryEntry, Mas, MessageEvent, MessageHook, WorkflowOptions, WorkflowResult,
};
pub use crate::message_utils::{
    CHAT_MANAGER, resolve_chat_manager_recipients, resolve_nested_messages,
};
pub use crate::monitor::{
    Alert, GlobalMonitorAgent, GlobalMonitorConfig, Monitor, MonitorDecision, MonitorInfo,
    MonitorRegistry, default_monitors,
};
pub use crate::risk::{
    AttackResult, PairAttacker, PairOrchestrator, RiskInfo, RiskTest, TestCase, TestResult,
    TestSeverity, default_risk_tests,
};
pub use crate::runner::{
    MessageInterception, MessageModifier, RunMode, StepSink, WorkflowRunner,
};
pub use crate::safety::{MonitorSelectionMode, ProgressiveConfig, SafetyMas, TaskOptions};
pub use crate::scripted::ScriptedMas;
