//! Structured execution logging.
//!
//! Immutable event records ([`AgentStepLog`], [`MessageLog`],
//! [`InterceptionLog`]) are collected into a per-run [`WorkflowTrace`] by a
//! [`StructuredLogWriter`]; sealed traces can be appended to a JSONL file,
//! one JSON object per line.

mod schema;
mod writer;

pub use schema::{
    AgentStepLog, Content, InterceptionLog, MessageLog, MessageType, StepType, WorkflowTrace,
    now_ts,
};
pub use writer::StructuredLogWriter;
