//! Agent trace data types.
//!
//! An [`AgentTrace`] records one agent run against a task prompt: every tool
//! call in chronological order, the serialized message stream, and any errors
//! that ended the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runner::result::truncate_chars;

/// Record of a single tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    /// Opaque key-value input, as sent by the agent.
    pub tool_input: Value,
    /// Stringified output, truncated to the collector's output limit.
    pub tool_output: Option<String>,
    pub duration_seconds: f64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

/// An error that ended an agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceErrorRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// One content entry of a serialized assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SerializedBlock {
    Text { text: String },
    ToolUse { name: String, input: Value },
}

/// Uniform `{role, content}` record persisted for every agent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum SerializedMessage {
    Assistant { content: Vec<SerializedBlock> },
    User { content: String },
    Unknown { content: String },
}

/// Complete trace of one agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTrace {
    /// Filesystem-safe, unique per run.
    pub trace_id: String,
    pub task_id: String,
    pub task_prompt: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,

    pub success: bool,
    pub total_duration_seconds: f64,
    pub total_tool_calls: u32,
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,

    /// Append-only, chronological.
    pub tool_calls: Vec<ToolCall>,
    pub messages: Vec<SerializedMessage>,
    pub errors: Vec<TraceErrorRecord>,

    pub final_output: String,
    pub artifacts_produced: Vec<String>,
}

impl AgentTrace {
    /// A fresh, empty trace.
    pub fn new(
        trace_id: impl Into<String>,
        task_id: impl Into<String>,
        task_prompt: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            task_id: task_id.into(),
            task_prompt: task_prompt.into(),
            model: model.into(),
            timestamp: Utc::now(),
            success: false,
            total_duration_seconds: 0.0,
            total_tool_calls: 0,
            total_tokens_in: 0,
            total_tokens_out: 0,
            tool_calls: Vec::new(),
            messages: Vec::new(),
            errors: Vec::new(),
            final_output: String::new(),
            artifacts_produced: Vec::new(),
        }
    }
}

/// Tool output classification.
///
/// A call counts as failed when the tool layer flagged it, or when its output
/// mentions "error" in any case. Every success decision in the collector goes
/// through here.
pub fn is_error_output(output: &str, flagged: bool) -> bool {
    flagged || output.to_lowercase().contains("error")
}

/// Text of the most recent assistant message carrying text, truncated.
pub fn extract_final_output(messages: &[SerializedMessage], max_chars: usize) -> String {
    messages
        .iter()
        .rev()
        .filter_map(|msg| match msg {
            SerializedMessage::Assistant { content } => content.iter().find_map(|block| match block {
                SerializedBlock::Text { text } => Some(text.as_str()),
                SerializedBlock::ToolUse { .. } => None,
            }),
            _ => None,
        })
        .next()
        .map(|text| truncate_chars(text, max_chars))
        .unwrap_or_default()
}

/// Rounds seconds to two decimal places.
pub fn round_secs(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}
