//! Agent trace collection.
//!
//! Drives an agent runtime against a task prompt and records every tool call,
//! the serialized message stream, and the run outcome as an [`AgentTrace`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use distro_bench::trajectory::{ClaudeCliRuntime, CollectorConfig, TraceCollector};
//!
//! let collector = TraceCollector::new(
//!     CollectorConfig::default().with_trace_dir("./traces"),
//!     Arc::new(ClaudeCliRuntime::default()),
//! );
//! let trace = collector.collect(task).await?;
//! println!("{} tool calls, success={}", trace.total_tool_calls, trace.success);
//! ```

pub mod agent;
pub mod claude;
pub mod collector;
pub mod config;
pub mod storage;
pub mod types;

pub use agent::{
    AgentMessage, AgentOptions, AgentRuntime, AgentStream, ContentBlock, TokenUsage, ToolHooks,
    ToolOutput, ToolUse,
};
pub use claude::ClaudeCliRuntime;
pub use collector::{RunContext, RunPhase, TraceCollector};
pub use config::CollectorConfig;
pub use storage::TraceStorage;
pub use types::{AgentTrace, SerializedBlock, SerializedMessage, ToolCall, TraceErrorRecord};
