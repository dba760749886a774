//! Agent runtime boundary.
//!
//! A runtime turns a prompt plus [`AgentOptions`] into an asynchronous stream of
//! [`AgentMessage`]s, calling the registered [`ToolHooks`] around every tool
//! invocation it performs.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::error::AgentError;

/// A tool-use request made by the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Result of a tool invocation as seen by the post-call hook.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    /// Set when the tool layer itself reported a failure.
    pub is_error: bool,
}

/// Content of an assistant message.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    ToolUse(ToolUse),
}

/// Token counts reported by the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One message from the agent stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    Assistant { content: Vec<ContentBlock> },
    /// User turn, including tool results fed back to the agent.
    User { content: String },
    /// End-of-run summary.
    Result {
        text: Option<String>,
        is_error: bool,
        usage: Option<TokenUsage>,
    },
    /// Anything the runtime could not classify, in string form.
    Unknown(String),
}

/// Configuration bundle passed to the runtime for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOptions {
    pub model: String,
    pub system_prompt: String,
    pub allowed_tools: Vec<String>,
    pub permission_mode: String,
    pub cwd: PathBuf,
    pub max_turns: u32,
}

/// Pre- and post-call hooks around every tool invocation.
#[async_trait]
pub trait ToolHooks: Send + Sync {
    async fn pre_tool_use(&self, tool: &ToolUse);

    async fn post_tool_use(&self, tool: &ToolUse, output: &ToolOutput);
}

pub type AgentStream = Pin<Box<dyn Stream<Item = Result<AgentMessage, AgentError>> + Send>>;

/// Something that can drive an agent against a prompt.
pub trait AgentRuntime: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Starts a run. Errors surface as items of the returned stream.
    fn query(&self, prompt: &str, options: &AgentOptions, hooks: Arc<dyn ToolHooks>) -> AgentStream;
}
