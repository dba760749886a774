//! Agent runtime backed by the `claude` CLI in stream-json print mode.
//!
//! Each stdout line is one NDJSON event. Assistant `tool_use` blocks fire the
//! pre-call hook; the matching `tool_result` block in the following user event
//! fires the post-call hook.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;

use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::agent::{
    AgentMessage, AgentOptions, AgentRuntime, AgentStream, ContentBlock, TokenUsage, ToolHooks,
    ToolOutput, ToolUse,
};
use crate::error::AgentError;
use crate::runner::result::truncate_chars;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CliEvent {
    System {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        model: Option<String>,
    },
    Assistant {
        message: AssistantPayload,
    },
    User {
        message: UserPayload,
    },
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        usage: Option<UsagePayload>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AssistantPayload {
    #[serde(default)]
    content: Vec<CliBlock>,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    #[serde(default)]
    content: UserContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserContent {
    Text(String),
    Blocks(Vec<CliBlock>),
}

impl Default for UserContent {
    fn default() -> Self {
        UserContent::Text(String::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CliBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: ToolResultContent,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolResultContent {
    Text(String),
    Structured(Vec<Value>),
}

impl Default for ToolResultContent {
    fn default() -> Self {
        ToolResultContent::Text(String::new())
    }
}

impl ToolResultContent {
    fn to_text(&self) -> String {
        match self {
            ToolResultContent::Text(s) => s.clone(),
            ToolResultContent::Structured(items) => items
                .iter()
                .map(|item| match item.get("text").and_then(Value::as_str) {
                    Some(text) => text.to_string(),
                    None if item.get("type").and_then(Value::as_str) == Some("image") => {
                        "[image]".to_string()
                    }
                    None => item.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UsagePayload {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Runtime that shells out to the `claude` CLI.
#[derive(Debug, Clone)]
pub struct ClaudeCliRuntime {
    cli_path: String,
}

impl ClaudeCliRuntime {
    pub fn new(cli_path: impl Into<String>) -> Self {
        Self {
            cli_path: cli_path.into(),
        }
    }

    fn command(&self, options: &AgentOptions) -> Command {
        let mut cmd = Command::new(&self.cli_path);
        cmd.current_dir(&options.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .args(cli_args(options));
        cmd
    }
}

impl Default for ClaudeCliRuntime {
    fn default() -> Self {
        Self::new(std::env::var("CLAUDE_CLI_PATH").unwrap_or_else(|_| "claude".to_string()))
    }
}

fn cli_args(options: &AgentOptions) -> Vec<String> {
    let mut args: Vec<String> = ["--print", "--output-format", "stream-json", "--verbose"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend(["--model".to_string(), options.model.clone()]);
    args.extend(["--max-turns".to_string(), options.max_turns.to_string()]);
    args.extend(["--permission-mode".to_string(), options.permission_mode.clone()]);
    if !options.system_prompt.is_empty() {
        args.extend(["--system-prompt".to_string(), options.system_prompt.clone()]);
    }
    if !options.allowed_tools.is_empty() {
        args.extend(["--allowedTools".to_string(), options.allowed_tools.join(",")]);
    }
    args
}

/// Per-run translation state: tool uses awaiting their result.
#[derive(Default)]
struct EventTranslator {
    pending: HashMap<String, ToolUse>,
}

impl EventTranslator {
    async fn translate(&mut self, event: CliEvent, hooks: &dyn ToolHooks) -> Option<AgentMessage> {
        match event {
            CliEvent::System { subtype, model } => {
                debug!(subtype = %subtype, model = ?model, "Agent session event");
                Some(AgentMessage::Unknown(format!("system:{subtype}")))
            }
            CliEvent::Assistant { message } => {
                let mut content = Vec::with_capacity(message.content.len());
                for block in message.content {
                    match block {
                        CliBlock::Text { text } => content.push(ContentBlock::Text(text)),
                        CliBlock::ToolUse { id, name, input } => {
                            let tool = ToolUse { id, name, input };
                            hooks.pre_tool_use(&tool).await;
                            self.pending.insert(tool.id.clone(), tool.clone());
                            content.push(ContentBlock::ToolUse(tool));
                        }
                        CliBlock::ToolResult { .. } | CliBlock::Other => {}
                    }
                }
                Some(AgentMessage::Assistant { content })
            }
            CliEvent::User { message } => {
                let text = match message.content {
                    UserContent::Text(text) => text,
                    UserContent::Blocks(blocks) => {
                        let mut parts = Vec::new();
                        for block in blocks {
                            match block {
                                CliBlock::ToolResult {
                                    tool_use_id,
                                    content,
                                    is_error,
                                } => {
                                    let output = ToolOutput {
                                        content: content.to_text(),
                                        is_error,
                                    };
                                    match self.pending.remove(&tool_use_id) {
                                        Some(tool) => hooks.post_tool_use(&tool, &output).await,
                                        None => warn!(
                                            tool_use_id = %tool_use_id,
                                            "Tool result without a matching tool use"
                                        ),
                                    }
                                    parts.push(output.content);
                                }
                                CliBlock::Text { text } => parts.push(text),
                                CliBlock::ToolUse { .. } | CliBlock::Other => {}
                            }
                        }
                        parts.join("\n")
                    }
                };
                Some(AgentMessage::User { content: text })
            }
            CliEvent::Result {
                result,
                is_error,
                usage,
            } => Some(AgentMessage::Result {
                text: result,
                is_error,
                usage: usage.map(|u| TokenUsage {
                    input_tokens: u.input_tokens,
                    output_tokens: u.output_tokens,
                }),
            }),
            CliEvent::Other => None,
        }
    }
}

impl AgentRuntime for ClaudeCliRuntime {
    fn name(&self) -> &str {
        "claude-cli"
    }

    fn query(&self, prompt: &str, options: &AgentOptions, hooks: Arc<dyn ToolHooks>) -> AgentStream {
        let cmd = self.command(options);
        Box::pin(cli_events(
            cmd,
            self.cli_path.clone(),
            prompt.to_string(),
            options.model.clone(),
            hooks,
        ))
    }
}

fn cli_events(
    mut cmd: Command,
    cli_path: String,
    prompt: String,
    model: String,
    hooks: Arc<dyn ToolHooks>,
) -> impl Stream<Item = Result<AgentMessage, AgentError>> + Send {
    async_stream::try_stream! {
        info!(cli = %cli_path, model = %model, "Spawning agent CLI");
        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                AgentError::NotAvailable(format!("'{cli_path}' not found on PATH"))
            }
            _ => AgentError::Spawn(e.to_string()),
        })?;

        // Closing stdin after the prompt marks the end of input.
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Spawn("stdout not captured".to_string()))?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut translator = EventTranslator::default();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| AgentError::Stream(e.to_string()))?
        {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CliEvent>(&line) {
                Ok(event) => {
                    if let Some(message) = translator.translate(event, hooks.as_ref()).await {
                        yield message;
                    }
                }
                Err(e) => {
                    warn!("Failed to parse agent event: {} - line: {}", e, truncate_chars(&line, 200));
                }
            }
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if !status.success() {
            Err(AgentError::Exited {
                code: status.code().unwrap_or(-1),
                stderr: truncate_chars(stderr.trim(), 2000),
            })?;
        }
    }
}
