//! Trace collector for recording agent runs.
//!
//! A [`TraceCollector`] drives one agent run per call. The per-run state lives
//! in a [`RunContext`], which is registered with the runtime as its tool hooks
//! and also consumes the message stream. Nothing is shared between runs, so
//! several collectors can coexist in one process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use regex::Regex;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::agent::{AgentMessage, AgentRuntime, ContentBlock, ToolHooks, ToolOutput, ToolUse};
use super::config::CollectorConfig;
use super::storage::TraceStorage;
use super::types::{
    extract_final_output, is_error_output, round_secs, AgentTrace, SerializedBlock,
    SerializedMessage, ToolCall, TraceErrorRecord,
};
use crate::error::{AgentError, StorageError};
use crate::runner::result::truncate_chars;
use crate::task::Task;

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    Completed,
    Failed,
}

struct RunState {
    phase: RunPhase,
    trace: AgentTrace,
    started: Option<Instant>,
    /// Start time of in-flight tool calls, by tool-use id.
    pending: HashMap<String, Instant>,
}

/// Execution context of a single agent run.
pub struct RunContext {
    state: Mutex<RunState>,
    tool_output_limit: usize,
}

impl RunContext {
    pub fn new(trace: AgentTrace, tool_output_limit: usize) -> Self {
        Self {
            state: Mutex::new(RunState {
                phase: RunPhase::Idle,
                trace,
                started: None,
                pending: HashMap::new(),
            }),
            tool_output_limit,
        }
    }

    pub async fn phase(&self) -> RunPhase {
        self.state.lock().await.phase
    }

    /// Enters `Running` and starts the run clock.
    pub async fn begin(&self) {
        let mut state = self.state.lock().await;
        state.phase = RunPhase::Running;
        state.started = Some(Instant::now());
    }

    /// Appends one message from the agent stream.
    pub async fn record_message(&self, message: &AgentMessage) {
        let mut state = self.state.lock().await;
        if let AgentMessage::Result {
            usage: Some(usage), ..
        } = message
        {
            state.trace.total_tokens_in += usage.input_tokens;
            state.trace.total_tokens_out += usage.output_tokens;
        }
        if let AgentMessage::Assistant { content } = message {
            for block in content {
                if let ContentBlock::Text(text) = block {
                    debug!("Agent: {}", truncate_chars(text, 500));
                }
            }
        }
        state.trace.messages.push(serialize_message(message));
    }

    /// Leaves `Running`, stamps the duration and returns the finished trace.
    pub async fn finish(
        &self,
        outcome: Result<(), AgentError>,
        final_output_limit: usize,
    ) -> AgentTrace {
        let mut state = self.state.lock().await;
        match outcome {
            Ok(()) => {
                state.phase = RunPhase::Completed;
                state.trace.success = true;
                state.trace.final_output =
                    extract_final_output(&state.trace.messages, final_output_limit);
            }
            Err(e) => {
                error!(trace_id = %state.trace.trace_id, error = %e, "Agent run failed");
                state.phase = RunPhase::Failed;
                state.trace.success = false;
                state.trace.errors.push(TraceErrorRecord {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
        let elapsed = state.started.map(|s| s.elapsed().as_secs_f64()).unwrap_or(0.0);
        state.trace.total_duration_seconds = round_secs(elapsed);
        state.trace.clone()
    }
}

#[async_trait]
impl ToolHooks for RunContext {
    async fn pre_tool_use(&self, tool: &ToolUse) {
        let mut state = self.state.lock().await;
        if state.phase != RunPhase::Running {
            return;
        }
        state.pending.insert(tool.id.clone(), Instant::now());
        info!("→ {}: {}", tool.name, summarize_input(&tool.name, &tool.input));
    }

    async fn post_tool_use(&self, tool: &ToolUse, output: &ToolOutput) {
        let mut state = self.state.lock().await;
        if state.phase != RunPhase::Running {
            return;
        }
        let duration = state
            .pending
            .remove(&tool.id)
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let success = !is_error_output(&output.content, output.is_error);
        let error = if output.is_error {
            Some(truncate_chars(&output.content, self.tool_output_limit))
        } else {
            None
        };
        state.trace.tool_calls.push(ToolCall {
            tool_name: tool.name.clone(),
            tool_input: tool.input.clone(),
            tool_output: Some(truncate_chars(&output.content, self.tool_output_limit)),
            duration_seconds: round_secs(duration),
            timestamp: Utc::now(),
            success,
            error,
        });
        state.trace.total_tool_calls += 1;
    }
}

/// One-line summary of a tool input for the pre-call log line.
pub fn summarize_input(tool_name: &str, input: &Value) -> String {
    let field = |key: &str| input.get(key).and_then(Value::as_str).unwrap_or("");
    match tool_name {
        "Bash" => {
            let command = field("command");
            if command.chars().count() > 80 {
                format!("{}...", truncate_chars(command, 80))
            } else {
                command.to_string()
            }
        }
        "Read" | "Edit" => field("file_path").to_string(),
        "Write" => format!(
            "{} ({} chars)",
            field("file_path"),
            field("content").chars().count()
        ),
        _ => truncate_chars(&input.to_string(), 60),
    }
}

/// Maps a runtime message into the persisted `{role, content}` shape.
pub fn serialize_message(message: &AgentMessage) -> SerializedMessage {
    match message {
        AgentMessage::Assistant { content } => SerializedMessage::Assistant {
            content: content
                .iter()
                .map(|block| match block {
                    ContentBlock::Text(text) => SerializedBlock::Text { text: text.clone() },
                    ContentBlock::ToolUse(tool) => SerializedBlock::ToolUse {
                        name: tool.name.clone(),
                        input: tool.input.clone(),
                    },
                })
                .collect(),
        },
        AgentMessage::User { content } => SerializedMessage::User {
            content: content.clone(),
        },
        AgentMessage::Result {
            text,
            is_error,
            usage,
        } => SerializedMessage::Unknown {
            content: format!(
                "Result(is_error={}, usage={:?}, text={:?})",
                is_error, usage, text
            ),
        },
        AgentMessage::Unknown(raw) => SerializedMessage::Unknown {
            content: raw.clone(),
        },
    }
}

fn unsafe_chars() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").ok())
        .as_ref()
}

/// Derives a filesystem-safe trace id unique to this run.
pub fn derive_trace_id(task_id: &str) -> String {
    let cleaned = unsafe_chars()
        .map(|re| re.replace_all(task_id, "_").into_owned())
        .unwrap_or_else(|| task_id.to_string());
    let cleaned = cleaned.trim_start_matches(['.', '_']);
    let stem = if cleaned.is_empty() { "task" } else { cleaned };
    let short = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        stem,
        Utc::now().format("%Y%m%d-%H%M%S"),
        &short[..8]
    )
}

/// Drives agent runs and persists one trace per run.
pub struct TraceCollector {
    config: CollectorConfig,
    runtime: Arc<dyn AgentRuntime>,
    storage: TraceStorage,
}

impl TraceCollector {
    pub fn new(config: CollectorConfig, runtime: Arc<dyn AgentRuntime>) -> Self {
        let storage = TraceStorage::new(config.trace_dir.clone());
        Self {
            config,
            runtime,
            storage,
        }
    }

    pub fn storage(&self) -> &TraceStorage {
        &self.storage
    }

    /// Runs the agent on a task's instructions.
    pub async fn collect(&self, task: &Task) -> Result<AgentTrace, StorageError> {
        self.run(&task.id, &task.instructions, &task.success_artifacts)
            .await
    }

    /// Runs the agent on `prompt` and persists the trace, whatever the outcome.
    ///
    /// # Errors
    /// Only a failure to write the trace file is returned. Agent failures are
    /// recorded in the trace.
    pub async fn run(
        &self,
        task_id: &str,
        prompt: &str,
        success_artifacts: &[String],
    ) -> Result<AgentTrace, StorageError> {
        let trace_id = derive_trace_id(task_id);
        info!(
            trace_id = %trace_id,
            task_id = %task_id,
            model = %self.config.model,
            runtime = %self.runtime.name(),
            "Starting agent run"
        );

        let trace = AgentTrace::new(&trace_id, task_id, prompt, &self.config.model);
        let ctx = Arc::new(RunContext::new(trace, self.config.tool_output_limit));
        ctx.begin().await;

        let options = self.config.agent_options();
        let hooks: Arc<dyn ToolHooks> = ctx.clone();
        let drive = async {
            let mut stream = self.runtime.query(prompt, &options, hooks);
            while let Some(item) = stream.next().await {
                ctx.record_message(&item?).await;
            }
            Ok::<(), AgentError>(())
        };
        let outcome = match self.config.run_timeout() {
            Some(limit) => tokio::time::timeout(limit, drive)
                .await
                .unwrap_or(Err(AgentError::Timeout(limit))),
            None => drive.await,
        };

        let mut trace = ctx.finish(outcome, self.config.final_output_limit).await;
        trace.artifacts_produced = existing_artifacts(&self.config.working_dir, success_artifacts);

        let path = self.storage.save(&trace).await?;
        info!(
            trace_id = %trace.trace_id,
            success = trace.success,
            tool_calls = trace.total_tool_calls,
            duration_secs = trace.total_duration_seconds,
            "Trace saved to {}",
            path.display()
        );
        Ok(trace)
    }

    pub fn trace_path(&self, trace: &AgentTrace) -> PathBuf {
        self.storage.trace_path(&trace.trace_id)
    }
}

fn existing_artifacts(working_dir: &Path, declared: &[String]) -> Vec<String> {
    declared
        .iter()
        .filter(|artifact| {
            let exists = working_dir.join(artifact.as_str()).exists();
            if !exists {
                debug!(artifact = %artifact, "Declared artifact not produced");
            }
            exists
        })
        .cloned()
        .collect()
}

impl Drop for RunContext {
    fn drop(&mut self) {
        if let Ok(state) = self.state.try_lock() {
            if !state.pending.is_empty() {
                warn!(
                    trace_id = %state.trace.trace_id,
                    pending = state.pending.len(),
                    "Run ended with tool calls that never completed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::agent::{AgentOptions, AgentStream, TokenUsage};
    use serde_json::json;
    use tempfile::TempDir;

    fn tool(id: &str, name: &str, input: Value) -> ToolUse {
        ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    #[test]
    fn test_summarize_input() {
        let long = "x".repeat(100);
        assert_eq!(
            summarize_input("Bash", &json!({"command": long})),
            format!("{}...", "x".repeat(80))
        );
        assert_eq!(summarize_input("Bash", &json!({"command": "make"})), "make");
        assert_eq!(
            summarize_input("Read", &json!({"file_path": "/etc/fstab"})),
            "/etc/fstab"
        );
        assert_eq!(
            summarize_input("Write", &json!({"file_path": "a.sh", "content": "echo"})),
            "a.sh (4 chars)"
        );
        assert_eq!(
            summarize_input("Glob", &json!({"pattern": "*"})).chars().count(),
            15
        );
    }

    #[test]
    fn test_trace_id_is_filesystem_safe() {
        let id = derive_trace_id("../debug 001/x");
        assert!(id.starts_with("debug_001_x-"));
        assert!(!id.contains('/'));
        assert_ne!(derive_trace_id("t"), derive_trace_id("t"));
        assert!(derive_trace_id("///").starts_with("task-"));
    }

    #[tokio::test]
    async fn test_hooks_record_tool_calls_only_while_running() {
        let ctx = RunContext::new(AgentTrace::new("id", "t", "p", "m"), 10);
        let call = tool("1", "Bash", json!({"command": "make"}));
        let output = ToolOutput {
            content: "make: *** Error 2 and a long tail".into(),
            is_error: false,
        };

        ctx.post_tool_use(&call, &output).await;
        assert_eq!(ctx.phase().await, RunPhase::Idle);

        ctx.begin().await;
        ctx.pre_tool_use(&call).await;
        ctx.post_tool_use(&call, &output).await;
        let trace = ctx.finish(Ok(()), 100).await;

        assert_eq!(trace.total_tool_calls, 1);
        let recorded = &trace.tool_calls[0];
        assert!(!recorded.success);
        assert_eq!(recorded.tool_output.as_deref(), Some("make: *** "));
        assert_eq!(ctx.phase().await, RunPhase::Completed);
    }

    #[tokio::test]
    async fn test_flagged_tool_result_is_not_a_success() {
        let ctx = RunContext::new(AgentTrace::new("id", "t", "p", "m"), 100);
        ctx.begin().await;
        let call = tool("1", "Read", json!({"file_path": "/root/.config"}));
        let output = ToolOutput {
            content: "Permission denied".into(),
            is_error: true,
        };
        ctx.pre_tool_use(&call).await;
        ctx.post_tool_use(&call, &output).await;
        let trace = ctx.finish(Ok(()), 100).await;

        let recorded = &trace.tool_calls[0];
        assert!(!recorded.success);
        assert_eq!(recorded.error.as_deref(), Some("Permission denied"));
    }

    #[tokio::test]
    async fn test_failed_finish_records_error() {
        let ctx = RunContext::new(AgentTrace::new("id", "t", "p", "m"), 10);
        ctx.begin().await;
        let trace = ctx
            .finish(Err(AgentError::Stream("broken pipe".into())), 100)
            .await;
        assert!(!trace.success);
        assert_eq!(trace.errors.len(), 1);
        assert_eq!(trace.errors[0].kind, "StreamError");
        assert_eq!(ctx.phase().await, RunPhase::Failed);
    }

    struct FixedRuntime {
        messages: Vec<AgentMessage>,
    }

    impl AgentRuntime for FixedRuntime {
        fn name(&self) -> &str {
            "fixed"
        }

        fn query(&self, _: &str, _: &AgentOptions, _: Arc<dyn ToolHooks>) -> AgentStream {
            let items: Vec<Result<AgentMessage, AgentError>> =
                self.messages.iter().cloned().map(Ok).collect();
            Box::pin(futures::stream::iter(items))
        }
    }

    #[tokio::test]
    async fn test_run_accumulates_tokens_and_final_output() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bzImage"), "k").unwrap();
        let runtime = FixedRuntime {
            messages: vec![
                AgentMessage::Assistant {
                    content: vec![ContentBlock::Text("Kernel built".into())],
                },
                AgentMessage::Result {
                    text: Some("done".into()),
                    is_error: false,
                    usage: Some(TokenUsage {
                        input_tokens: 120,
                        output_tokens: 30,
                    }),
                },
            ],
        };
        let config = CollectorConfig::default()
            .with_trace_dir(dir.path().join("traces"))
            .with_working_dir(dir.path());
        let collector = TraceCollector::new(config, Arc::new(runtime));

        let artifacts = vec!["bzImage".to_string(), "rootfs.ext2".to_string()];
        let trace = collector.run("buildroot-001", "build it", &artifacts).await.unwrap();

        assert!(trace.success);
        assert_eq!(trace.final_output, "Kernel built");
        assert_eq!(trace.total_tokens_in, 120);
        assert_eq!(trace.total_tokens_out, 30);
        assert_eq!(trace.messages.len(), 2);
        assert_eq!(trace.artifacts_produced, vec!["bzImage"]);
        assert!(collector.trace_path(&trace).exists());
    }
}
