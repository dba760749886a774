//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use tokio::process::Command;

use distro_bench::execution::{ContainerRuntime, ExecResult, RunSpec};
use distro_bench::trajectory::{
    AgentMessage, AgentOptions, AgentRuntime, AgentStream, ContentBlock, TokenUsage, ToolHooks,
    ToolOutput, ToolUse,
};
use distro_bench::{AgentError, DockerError};

/// Container runtime that "runs" containers on the host.
///
/// A container is the host side of its first bind mount; `exec` runs the argv
/// there. Good enough to drive the container code paths without a daemon.
#[derive(Default)]
pub struct LoopbackRuntime {
    containers: Mutex<HashMap<String, PathBuf>>,
    dockerfiles: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    removed: AtomicUsize,
    fail_build: Option<String>,
}

impl LoopbackRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runtime whose image builds always fail with `diagnostic`.
    pub fn failing_build(diagnostic: &str) -> Self {
        Self {
            fail_build: Some(diagnostic.to_string()),
            ..Self::default()
        }
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }

    pub fn dockerfiles(&self) -> Vec<String> {
        self.dockerfiles.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for LoopbackRuntime {
    async fn build(&self, tag: &str, dockerfile: &str) -> Result<String, DockerError> {
        if let Some(diagnostic) = &self.fail_build {
            return Err(DockerError::BuildFailed(diagnostic.clone()));
        }
        self.dockerfiles.lock().unwrap().push(dockerfile.to_string());
        Ok(tag.to_string())
    }

    async fn run(&self, _image: &str, spec: &RunSpec) -> Result<String, DockerError> {
        let host = spec
            .binds
            .first()
            .and_then(|bind| bind.split(':').next())
            .map(PathBuf::from)
            .ok_or_else(|| DockerError::RunFailed("no bind mount".into()))?;
        let id = format!("loop-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.containers.lock().unwrap().insert(id.clone(), host);
        Ok(id)
    }

    async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecResult, DockerError> {
        let dir = self
            .containers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| DockerError::ContainerNotFound { id: id.to_string() })?;
        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DockerError::ExecFailed(e.to_string()))?;
        Ok(ExecResult {
            exit_code: output.status.code().map(i64::from).unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn remove(&self, id: &str) -> Result<(), DockerError> {
        self.containers
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| DockerError::ContainerNotFound { id: id.to_string() })?;
        self.removed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One scripted action of a [`ScriptedAgent`].
#[derive(Clone)]
pub enum ScriptStep {
    Say(String),
    Tool {
        name: String,
        input: Value,
        output: String,
    },
    Usage(u64, u64),
    Crash(String),
    Hang,
}

/// Agent runtime replaying a fixed script, firing hooks like a real runtime.
pub struct ScriptedAgent {
    script: Vec<ScriptStep>,
}

impl ScriptedAgent {
    pub fn new(script: Vec<ScriptStep>) -> Arc<Self> {
        Arc::new(Self { script })
    }
}

fn replay(
    script: Vec<ScriptStep>,
    hooks: Arc<dyn ToolHooks>,
) -> impl Stream<Item = Result<AgentMessage, AgentError>> + Send {
    async_stream::try_stream! {
        for (i, step) in script.into_iter().enumerate() {
            match step {
                ScriptStep::Say(text) => {
                    yield AgentMessage::Assistant { content: vec![ContentBlock::Text(text)] };
                }
                ScriptStep::Tool { name, input, output } => {
                    let tool = ToolUse { id: format!("toolu_{i}"), name, input };
                    hooks.pre_tool_use(&tool).await;
                    yield AgentMessage::Assistant { content: vec![ContentBlock::ToolUse(tool.clone())] };
                    let result = ToolOutput { content: output.clone(), is_error: false };
                    hooks.post_tool_use(&tool, &result).await;
                    yield AgentMessage::User { content: output };
                }
                ScriptStep::Usage(input_tokens, output_tokens) => {
                    yield AgentMessage::Result {
                        text: None,
                        is_error: false,
                        usage: Some(TokenUsage { input_tokens, output_tokens }),
                    };
                }
                ScriptStep::Crash(message) => {
                    Err(AgentError::Stream(message))?;
                }
                ScriptStep::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            }
        }
    }
}

impl AgentRuntime for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    fn query(&self, _prompt: &str, _options: &AgentOptions, hooks: Arc<dyn ToolHooks>) -> AgentStream {
        Box::pin(replay(self.script.clone(), hooks))
    }
}

pub fn tool(name: &str, input: Value, output: &str) -> ScriptStep {
    ScriptStep::Tool {
        name: name.to_string(),
        input,
        output: output.to_string(),
    }
}
