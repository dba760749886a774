//! Container runtime boundary.
//!
//! The evaluation core only ever builds an image, starts a long-lived container,
//! executes commands in it and removes it. Anything else about the runtime is
//! opaque. [`DockerClient`](super::DockerClient) is the production
//! implementation; tests substitute their own.

use async_trait::async_trait;

use crate::error::DockerError;

/// Result of executing a command, locally or inside an environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Exit code of the command. -1 when the runtime did not report one.
    pub exit_code: i64,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr as one text blob.
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        out.push_str(&self.stderr);
        out
    }
}

/// How to start an environment container.
#[derive(Debug, Clone)]
pub struct RunSpec {
    /// Unique container name.
    pub name: String,
    /// Bind mounts in `host:container` form.
    pub binds: Vec<String>,
    /// Working directory inside the container.
    pub working_dir: String,
    /// Long-lived command keeping the container up.
    pub cmd: Vec<String>,
}

impl RunSpec {
    pub fn new(name: impl Into<String>, working_dir: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binds: Vec::new(),
            working_dir: working_dir.into(),
            cmd: vec!["sleep".to_string(), "infinity".to_string()],
        }
    }

    pub fn with_bind(mut self, host: &str, container: &str) -> Self {
        self.binds.push(format!("{host}:{container}"));
        self
    }
}

/// The four operations the evaluation core needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Builds an image from Dockerfile text and tags it. Returns the image reference.
    async fn build(&self, tag: &str, dockerfile: &str) -> Result<String, DockerError>;

    /// Starts a detached container from an image. Returns the container id.
    async fn run(&self, image: &str, spec: &RunSpec) -> Result<String, DockerError>;

    /// Executes an argv inside a running container.
    async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecResult, DockerError>;

    /// Force-removes a container.
    async fn remove(&self, id: &str) -> Result<(), DockerError>;
}
