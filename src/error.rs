//! Error types for distro-bench operations.
//!
//! Defines error types for the major subsystems:
//! - Task registry loading and lookup
//! - Container runtime calls (build, run, exec, remove)
//! - Environment provisioning and evaluation runs
//! - Shell command execution for verification probes
//! - Agent runtime interaction during trace collection
//! - Persisting evaluation results and traces
//! - Loading the settings file

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::execution::command::format_secs;

/// Errors that can occur while loading or querying the task registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Task '{0}' not found in registry")]
    TaskNotFound(String),

    #[error("Task '{0}' already exists in registry")]
    DuplicateTask(String),

    #[error("Failed to parse task definitions from {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors returned by the container runtime boundary.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker build failed: {0}")]
    BuildFailed(String),

    #[error("Docker run failed: {0}")]
    RunFailed(String),

    #[error("Docker exec failed: {0}")]
    ExecFailed(String),

    #[error("Container '{id}' not found")]
    ContainerNotFound { id: String },

    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Environment provisioning failures. Fatal to the evaluation that hit them.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Failed to build environment image '{image}': {diagnostic}")]
    ImageBuild { image: String, diagnostic: String },

    #[error("Failed to start environment container from '{image}': {diagnostic}")]
    Start { image: String, diagnostic: String },

    #[error("Failed to prepare work directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that abort an evaluation run. Step failures never appear here.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),
}

/// Errors from running a shell command for a verification probe.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command timed out after {}s", format_secs(.0))]
    Timeout(Duration),

    #[error("Failed to spawn command: {0}")]
    Spawn(String),

    #[error("Failed to run command in environment: {0}")]
    Runtime(#[from] DockerError),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommandError {
    /// Returns true when the command was killed for exceeding its timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::Timeout(_))
    }
}

/// Errors raised by the agent runtime during a trace-collection run.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent runtime not available: {0}")]
    NotAvailable(String),

    #[error("Failed to start agent: {0}")]
    Spawn(String),

    #[error("Agent stream error: {0}")]
    Stream(String),

    #[error("Agent run exceeded {}s", format_secs(.0))]
    Timeout(Duration),

    #[error("Agent exited with status {code}: {stderr}")]
    Exited { code: i32, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Stable name of the failure class, recorded as the trace error `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::NotAvailable(_) => "NotAvailable",
            AgentError::Spawn(_) => "SpawnError",
            AgentError::Stream(_) => "StreamError",
            AgentError::Timeout(_) => "Timeout",
            AgentError::Exited { .. } => "AgentExited",
            AgentError::Io(_) => "IoError",
        }
    }
}

/// Errors from loading the YAML settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Errors that can occur while persisting or loading run documents.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Failed to create storage directory {path}: {message}")]
    DirectoryCreationFailed { path: PathBuf, message: String },
}
