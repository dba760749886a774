//! distro-bench: verification and evaluation engine for Linux system-building
//! agent tasks.
//!
//! This library provides a registry of declarative build tasks, an evaluator
//! that provisions an isolated environment and runs each task's verification
//! steps against it, and a trace collector that records an agent's tool calls
//! while it attempts a task.

pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod runner;
pub mod task;
pub mod trajectory;

// Re-export commonly used error types
pub use error::{
    AgentError, CommandError, ConfigError, DockerError, EvaluationError, ProvisionError,
    RegistryError, StorageError,
};
