//! Execution layer: the container runtime boundary and shell command execution.
//!
//! # Architecture
//!
//! Environment containers follow this lifecycle:
//! ```text
//! BUILD IMAGE → RUN (sleep infinity) → EXEC ... → REMOVE
//! ```
//!
//! # Example
//!
//! ```ignore
//! use distro_bench::execution::{ContainerRuntime, DockerClient, RunSpec};
//!
//! let client = DockerClient::new()?;
//! let image = client.build("distro-bench-debug-001:latest", &dockerfile).await?;
//! let id = client.run(&image, &RunSpec::new("distro-bench-debug-001-1", "/workspace")).await?;
//! let result = client.exec(&id, &["uname".into(), "-a".into()]).await?;
//! client.remove(&id).await?;
//! ```

pub mod command;
pub mod docker_client;
pub mod dockerfile;
pub mod runtime;

pub use command::{run_in_container, run_local};
pub use docker_client::DockerClient;
pub use runtime::{ContainerRuntime, ExecResult, RunSpec};
