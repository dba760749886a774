//! Docker API wrapper using the bollard crate.
//!
//! Implements [`ContainerRuntime`] against the local Docker daemon.

use std::future::Future;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::BuildImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::runtime::{ContainerRuntime, ExecResult, RunSpec};
use crate::error::DockerError;

/// Number of build log lines kept for the failure diagnostic.
const BUILD_LOG_TAIL: usize = 20;

/// Docker client wrapper for container operations.
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Creates a new Docker client connecting to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::DaemonUnavailable` if the Docker daemon is not accessible.
    pub fn new() -> Result<Self, DockerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DockerError::DaemonUnavailable(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    /// Checks that the daemon answers.
    pub async fn ping(&self) -> Result<(), DockerError> {
        self.docker
            .ping()
            .await
            .map_err(|e| DockerError::DaemonUnavailable(e.to_string()))?;
        Ok(())
    }
}

/// Packs a lone Dockerfile into an in-memory tar build context.
fn build_context(dockerfile: &str) -> Result<Vec<u8>, DockerError> {
    let mut header = tar::Header::new_gnu();
    header.set_path("Dockerfile")?;
    header.set_size(dockerfile.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append(&header, dockerfile.as_bytes())?;
    Ok(builder.into_inner()?)
}

fn log_tail(log: &[String]) -> String {
    let start = log.len().saturating_sub(BUILD_LOG_TAIL);
    log[start..].concat()
}

fn map_not_found(id: &str, e: bollard::errors::Error, what: &str) -> DockerError {
    if e.to_string().contains("No such container") {
        DockerError::ContainerNotFound { id: id.to_string() }
    } else {
        DockerError::ExecFailed(format!("{what}: {e}"))
    }
}

/// Removes a created container when a later lifecycle step failed, so no
/// container outlives a failed start. Removal errors are logged only.
async fn discard_on_failure<T, R, F>(
    id: &str,
    result: Result<T, DockerError>,
    remove: R,
) -> Result<T, DockerError>
where
    R: FnOnce(String) -> F,
    F: Future<Output = Result<(), DockerError>>,
{
    if result.is_err() {
        if let Err(e) = remove(id.to_string()).await {
            warn!(id, error = %e, "Failed to remove container after failed start");
        }
    }
    result
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn build(&self, tag: &str, dockerfile: &str) -> Result<String, DockerError> {
        let context = build_context(dockerfile)?;
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        info!(image = tag, "Building environment image");
        let mut stream = self.docker.build_image(options, None, Some(context.into()));
        let mut log: Vec<String> = Vec::new();

        while let Some(item) = stream.next().await {
            match item {
                Ok(build_info) => {
                    if let Some(error) = build_info.error {
                        return Err(DockerError::BuildFailed(format!("{error}\n{}", log_tail(&log))));
                    }
                    if let Some(line) = build_info.stream {
                        debug!(image = tag, "{}", line.trim_end());
                        log.push(line);
                    }
                }
                Err(e) => {
                    return Err(DockerError::BuildFailed(format!("{e}\n{}", log_tail(&log))));
                }
            }
        }

        Ok(tag.to_string())
    }

    async fn run(&self, image: &str, spec: &RunSpec) -> Result<String, DockerError> {
        let host_config = HostConfig {
            binds: if spec.binds.is_empty() {
                None
            } else {
                Some(spec.binds.clone())
            },
            ..Default::default()
        };

        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(spec.cmd.clone()),
            working_dir: Some(spec.working_dir.clone()),
            host_config: Some(host_config),
            tty: Some(false),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to create container: {e}")))?;

        let started = self
            .docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to start container: {e}")));
        discard_on_failure(&response.id, started, |id| async move { self.remove(&id).await })
            .await?;

        info!(container = %spec.name, id = %response.id, "Environment container started");
        Ok(response.id)
    }

    async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecResult, DockerError> {
        let exec_options = CreateExecOptions {
            cmd: Some(argv.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, exec_options)
            .await
            .map_err(|e| map_not_found(id, e, "Failed to create exec"))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| DockerError::ExecFailed(format!("Failed to start exec: {e}")))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(DockerError::ExecFailed(format!("Error reading output: {e}")));
                    }
                }
            }
        }

        let exec_info = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| DockerError::ExecFailed(format!("Failed to inspect exec: {e}")))?;

        Ok(ExecResult {
            exit_code: exec_info.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn remove(&self, id: &str) -> Result<(), DockerError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| {
                if e.to_string().contains("No such container") {
                    DockerError::ContainerNotFound { id: id.to_string() }
                } else {
                    DockerError::RunFailed(format!("Failed to remove container: {e}"))
                }
            })?;

        Ok(())
    }
}
