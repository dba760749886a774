//! Environment provisioning for evaluation runs.
//!
//! Turns a task's environment requirements into an isolated container, or into a
//! local pseudo-environment when isolation is disabled. An [`Environment`] must be
//! torn down exactly once; [`Environment::teardown`] consumes it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::RunnerConfig;
use crate::error::{DockerError, ProvisionError};
use crate::execution::dockerfile::render_dockerfile;
use crate::execution::{ContainerRuntime, RunSpec};
use crate::task::Task;

/// Where verification probes execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentHandle {
    /// The local filesystem and process space, rooted at `work_dir`.
    Local { work_dir: PathBuf },
    /// A running container owned by one evaluation.
    Container {
        id: String,
        name: String,
        image: String,
    },
}

impl EnvironmentHandle {
    pub fn is_local(&self) -> bool {
        matches!(self, EnvironmentHandle::Local { .. })
    }

    /// Short label for logs.
    pub fn label(&self) -> &str {
        match self {
            EnvironmentHandle::Local { .. } => "local",
            EnvironmentHandle::Container { name, .. } => name,
        }
    }
}

/// A provisioned environment. Tear it down with [`Environment::teardown`].
pub struct Environment {
    handle: EnvironmentHandle,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    active: bool,
}

impl Environment {
    /// A local pseudo-environment rooted at `work_dir`.
    pub fn local(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            handle: EnvironmentHandle::Local {
                work_dir: work_dir.into(),
            },
            runtime: None,
            active: true,
        }
    }

    pub fn handle(&self) -> &EnvironmentHandle {
        &self.handle
    }

    pub(crate) fn runtime(&self) -> Option<&dyn ContainerRuntime> {
        self.runtime.as_deref()
    }

    /// Force-removes the environment. Local environments have nothing to remove.
    pub async fn teardown(mut self) -> Result<(), DockerError> {
        self.active = false;
        match (&self.handle, &self.runtime) {
            (EnvironmentHandle::Container { id, name, .. }, Some(runtime)) => {
                info!(container = %name, "Tearing down environment");
                runtime.remove(id).await
            }
            _ => Ok(()),
        }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if self.active && !self.handle.is_local() {
            warn!("Environment {} was not torn down", self.handle.label());
        }
    }
}

/// Provisions task environments.
pub struct Provisioner {
    config: RunnerConfig,
    runtime: Option<Arc<dyn ContainerRuntime>>,
}

impl Provisioner {
    /// A provisioner that only hands out local environments.
    pub fn local(config: RunnerConfig) -> Self {
        Self {
            config,
            runtime: None,
        }
    }

    /// A provisioner backed by a container runtime. Isolation still follows
    /// `config.docker_enabled`.
    pub fn with_runtime(config: RunnerConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            config,
            runtime: Some(runtime),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Image tag for a task's environment.
    pub fn image_tag(&self, task: &Task) -> String {
        format!(
            "{}-{}:latest",
            sanitize_name(&self.config.image_prefix),
            sanitize_name(&task.id)
        )
        .to_lowercase()
    }

    /// Collision-free container name: task id plus wall-clock millis plus a
    /// random suffix.
    pub fn container_name(&self, task: &Task) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}-{}",
            sanitize_name(&self.config.image_prefix),
            sanitize_name(&task.id),
            millis,
            &suffix[..8]
        )
    }

    /// Provisions an environment for `task`.
    ///
    /// # Errors
    /// Image build and container start failures carry the runtime's diagnostic.
    pub async fn provision(&self, task: &Task) -> Result<Environment, ProvisionError> {
        let work_dir = prepare_work_dir(&self.config.work_dir)?;

        let runtime = match (&self.runtime, self.config.docker_enabled) {
            (Some(runtime), true) => Arc::clone(runtime),
            (None, true) => {
                return Err(ProvisionError::Start {
                    image: self.image_tag(task),
                    diagnostic: "no container runtime configured".to_string(),
                })
            }
            (_, false) => {
                debug!(task_id = %task.id, work_dir = %work_dir.display(), "Using local environment");
                return Ok(Environment::local(work_dir));
            }
        };

        let tag = self.image_tag(task);
        let dockerfile = render_dockerfile(task, &self.config.container_workdir).map_err(|e| {
            ProvisionError::ImageBuild {
                image: tag.clone(),
                diagnostic: format!("Dockerfile template: {e}"),
            }
        })?;

        let image = runtime
            .build(&tag, &dockerfile)
            .await
            .map_err(|e| ProvisionError::ImageBuild {
                image: tag.clone(),
                diagnostic: e.to_string(),
            })?;

        let name = self.container_name(task);
        let spec = RunSpec::new(&name, &self.config.container_workdir)
            .with_bind(&work_dir.to_string_lossy(), &self.config.container_workdir);

        let id = runtime
            .run(&image, &spec)
            .await
            .map_err(|e| ProvisionError::Start {
                image: image.clone(),
                diagnostic: e.to_string(),
            })?;

        info!(task_id = %task.id, container = %name, "Environment provisioned");
        Ok(Environment {
            handle: EnvironmentHandle::Container { id, name, image },
            runtime: Some(runtime),
            active: true,
        })
    }

    /// Tears down an environment produced by [`Provisioner::provision`].
    pub async fn teardown(&self, env: Environment) -> Result<(), DockerError> {
        env.teardown().await
    }
}

/// Creates the work directory if needed and returns its absolute path.
fn prepare_work_dir(path: &Path) -> Result<PathBuf, ProvisionError> {
    let to_err = |source| ProvisionError::WorkDir {
        path: path.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(path).map_err(to_err)?;
    path.canonicalize().map_err(to_err)
}

/// Keeps characters valid in container names.
fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
