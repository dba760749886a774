//! Configuration for evaluation runs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for evaluating a task's verification steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Whether to provision an isolated container environment.
    pub docker_enabled: bool,
    /// Whether BOOT_TEST steps launch the emulator or are skipped.
    pub boot_tests_enabled: bool,
    /// Host directory holding the agent's build output.
    pub work_dir: PathBuf,
    /// Mount point of `work_dir` inside the environment.
    pub container_workdir: String,
    /// Scale factor applied to every step timeout.
    pub timeout_multiplier: f64,
    /// Directory evaluation results are written to.
    pub results_dir: PathBuf,
    /// Whether to persist each evaluation result.
    pub save_results: bool,
    /// Decimal places used when displaying the partial score.
    pub score_precision: u32,
    /// Prefix for environment image tags and container names.
    pub image_prefix: String,
}

impl RunnerConfig {
    /// Creates a configuration with defaults rooted at `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Self::default()
        }
    }

    /// Disables Docker isolation (verify against the local filesystem).
    pub fn without_docker(mut self) -> Self {
        self.docker_enabled = false;
        self
    }

    /// Enables or disables boot tests.
    pub fn with_boot_tests(mut self, enabled: bool) -> Self {
        self.boot_tests_enabled = enabled;
        self
    }

    /// Sets the timeout multiplier.
    pub fn with_timeout_multiplier(mut self, multiplier: f64) -> Self {
        self.timeout_multiplier = multiplier;
        self
    }

    /// Sets the results directory.
    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    /// Enables or disables result persistence.
    pub fn with_save_results(mut self, save: bool) -> Self {
        self.save_results = save;
        self
    }

    /// Sets the image/container name prefix.
    pub fn with_image_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.image_prefix = prefix.into();
        self
    }

    /// Effective timeout for a step declared with `seconds`.
    pub fn step_timeout(&self, seconds: u64) -> Duration {
        let multiplier = if self.timeout_multiplier.is_finite() && self.timeout_multiplier > 0.0 {
            self.timeout_multiplier
        } else {
            1.0
        };
        Duration::from_secs_f64(seconds as f64 * multiplier)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            docker_enabled: true,
            boot_tests_enabled: true,
            work_dir: PathBuf::from("."),
            container_workdir: "/workspace".to_string(),
            timeout_multiplier: 1.0,
            results_dir: PathBuf::from("./results"),
            save_results: true,
            score_precision: 4,
            image_prefix: "distro-bench".to_string(),
        }
    }
}
