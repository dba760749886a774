//! Evaluation orchestrator: provision, verify, score, tear down.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, warn};

use super::config::RunnerConfig;
use super::provisioner::Provisioner;
use super::result::{EvaluationResult, VerificationOutcome};
use super::scoring::{aggregate, detect_artifacts, RunInfo};
use super::verifier::VerificationEngine;
use crate::error::EvaluationError;
use crate::execution::ContainerRuntime;
use crate::task::Task;

/// Runs the declared verification steps of a task against a fresh environment.
pub struct Evaluator {
    provisioner: Provisioner,
    engine: VerificationEngine,
}

impl Evaluator {
    /// Evaluator without a container runtime. Only usable with Docker disabled.
    pub fn local(config: RunnerConfig) -> Self {
        Self {
            engine: VerificationEngine::new(config.clone()),
            provisioner: Provisioner::local(config),
        }
    }

    /// Evaluator provisioning containers through `runtime`.
    pub fn with_runtime(config: RunnerConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            engine: VerificationEngine::new(config.clone()),
            provisioner: Provisioner::with_runtime(config, runtime),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        self.provisioner.config()
    }

    /// Evaluates one task attempt.
    ///
    /// Step failures and probe errors land in the result. Only provisioning
    /// failures abort the run, and they do so before any step executes.
    pub async fn evaluate(
        &self,
        task: &Task,
        agent_id: &str,
        model_name: &str,
    ) -> Result<EvaluationResult, EvaluationError> {
        let start_time = Utc::now();
        let started = Instant::now();

        info!(
            task_id = %task.id,
            agent_id = %agent_id,
            model = %model_name,
            steps = task.verification_steps.len(),
            "Starting evaluation"
        );

        let env = match self.provisioner.provision(task).await {
            Ok(env) => env,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Provisioning failed");
                let run = RunInfo {
                    agent_id: agent_id.to_string(),
                    model_name: model_name.to_string(),
                    start_time,
                    end_time: Utc::now(),
                    duration: started.elapsed(),
                };
                let mut result = aggregate(task, run, Vec::new(), Vec::new());
                result.errors.push(e.to_string());
                self.persist(&result);
                return Err(e.into());
            }
        };
        info!(task_id = %task.id, environment = %env.handle().label(), "Environment ready");

        let mut outcomes: Vec<VerificationOutcome> =
            Vec::with_capacity(task.verification_steps.len());
        for (index, step) in task.verification_steps.iter().enumerate() {
            let outcome = self.engine.run(step, &env).await;
            info!(
                task_id = %task.id,
                step = index + 1,
                kind = %step.kind,
                passed = outcome.passed,
                "{}: {}",
                step.description,
                outcome.details
            );
            outcomes.push(outcome);
        }

        let artifacts = detect_artifacts(task, &env).await;

        if let Err(e) = self.provisioner.teardown(env).await {
            warn!(task_id = %task.id, error = %e, "Environment teardown failed");
        }

        let duration = started.elapsed();
        if duration > task.time_limit() {
            warn!(
                task_id = %task.id,
                elapsed_secs = duration.as_secs(),
                limit_minutes = task.time_limit_minutes,
                "Evaluation exceeded the task time limit"
            );
        }

        let run = RunInfo {
            agent_id: agent_id.to_string(),
            model_name: model_name.to_string(),
            start_time,
            end_time: Utc::now(),
            duration,
        };
        let result = aggregate(task, run, outcomes, artifacts);

        info!(
            task_id = %task.id,
            success = result.success,
            score = result.display_score(self.config().score_precision),
            passed = result.steps_completed,
            total = result.total_steps_attempted,
            "Evaluation completed in {:.1}s",
            result.duration_seconds
        );

        self.persist(&result);
        Ok(result)
    }

    /// Writes the result when saving is enabled. A write failure is logged only.
    fn persist(&self, result: &EvaluationResult) {
        if !self.config().save_results {
            return;
        }
        match result.save(&self.config().results_dir) {
            Ok(path) => info!("Saved evaluation result to {}", path.display()),
            Err(e) => error!(task_id = %result.task_id, error = %e, "Failed to save evaluation result"),
        }
    }
}
