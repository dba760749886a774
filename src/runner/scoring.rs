//! Reduces verification outcomes into an evaluation result.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::provisioner::Environment;
use super::result::{EvaluationResult, VerificationOutcome};
use crate::task::Task;

/// Identity and timing of one evaluation run.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub agent_id: String,
    pub model_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: Duration,
}

/// Aggregates ordered outcomes into an [`EvaluationResult`].
///
/// `success` is the AND of every outcome and is false when there are none.
/// `artifacts_produced` is reported as given and never affects the score.
pub fn aggregate(
    task: &Task,
    run: RunInfo,
    outcomes: Vec<VerificationOutcome>,
    artifacts_produced: Vec<String>,
) -> EvaluationResult {
    let total = outcomes.len();
    let passed = outcomes.iter().filter(|o| o.passed).count();
    let success = total > 0 && passed == total;
    let partial_score = if total == 0 {
        0.0
    } else {
        passed as f64 / total as f64
    };

    let errors = outcomes
        .iter()
        .filter(|o| !o.passed)
        .filter_map(|o| o.error.clone())
        .collect();
    let failure_point = outcomes
        .iter()
        .find(|o| !o.passed)
        .map(|o| o.description.clone());

    EvaluationResult {
        task_id: task.id.clone(),
        agent_id: run.agent_id,
        model_name: run.model_name,
        success,
        steps_completed: passed,
        total_steps_attempted: total,
        start_time: run.start_time,
        end_time: run.end_time,
        duration_seconds: run.duration.as_secs_f64(),
        verification_results: outcomes,
        artifacts_produced,
        errors,
        failure_point,
        partial_score,
    }
}

/// Returns the declared success artifacts that exist in `env`, in declared order.
pub async fn detect_artifacts(task: &Task, env: &Environment) -> Vec<String> {
    let mut found = Vec::new();
    for artifact in &task.success_artifacts {
        match env.file_exists(artifact).await {
            Ok(true) => found.push(artifact.clone()),
            Ok(false) => {}
            Err(e) => warn!(artifact = %artifact, error = %e, "Artifact probe failed"),
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Category, Difficulty, VerificationStep};
    use tempfile::TempDir;

    fn run_info() -> RunInfo {
        let now = Utc::now();
        RunInfo {
            agent_id: "agent".into(),
            model_name: "model".into(),
            start_time: now,
            end_time: now,
            duration: Duration::from_millis(10),
        }
    }

    fn outcome(passed: bool, description: &str, error: Option<&str>) -> VerificationOutcome {
        let step = VerificationStep::file_check(description, &["x"]);
        let mut o = if passed {
            VerificationOutcome::pass(&step, "ok")
        } else {
            VerificationOutcome::fail(&step, "no")
        };
        o.error = error.map(str::to_string);
        o
    }

    fn task() -> Task {
        Task::new("t", "T", Category::Configuration, Difficulty::Easy)
    }

    #[test]
    fn test_empty_outcomes_never_succeed() {
        let result = aggregate(&task(), run_info(), Vec::new(), Vec::new());
        assert!(!result.success);
        assert_eq!(result.partial_score, 0.0);
        assert!(result.failure_point.is_none());
    }

    #[test]
    fn test_three_of_four() {
        let outcomes = vec![
            outcome(true, "a", None),
            outcome(true, "b", None),
            outcome(false, "c", Some("probe broke")),
            outcome(true, "d", None),
        ];
        let result = aggregate(&task(), run_info(), outcomes, Vec::new());
        assert!(!result.success);
        assert_eq!(result.partial_score, 0.75);
        assert_eq!(result.steps_completed, 3);
        assert_eq!(result.total_steps_attempted, 4);
        assert_eq!(result.errors, vec!["probe broke"]);
        assert_eq!(result.failure_point.as_deref(), Some("c"));
    }

    #[test]
    fn test_all_pass() {
        let outcomes = vec![outcome(true, "a", None), outcome(true, "b", None)];
        let result = aggregate(&task(), run_info(), outcomes, vec!["out".into()]);
        assert!(result.success);
        assert_eq!(result.partial_score, 1.0);
        assert_eq!(result.artifacts_produced, vec!["out"]);
    }

    #[test]
    fn test_failures_without_error_not_listed() {
        let outcomes = vec![outcome(false, "a", None), outcome(false, "b", Some("e"))];
        let result = aggregate(&task(), run_info(), outcomes, Vec::new());
        assert_eq!(result.errors, vec!["e"]);
        assert_eq!(result.failure_point.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_detect_artifacts_in_declared_order() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("rootfs")).unwrap();
        std::fs::write(dir.path().join("debian.img"), "x").unwrap();
        let task = task()
            .with_artifact("debian.img")
            .with_artifact("missing.iso")
            .with_artifact("rootfs/");
        let env = Environment::local(dir.path());
        assert_eq!(
            detect_artifacts(&task, &env).await,
            vec!["debian.img".to_string(), "rootfs/".to_string()]
        );
    }
}
