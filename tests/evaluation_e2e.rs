//! End-to-end evaluation runs, locally and through a container runtime.

mod common;

use std::sync::Arc;

use common::LoopbackRuntime;
use distro_bench::runner::{EvaluationResult, Evaluator, RunnerConfig};
use distro_bench::task::{Category, Difficulty, Task, TaskRegistry, VerificationStep};
use distro_bench::EvaluationError;
use tempfile::TempDir;

fn kernel_task() -> Task {
    Task::new("kernel-e2e", "Kernel build", Category::ToolAssisted, Difficulty::Medium)
        .with_packages(&["build-essential", "bc"])
        .with_step(VerificationStep::file_check("Kernel image exists", &["out/bzImage"]))
        .with_step(VerificationStep::size_check(
            "Kernel image size is plausible",
            &["out/bzImage"],
            Some(1),
            Some(50),
        ))
        .with_artifact("out/bzImage")
}

fn write_kernel(dir: &TempDir, megabytes: usize) {
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("bzImage"), vec![0u8; megabytes * 1024 * 1024]).unwrap();
}

fn local_config(work: &TempDir, results: &TempDir) -> RunnerConfig {
    RunnerConfig::new(work.path())
        .without_docker()
        .with_results_dir(results.path())
}

#[tokio::test]
async fn test_kernel_present_scores_full() {
    let work = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    write_kernel(&work, 8);

    let result = Evaluator::local(local_config(&work, &results))
        .evaluate(&kernel_task(), "agent-1", "model-x")
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.partial_score, 1.0);
    assert_eq!(result.steps_completed, 2);
    assert_eq!(result.artifacts_produced, vec!["out/bzImage"]);
    assert!(result.errors.is_empty());
    assert!(result.failure_point.is_none());
}

#[tokio::test]
async fn test_kernel_missing_fails_both_steps() {
    let work = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();

    let result = Evaluator::local(local_config(&work, &results))
        .evaluate(&kernel_task(), "agent-1", "model-x")
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.partial_score, 0.0);
    assert_eq!(
        result.verification_results[0].details,
        "Missing files: ['out/bzImage']"
    );
    assert!(!result.verification_results[1].passed);
    assert_eq!(
        result.verification_results[1].details,
        "File not found: out/bzImage"
    );
    assert!(result.artifacts_produced.is_empty());
}

#[tokio::test]
async fn test_empty_task_never_succeeds() {
    let work = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    let task = Task::new("empty", "Empty", Category::Configuration, Difficulty::Easy);

    let result = Evaluator::local(local_config(&work, &results))
        .evaluate(&task, "a", "m")
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.partial_score, 0.0);
    assert_eq!(result.total_steps_attempted, 0);
}

#[tokio::test]
async fn test_failing_step_does_not_stop_later_steps() {
    let work = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    write_kernel(&work, 2);
    let task = Task::new("order", "Order", Category::Debugging, Difficulty::Hard)
        .with_step(VerificationStep::file_check("Config exists", &[".config"]))
        .with_step(VerificationStep::command_output(
            "Kernel is readable",
            "test -r out/bzImage",
            None,
        ))
        .with_step(VerificationStep::command_output(
            "Broken probe",
            "exit 3",
            None,
        ))
        .with_step(VerificationStep::file_check("Kernel exists", &["out/bzImage"]));

    let result = Evaluator::local(local_config(&work, &results))
        .evaluate(&task, "a", "m")
        .await
        .unwrap();

    let passed: Vec<bool> = result.verification_results.iter().map(|o| o.passed).collect();
    assert_eq!(passed, vec![false, true, false, true]);
    assert_eq!(result.partial_score, 0.5);
    assert_eq!(result.failure_point.as_deref(), Some("Config exists"));
}

#[tokio::test]
async fn test_result_file_round_trips() {
    let work = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    write_kernel(&work, 8);

    let result = Evaluator::local(local_config(&work, &results))
        .evaluate(&kernel_task(), "agent-1", "model-x")
        .await
        .unwrap();

    let files: Vec<_> = std::fs::read_dir(results.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    let loaded = EvaluationResult::load(&files[0]).unwrap();
    assert_eq!(loaded.task_id, result.task_id);
    assert_eq!(loaded.verification_results.len(), 2);
    assert_eq!(loaded.verification_results[0].details, result.verification_results[0].details);
    assert_eq!(loaded.partial_score, result.partial_score);
    assert_eq!(loaded.start_time, result.start_time);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&files[0]).unwrap()).unwrap();
    assert_eq!(json["task_id"], "kernel-e2e");
    assert_eq!(json["verification_results"][0]["type"], "file_check");
}

#[tokio::test]
async fn test_container_run_tears_down_once() {
    let work = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    write_kernel(&work, 8);
    let runtime = Arc::new(LoopbackRuntime::new());
    let config = RunnerConfig::new(work.path())
        .with_results_dir(results.path())
        .with_boot_tests(false);

    let task = kernel_task()
        .with_step(VerificationStep::command_output(
            "Shell works in the environment",
            "echo ready",
            Some("ready"),
        ))
        .with_step(VerificationStep::boot_test(
            "Boots",
            "qemu-system-x86_64 -kernel out/bzImage",
            "login:",
        ))
        .with_step(VerificationStep::checksum("Kernel digest", &["out/bzImage"], None));

    let result = Evaluator::with_runtime(config, runtime.clone())
        .evaluate(&task, "a", "m")
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.verification_results);
    assert_eq!(
        result.verification_results[3].details,
        "Skipped: boot verification disabled"
    );
    assert_eq!(runtime.started(), 1);
    assert_eq!(runtime.removed(), 1);

    let dockerfiles = runtime.dockerfiles();
    assert_eq!(dockerfiles.len(), 1);
    assert!(dockerfiles[0].contains("apt-get install -y build-essential bc"));
}

#[tokio::test]
async fn test_container_failures_still_tear_down() {
    let work = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    let runtime = Arc::new(LoopbackRuntime::new());
    let config = RunnerConfig::new(work.path()).with_results_dir(results.path());

    let result = Evaluator::with_runtime(config, runtime.clone())
        .evaluate(&kernel_task(), "a", "m")
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(runtime.removed(), 1);
}

#[tokio::test]
async fn test_build_failure_aborts_before_verification() {
    let work = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    let runtime = Arc::new(LoopbackRuntime::failing_build(
        "E: Unable to locate package qemu-sytem",
    ));
    let config = RunnerConfig::new(work.path()).with_results_dir(results.path());

    let err = Evaluator::with_runtime(config, runtime.clone())
        .evaluate(&kernel_task(), "a", "m")
        .await
        .unwrap_err();

    let EvaluationError::Provision(inner) = err;
    assert!(inner.to_string().contains("Unable to locate package qemu-sytem"));
    assert_eq!(runtime.started(), 0);
    assert_eq!(runtime.removed(), 0);

    let files: Vec<_> = std::fs::read_dir(results.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    let saved = EvaluationResult::load(&files[0]).unwrap();
    assert!(!saved.success);
    assert_eq!(saved.partial_score, 0.0);
    assert!(saved.verification_results.is_empty());
    assert_eq!(saved.errors.len(), 1);
    assert!(saved.errors[0].contains("Unable to locate package qemu-sytem"));
}

#[tokio::test]
async fn test_build_failure_without_saving_writes_nothing() {
    let work = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    let runtime = Arc::new(LoopbackRuntime::failing_build("E: broken mirror"));
    let config = RunnerConfig::new(work.path())
        .with_results_dir(results.path())
        .with_save_results(false);

    let outcome = Evaluator::with_runtime(config, runtime)
        .evaluate(&kernel_task(), "a", "m")
        .await;

    assert!(outcome.is_err());
    assert_eq!(std::fs::read_dir(results.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_container_timeouts_report_scaled_budget() {
    let work = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    let runtime = Arc::new(LoopbackRuntime::new());
    let config = RunnerConfig::new(work.path())
        .with_results_dir(results.path())
        .with_save_results(false)
        .with_timeout_multiplier(1.5);

    let task = Task::new("hang", "Hanging boot", Category::Debugging, Difficulty::Hard)
        .with_step(VerificationStep::boot_test("Boots", "sleep 30", "login:").with_timeout(1))
        .with_step(VerificationStep::command_output("Slow command", "sleep 30", None).with_timeout(1));

    let start = std::time::Instant::now();
    let result = Evaluator::with_runtime(config, runtime.clone())
        .evaluate(&task, "a", "m")
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(
        result.verification_results[0].details,
        "Boot timed out after 1.5s"
    );
    assert_eq!(
        result.verification_results[1].details,
        "Command timed out after 1.5s"
    );
    assert!(result.verification_results.iter().all(|o| o.error.is_none()));
    assert!(start.elapsed() < std::time::Duration::from_secs(20));
    assert_eq!(runtime.removed(), 1);
}

#[tokio::test]
async fn test_builtin_task_evaluates_against_empty_workspace() {
    let work = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    let registry = TaskRegistry::builtin().unwrap();
    let task = registry.get("buildroot-001").unwrap();

    let config = local_config(&work, &results)
        .with_boot_tests(false)
        .with_save_results(false);
    let result = Evaluator::local(config)
        .evaluate(task, "a", "m")
        .await
        .unwrap();

    assert_eq!(result.total_steps_attempted, task.verification_steps.len());
    assert!(result.partial_score < 1.0);
    assert!((0.0..=1.0).contains(&result.partial_score));
}
