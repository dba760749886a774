//! CLI command definitions for distro-bench.
//!
//! Every command is a caller of the library: the registry for `list`, `show`,
//! `export` and `env`, the evaluator for `evaluate`, and the trace collector
//! for `collect`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::config::Settings;
use crate::execution::dockerfile::{local_install_command, render_docker_run};
use crate::execution::DockerClient;
use crate::runner::{EvaluationResult, Evaluator, RunnerConfig};
use crate::task::{Task, TaskRegistry};
use crate::trajectory::{ClaudeCliRuntime, TraceCollector};

const RULE_WIDTH: usize = 60;

/// Evaluation engine for Linux system-building agent tasks.
#[derive(Parser)]
#[command(name = "distro-bench")]
#[command(about = "Evaluate agents on Linux distribution building tasks")]
#[command(version)]
#[command(
    long_about = "distro-bench ships a registry of Linux system-building tasks (Buildroot, debootstrap, kernel debugging), verifies an agent's build output against each task's declared checks, and records agent traces.\n\nExample usage:\n  distro-bench list\n  distro-bench evaluate buildroot-001 --local --work-dir ./build"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Load tasks from a YAML/JSON file or directory instead of the built-in set.
    #[arg(long, global = true, env = "DISTRO_BENCH_TASKS")]
    pub tasks: Option<PathBuf>,

    /// YAML settings file with `runner` and `collector` sections.
    #[arg(long, global = true, env = "DISTRO_BENCH_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// List all available tasks, grouped by category.
    #[command(alias = "ls")]
    List {
        /// Print `[{id, name, difficulty}]` as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show one task's full definition.
    Show {
        task_id: String,

        /// Print the task as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Export the task registry as a JSON array.
    Export {
        /// Output file path.
        output: PathBuf,
    },

    /// Run a task's verification steps against an attempted build.
    #[command(alias = "eval")]
    Evaluate(EvaluateArgs),

    /// Print environment setup commands for a task.
    Env { task_id: String },

    /// Run an agent on a task and record its trace.
    Collect(CollectArgs),
}

#[derive(clap::Args)]
pub struct EvaluateArgs {
    pub task_id: String,

    /// Agent identifier recorded in the result.
    #[arg(long, default_value = "manual")]
    pub agent: String,

    /// Model name recorded in the result.
    #[arg(long, default_value = "unknown")]
    pub model: String,

    /// Verify against the local filesystem instead of a container.
    #[arg(long)]
    pub local: bool,

    /// Skip emulator boot tests.
    #[arg(long)]
    pub no_boot: bool,

    /// Directory holding the build output.
    #[arg(short = 'w', long)]
    pub work_dir: Option<PathBuf>,

    /// Directory evaluation results are written to.
    #[arg(short = 'o', long)]
    pub results_dir: Option<PathBuf>,

    /// Scale factor applied to every step timeout.
    #[arg(long)]
    pub timeout_multiplier: Option<f64>,

    /// Do not persist the result.
    #[arg(long)]
    pub no_save: bool,

    /// Also print the result as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct CollectArgs {
    pub task_id: String,

    /// Model id passed to the agent.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Directory trace files are written to.
    #[arg(long)]
    pub trace_dir: Option<PathBuf>,

    /// Working directory of the agent.
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Path to the `claude` executable.
    #[arg(long, env = "CLAUDE_CLI_PATH", default_value = "claude")]
    pub claude_path: String,

    /// Hard limit on the whole run, in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Parse CLI arguments without executing any command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let registry = load_registry(cli.tasks.as_ref())?;
    let settings = Settings::load_optional(cli.config.as_deref())?;

    match cli.command {
        Commands::List { json } => run_list_command(&registry, json),
        Commands::Show { task_id, json } => run_show_command(&registry, &task_id, json),
        Commands::Export { output } => {
            registry
                .export_json(&output)
                .with_context(|| format!("Failed to export tasks to {}", output.display()))?;
            println!("Exported {} tasks to {}", registry.len(), output.display());
            Ok(())
        }
        Commands::Evaluate(args) => {
            let task = find_task(&registry, &args.task_id)?;
            run_evaluate_command(task, settings.runner, args).await
        }
        Commands::Env { task_id } => {
            let task = find_task(&registry, &task_id)?;
            run_env_command(task, &settings.runner)
        }
        Commands::Collect(args) => {
            let task = find_task(&registry, &args.task_id)?;
            run_collect_command(task, settings, args).await
        }
    }
}

fn load_registry(path: Option<&PathBuf>) -> anyhow::Result<TaskRegistry> {
    let registry = match path {
        Some(path) => TaskRegistry::load_path(path)
            .with_context(|| format!("Failed to load tasks from {}", path.display()))?,
        None => TaskRegistry::builtin().context("Failed to load built-in tasks")?,
    };
    info!(tasks = registry.len(), "Task registry loaded");
    Ok(registry)
}

/// Looks up a task, printing the available ids when it is missing.
fn find_task<'a>(registry: &'a TaskRegistry, task_id: &str) -> anyhow::Result<&'a Task> {
    match registry.get(task_id) {
        Ok(task) => Ok(task),
        Err(e) => {
            println!("Task not found: {task_id}");
            println!("\nAvailable tasks:");
            for id in registry.ids() {
                println!("  - {id}");
            }
            Err(e.into())
        }
    }
}

fn banner(title: &str) {
    println!("\n{}", "=".repeat(RULE_WIDTH));
    println!("{title}");
    println!("{}", "=".repeat(RULE_WIDTH));
}

#[derive(Serialize)]
struct TaskListEntry<'a> {
    id: &'a str,
    name: &'a str,
    difficulty: &'a str,
}

fn run_list_command(registry: &TaskRegistry, json: bool) -> anyhow::Result<()> {
    if json {
        let entries: Vec<TaskListEntry> = registry
            .tasks()
            .iter()
            .map(|t| TaskListEntry {
                id: &t.id,
                name: &t.name,
                difficulty: t.difficulty.as_str(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    banner("Linux Distro Building Benchmark Tasks");
    for (category, tasks) in registry.by_category() {
        println!("\n## {}", category.heading());
        println!("{}", "-".repeat(40));
        for task in tasks {
            println!("\n  [{}] {}", task.id, task.name);
            println!("    Difficulty: {}", task.difficulty);
            println!("    Expected steps: {}", task.expected_steps);
            println!("    Time limit: {} min", task.time_limit_minutes);
        }
    }
    println!("\n{}", "=".repeat(RULE_WIDTH));
    Ok(())
}

fn run_show_command(registry: &TaskRegistry, task_id: &str, json: bool) -> anyhow::Result<()> {
    let task = find_task(registry, task_id)?;
    if json {
        println!("{}", task.to_json()?);
        return Ok(());
    }

    banner(&format!("Task: {}", task.name));
    println!("\nID: {}", task.id);
    println!("Category: {}", task.category);
    println!("Difficulty: {}", task.difficulty);
    println!("\nDescription:\n{}", task.description);
    println!("\nInstructions:\n{}", task.instructions);
    println!("\nExpected Steps: {}", task.expected_steps);
    println!("Time Limit: {} minutes", task.time_limit_minutes);
    println!("Expected Build Time: {} minutes", task.expected_build_minutes);

    let env = &task.environment;
    println!("\nBase Image: {}", env.base_image);
    println!("Required Packages: {}", env.required_packages.join(", "));
    println!("Required Disk: {} GB", env.required_disk_gb);
    println!("Required RAM: {} GB", env.required_ram_gb);

    if !task.prerequisites.is_empty() {
        let prereqs: Vec<&str> = task.prerequisites.iter().map(String::as_str).collect();
        println!("Prerequisites: {}", prereqs.join(", "));
    }

    println!("\nVerification Steps ({}):", task.verification_steps.len());
    for (i, step) in task.verification_steps.iter().enumerate() {
        println!("  {}. [{}] {}", i + 1, step.kind, step.description);
    }

    println!("\nSuccess Artifacts:");
    for artifact in &task.success_artifacts {
        println!("  - {artifact}");
    }

    if !task.common_failure_points.is_empty() {
        println!("\nCommon Failure Points:");
        for point in &task.common_failure_points {
            println!("  - {point}");
        }
    }

    if !task.reference_docs.is_empty() {
        println!("\nReference Docs:");
        for doc in &task.reference_docs {
            println!("  - {doc}");
        }
    }
    println!();
    Ok(())
}

/// Applies command-line overrides on top of the settings file.
fn evaluate_config(mut config: RunnerConfig, args: &EvaluateArgs) -> RunnerConfig {
    if args.local {
        config.docker_enabled = false;
    }
    if args.no_boot {
        config.boot_tests_enabled = false;
    }
    if let Some(dir) = &args.work_dir {
        config.work_dir = dir.clone();
    }
    if let Some(dir) = &args.results_dir {
        config.results_dir = dir.clone();
    }
    if let Some(multiplier) = args.timeout_multiplier {
        config.timeout_multiplier = multiplier;
    }
    if args.no_save {
        config.save_results = false;
    }
    config
}

async fn run_evaluate_command(
    task: &Task,
    config: RunnerConfig,
    args: EvaluateArgs,
) -> anyhow::Result<()> {
    let config = evaluate_config(config, &args);
    let precision = config.score_precision;

    banner(&format!("Evaluating: {}", task.name));

    let evaluator = if config.docker_enabled {
        let client = DockerClient::new()?;
        client
            .ping()
            .await
            .context("Docker is not reachable; rerun with --local to verify on this host")?;
        Evaluator::with_runtime(config, Arc::new(client))
    } else {
        Evaluator::local(config)
    };

    let result = evaluator
        .evaluate(task, &args.agent, &args.model)
        .await
        .with_context(|| format!("Evaluation of {} aborted", task.id))?;

    print_evaluation(&result, precision);

    if args.json {
        println!("\n{}", "=".repeat(RULE_WIDTH));
        println!("JSON Output:");
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(())
}

fn print_evaluation(result: &EvaluationResult, precision: u32) {
    banner("RESULTS");
    println!();
    println!("Success: {}", if result.success { "YES" } else { "NO" });
    println!(
        "Partial Score: {} ({}/{})",
        result.display_score(precision),
        result.steps_completed,
        result.total_steps_attempted
    );
    println!("Duration: {:.1}s", result.duration_seconds);

    println!("\nVerification Results:");
    for outcome in &result.verification_results {
        let status = if outcome.passed { "PASS" } else { "FAIL" };
        println!("  [{status}] {}", outcome.description);
        if !outcome.details.is_empty() {
            println!("         {}", outcome.details);
        }
    }

    if let Some(point) = &result.failure_point {
        println!("\nFirst Failure: {point}");
    }

    if !result.errors.is_empty() {
        println!("\nErrors:");
        for error in &result.errors {
            println!("  - {error}");
        }
    }

    println!("\nArtifacts Produced:");
    for artifact in &result.artifacts_produced {
        println!("  - {artifact}");
    }
}

fn run_env_command(task: &Task, config: &RunnerConfig) -> anyhow::Result<()> {
    banner(&format!("Environment Setup: {}", task.name));
    println!("\n# Docker setup command:\n");
    println!(
        "{}",
        render_docker_run(task, &config.container_workdir, &config.image_prefix)?
    );
    println!("\n# Or install packages locally:");
    println!("{}", local_install_command(task));
    println!();
    Ok(())
}

async fn run_collect_command(
    task: &Task,
    settings: Settings,
    args: CollectArgs,
) -> anyhow::Result<()> {
    let mut config = settings.collector;
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(dir) = args.trace_dir {
        config.trace_dir = dir;
    }
    if let Some(dir) = args.working_dir {
        config.working_dir = dir;
    }
    if let Some(secs) = args.timeout {
        config.run_timeout_secs = Some(secs);
    }

    banner(&format!("Running task: {}", task.id));

    let collector = TraceCollector::new(config, Arc::new(ClaudeCliRuntime::new(args.claude_path)));
    let trace = collector
        .collect(task)
        .await
        .context("Failed to persist agent trace")?;

    banner(&format!(
        "Task completed: {}",
        if trace.success { "SUCCESS" } else { "FAILED" }
    ));
    println!("Trace ID: {}", trace.trace_id);
    println!("Duration: {}s", trace.total_duration_seconds);
    println!("Tool calls: {}", trace.total_tool_calls);
    println!("Tokens: {} in / {} out", trace.total_tokens_in, trace.total_tokens_out);
    for error in &trace.errors {
        println!("Error [{}]: {}", error.kind, error.message);
    }
    println!("Trace saved: {}", collector.trace_path(&trace).display());
    Ok(())
}
