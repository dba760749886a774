//! Task evaluation against a provisioned environment.
//!
//! # Architecture
//!
//! ```text
//! Task → Provisioner → Environment → VerificationEngine (per step) → aggregate → EvaluationResult
//! ```
//!
//! The evaluator:
//! 1. Provisions an isolated container (or a local pseudo-environment)
//! 2. Runs every verification step in declared order, never short-circuiting
//! 3. Detects which declared success artifacts exist
//! 4. Tears the environment down exactly once
//! 5. Scores and persists the result
//!
//! # Example
//!
//! ```ignore
//! use distro_bench::runner::{Evaluator, RunnerConfig};
//! use distro_bench::task::TaskRegistry;
//!
//! let registry = TaskRegistry::builtin()?;
//! let task = registry.get("buildroot-001")?;
//! let evaluator = Evaluator::local(RunnerConfig::new("./work").without_docker());
//! let result = evaluator.evaluate(task, "my-agent", "my-model").await?;
//! println!("Score: {:.2}", result.partial_score);
//! ```

pub mod config;
pub mod executor;
pub mod probe;
pub mod provisioner;
pub mod result;
pub mod scoring;
pub mod verifier;

pub use config::RunnerConfig;
pub use executor::Evaluator;
pub use probe::sha256_file;
pub use provisioner::{Environment, EnvironmentHandle, Provisioner};
pub use result::{EvaluationResult, VerificationOutcome};
pub use scoring::{aggregate, detect_artifacts, RunInfo};
pub use verifier::VerificationEngine;
