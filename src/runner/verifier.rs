//! Verification engine: executes one verification step against an environment.
//!
//! Every step goes through [`VerificationEngine::run`], which never fails: probe
//! errors and panics are folded into a failed [`VerificationOutcome`] so a broken
//! check cannot abort the rest of an evaluation.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{debug, warn};

use super::config::RunnerConfig;
use super::provisioner::Environment;
use super::result::{truncate_chars, VerificationOutcome};
use crate::error::CommandError;
use crate::execution::command::format_secs;
use crate::task::{Check, VerificationStep, VerificationType};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Characters of a digest shown in mismatch details.
const DIGEST_DISPLAY_CHARS: usize = 16;

/// Runs verification steps.
#[derive(Debug, Clone)]
pub struct VerificationEngine {
    config: RunnerConfig,
}

impl VerificationEngine {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Executes exactly one step and returns its outcome.
    pub async fn run(&self, step: &VerificationStep, env: &Environment) -> VerificationOutcome {
        let start = Instant::now();
        let outcome = match AssertUnwindSafe(self.execute(step, env)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(step = %step.description, error = %e, "Verification probe failed");
                VerificationOutcome::errored(step, e.to_string())
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "check panicked".to_string());
                warn!(step = %step.description, "Verification check panicked: {}", message);
                VerificationOutcome::errored(step, message)
            }
        };
        let outcome = outcome.with_duration(start.elapsed());
        debug!(
            step = %step.description,
            kind = %step.kind,
            passed = outcome.passed,
            details = %outcome.details,
            "Verification step finished"
        );
        outcome
    }

    async fn execute(
        &self,
        step: &VerificationStep,
        env: &Environment,
    ) -> Result<VerificationOutcome, CommandError> {
        if step.kind == VerificationType::BootTest && !self.config.boot_tests_enabled {
            return Ok(VerificationOutcome::pass(
                step,
                "Skipped: boot verification disabled",
            ));
        }

        let check = match step.check() {
            Ok(check) => check,
            Err(e) => return Ok(VerificationOutcome::errored(step, e.to_string())),
        };

        match check {
            Check::FileCheck { files } => file_check(step, env, files).await,
            Check::SizeCheck {
                files,
                min_mb,
                max_mb,
            } => size_check(step, env, files, min_mb, max_mb).await,
            Check::CommandOutput { command, expected } => {
                let timeout = self.config.step_timeout(step.timeout_seconds);
                command_output(step, env, command, expected, timeout).await
            }
            Check::BootTest { command, expected } => {
                let timeout = self.config.step_timeout(step.timeout_seconds);
                boot_test(step, env, command, expected, timeout).await
            }
            Check::Checksum {
                files,
                expected_digest,
            } => checksum(step, env, files, expected_digest).await,
        }
    }
}

/// Formats paths the way the report has always shown them: `['a', 'b']`.
fn quoted_list(paths: &[&str]) -> String {
    let items: Vec<String> = paths.iter().map(|p| format!("'{p}'")).collect();
    format!("[{}]", items.join(", "))
}

async fn file_check(
    step: &VerificationStep,
    env: &Environment,
    files: &[String],
) -> Result<VerificationOutcome, CommandError> {
    let mut missing = Vec::new();
    for path in files {
        if !env.file_exists(path).await? {
            missing.push(path.as_str());
        }
    }

    if missing.is_empty() {
        Ok(VerificationOutcome::pass(
            step,
            format!("All {} files found", files.len()),
        ))
    } else {
        Ok(VerificationOutcome::fail(
            step,
            format!("Missing files: {}", quoted_list(&missing)),
        ))
    }
}

async fn size_check(
    step: &VerificationStep,
    env: &Environment,
    files: &[String],
    min_mb: Option<u64>,
    max_mb: Option<u64>,
) -> Result<VerificationOutcome, CommandError> {
    for path in files {
        let Some(bytes) = env.file_size(path).await? else {
            return Ok(VerificationOutcome::fail(
                step,
                format!("File not found: {path}"),
            ));
        };
        let size_mb = bytes as f64 / BYTES_PER_MB;

        if let Some(min) = min_mb {
            if size_mb < min as f64 {
                return Ok(VerificationOutcome::fail(
                    step,
                    format!("{path}: {size_mb:.1}MB < min {min}MB"),
                ));
            }
        }
        if let Some(max) = max_mb {
            if size_mb > max as f64 {
                return Ok(VerificationOutcome::fail(
                    step,
                    format!("{path}: {size_mb:.1}MB > max {max}MB"),
                ));
            }
        }
    }

    Ok(VerificationOutcome::pass(step, "Size constraints satisfied"))
}

async fn command_output(
    step: &VerificationStep,
    env: &Environment,
    command: &str,
    expected: Option<&str>,
    timeout: Duration,
) -> Result<VerificationOutcome, CommandError> {
    let result = match env.shell(command, timeout).await {
        Ok(result) => result,
        Err(CommandError::Timeout(t)) => {
            return Ok(VerificationOutcome::fail(
                step,
                format!("Command timed out after {}s", format_secs(&t)),
            ))
        }
        Err(e) => return Err(e),
    };
    let output = result.combined();

    let outcome = match expected {
        Some(needle) if output.contains(needle) => {
            VerificationOutcome::pass(step, "Output contains expected string")
        }
        Some(_) => VerificationOutcome::fail(step, "Output missing expected string"),
        None if result.success() => {
            VerificationOutcome::pass(step, format!("Command returned {}", result.exit_code))
        }
        None => VerificationOutcome::fail(step, format!("Command returned {}", result.exit_code)),
    };
    Ok(outcome)
}

async fn boot_test(
    step: &VerificationStep,
    env: &Environment,
    command: &str,
    expected: &str,
    timeout: Duration,
) -> Result<VerificationOutcome, CommandError> {
    let result = match env.shell(command, timeout).await {
        Ok(result) => result,
        Err(CommandError::Timeout(t)) => {
            return Ok(VerificationOutcome::fail(
                step,
                format!("Boot timed out after {}s", format_secs(&t)),
            ))
        }
        Err(e) => return Err(e),
    };

    if result.combined().contains(expected) {
        Ok(VerificationOutcome::pass(
            step,
            format!("Boot successful: found '{expected}'"),
        ))
    } else {
        Ok(VerificationOutcome::fail(
            step,
            "Boot indicator not found in output",
        ))
    }
}

async fn checksum(
    step: &VerificationStep,
    env: &Environment,
    files: &[String],
    expected: Option<&str>,
) -> Result<VerificationOutcome, CommandError> {
    let mut digests = Vec::with_capacity(files.len());
    for path in files {
        let digest = match env.file_digest(path).await {
            Ok(digest) => digest,
            Err(e) => {
                debug!(path = %path, error = %e, "Hashing failed");
                return Ok(VerificationOutcome::fail(
                    step,
                    format!("Failed to hash {path}"),
                ));
            }
        };

        if let Some(expected) = expected {
            if digest != expected {
                return Ok(VerificationOutcome::fail(
                    step,
                    format!(
                        "Checksum mismatch: {}... != {}...",
                        truncate_chars(&digest, DIGEST_DISPLAY_CHARS),
                        truncate_chars(expected, DIGEST_DISPLAY_CHARS)
                    ),
                ));
            }
        }
        digests.push(format!("{path}={digest}"));
    }

    if expected.is_some() {
        Ok(VerificationOutcome::pass(step, "Checksum verified"))
    } else {
        Ok(VerificationOutcome::pass(
            step,
            format!("Checksum verified: {}", digests.join(", ")),
        ))
    }
}
