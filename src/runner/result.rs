//! Verification outcomes and evaluation results.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::StorageError;
use crate::task::{VerificationStep, VerificationType};

/// Outcome of a single verification step. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    #[serde(rename = "type")]
    pub kind: VerificationType,
    pub description: String,
    pub passed: bool,
    /// Human-readable reason for the verdict.
    pub details: String,
    /// Set when the probe itself could not run.
    pub error: Option<String>,
    pub duration_seconds: f64,
}

impl VerificationOutcome {
    /// A passing outcome for `step`.
    pub fn pass(step: &VerificationStep, details: impl Into<String>) -> Self {
        Self {
            kind: step.kind,
            description: step.description.clone(),
            passed: true,
            details: details.into(),
            error: None,
            duration_seconds: 0.0,
        }
    }

    /// A failing outcome for `step` with a verdict but no execution error.
    pub fn fail(step: &VerificationStep, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            ..Self::pass(step, details)
        }
    }

    /// A failing outcome for a step whose probe could not execute.
    pub fn errored(step: &VerificationStep, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            passed: false,
            details: format!("Check error: {error}"),
            error: Some(error),
            ..Self::pass(step, String::new())
        }
    }

    /// Stamps the wall-clock duration of the check.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_seconds = duration.as_secs_f64();
        self
    }
}

/// Result of evaluating one task attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub task_id: String,
    pub agent_id: String,
    pub model_name: String,
    /// AND of every outcome; false when there are no outcomes.
    pub success: bool,
    pub steps_completed: usize,
    pub total_steps_attempted: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub verification_results: Vec<VerificationOutcome>,
    /// Declared success artifacts found to exist.
    pub artifacts_produced: Vec<String>,
    pub errors: Vec<String>,
    /// Description of the first failing step.
    pub failure_point: Option<String>,
    /// Passed count over total count, full precision.
    pub partial_score: f64,
}

impl EvaluationResult {
    /// Partial score rounded to `precision` decimal places for display.
    pub fn display_score(&self, precision: u32) -> f64 {
        let factor = 10f64.powi(precision.min(15) as i32);
        (self.partial_score * factor).round() / factor
    }

    /// File name this result is persisted under.
    pub fn file_name(&self) -> String {
        let short = Uuid::new_v4().simple().to_string();
        format!(
            "eval-{}-{}-{}.json",
            self.task_id,
            self.start_time.format("%Y%m%d-%H%M%S"),
            &short[..8]
        )
    }

    /// Writes the result as pretty JSON under `dir` and returns the path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, StorageError> {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| StorageError::DirectoryCreationFailed {
                path: dir.to_path_buf(),
                message: e.to_string(),
            })?;
        }
        let path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        debug!("Saved evaluation result to {}", path.display());
        Ok(path)
    }

    /// Reads a persisted result.
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        if !path.exists() {
            return Err(StorageError::NotFound(path.display().to_string()));
        }
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Truncates to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(partial: f64) -> EvaluationResult {
        let now = Utc::now();
        EvaluationResult {
            task_id: "buildroot-001".to_string(),
            agent_id: "agent".to_string(),
            model_name: "model".to_string(),
            success: false,
            steps_completed: 2,
            total_steps_attempted: 3,
            start_time: now,
            end_time: now,
            duration_seconds: 0.5,
            verification_results: Vec::new(),
            artifacts_produced: Vec::new(),
            errors: Vec::new(),
            failure_point: Some("Boots".to_string()),
            partial_score: partial,
        }
    }

    #[test]
    fn test_outcome_builders() {
        let step = VerificationStep::file_check("Kernel exists", &["bzImage"]);
        let ok = VerificationOutcome::pass(&step, "All 1 files found")
            .with_duration(Duration::from_millis(250));
        assert!(ok.passed);
        assert_eq!(ok.kind, VerificationType::FileCheck);
        assert!((ok.duration_seconds - 0.25).abs() < 1e-9);

        let err = VerificationOutcome::errored(&step, "docker exec failed");
        assert!(!err.passed);
        assert_eq!(err.error.as_deref(), Some("docker exec failed"));

        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["type"], "file_check");
    }

    #[test]
    fn test_display_score_rounds_only_for_display() {
        let result = sample(2.0 / 3.0);
        assert_eq!(result.display_score(4), 0.6667);
        assert_eq!(result.display_score(0), 1.0);
        assert!((result.partial_score - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let result = sample(0.5);
        let path = result.save(&dir.path().join("results")).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("eval-buildroot-001-"));
        assert!(name.ends_with(".json"));
        assert_eq!(EvaluationResult::load(&path).unwrap(), result);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
