//! Task and verification-step data model.
//!
//! A [`Task`] is loaded once from a declarative definition and never mutated.
//! The JSON/YAML layout is flat and snake_case; absent optional fields take the
//! defaults documented on each field.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default base image for task environments.
pub const DEFAULT_BASE_IMAGE: &str = "ubuntu:22.04";

/// Default per-step timeout in seconds.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// Kind of Linux-building work a task asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// LFS-style, minimal tooling.
    FromScratch,
    /// Buildroot, Yocto, debootstrap.
    ToolAssisted,
    /// Customize an existing distro.
    Modification,
    /// Fix broken builds or boots.
    Debugging,
    /// Add packages or features.
    Configuration,
}

impl Category {
    /// Returns the serialized name of this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::FromScratch => "from_scratch",
            Category::ToolAssisted => "tool_assisted",
            Category::Modification => "modification",
            Category::Debugging => "debugging",
            Category::Configuration => "configuration",
        }
    }

    /// Heading used by the task summary listing.
    pub fn heading(&self) -> String {
        self.as_str().replace('_', " ").to_uppercase()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Informational difficulty rating. Never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Extreme,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Extreme => "extreme",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a verification step decides pass/fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationType {
    /// Every expected file must exist.
    FileCheck,
    /// Every expected file must fall inside the size bounds.
    SizeCheck,
    /// Command output must contain a substring, or the command must exit 0.
    CommandOutput,
    /// Emulator command output must contain a boot indicator.
    BootTest,
    /// Every expected file must hash to the expected digest.
    Checksum,
}

impl VerificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationType::FileCheck => "file_check",
            VerificationType::SizeCheck => "size_check",
            VerificationType::CommandOutput => "command_output",
            VerificationType::BootTest => "boot_test",
            VerificationType::Checksum => "checksum",
        }
    }
}

impl fmt::Display for VerificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_step_timeout() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

/// A single declarative verification step.
///
/// Only the fields relevant to `kind` are consulted. Use [`VerificationStep::check`]
/// to obtain the typed form the verification engine executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationStep {
    #[serde(rename = "type")]
    pub kind: VerificationType,
    pub description: String,
    #[serde(default)]
    pub command: Option<String>,
    /// Substring to look for; for checksum steps, the expected hex digest.
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub expected_files: Vec<String>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
    #[serde(default)]
    pub min_size_mb: Option<u64>,
    #[serde(default = "default_step_timeout")]
    pub timeout_seconds: u64,
}

impl VerificationStep {
    /// Creates a step of the given kind with every optional field unset.
    pub fn new(kind: VerificationType, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            command: None,
            expected_output: None,
            expected_files: Vec::new(),
            max_size_mb: None,
            min_size_mb: None,
            timeout_seconds: DEFAULT_STEP_TIMEOUT_SECS,
        }
    }

    pub fn file_check(description: impl Into<String>, files: &[&str]) -> Self {
        Self::new(VerificationType::FileCheck, description).with_files(files)
    }

    pub fn size_check(
        description: impl Into<String>,
        files: &[&str],
        min_mb: Option<u64>,
        max_mb: Option<u64>,
    ) -> Self {
        let mut step = Self::new(VerificationType::SizeCheck, description).with_files(files);
        step.min_size_mb = min_mb;
        step.max_size_mb = max_mb;
        step
    }

    pub fn command_output(
        description: impl Into<String>,
        command: impl Into<String>,
        expected: Option<&str>,
    ) -> Self {
        let mut step = Self::new(VerificationType::CommandOutput, description);
        step.command = Some(command.into());
        step.expected_output = expected.map(str::to_string);
        step
    }

    pub fn boot_test(
        description: impl Into<String>,
        command: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        let mut step = Self::new(VerificationType::BootTest, description);
        step.command = Some(command.into());
        step.expected_output = Some(expected.into());
        step
    }

    pub fn checksum(description: impl Into<String>, files: &[&str], digest: Option<&str>) -> Self {
        let mut step = Self::new(VerificationType::Checksum, description).with_files(files);
        step.expected_output = digest.map(str::to_string);
        step
    }

    pub fn with_files(mut self, files: &[&str]) -> Self {
        self.expected_files = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Resolves the step into its typed check, or reports the missing field.
    pub fn check(&self) -> Result<Check<'_>, IncompleteStep> {
        let missing = |field: &'static str| IncompleteStep {
            kind: self.kind,
            field,
        };
        let command = self.command.as_deref().filter(|c| !c.trim().is_empty());
        let expected = self.expected_output.as_deref().filter(|e| !e.is_empty());
        let files = self.expected_files.as_slice();

        match self.kind {
            VerificationType::FileCheck => {
                if files.is_empty() {
                    return Err(missing("expected_files"));
                }
                Ok(Check::FileCheck { files })
            }
            VerificationType::SizeCheck => {
                if files.is_empty() {
                    return Err(missing("expected_files"));
                }
                if self.min_size_mb.is_none() && self.max_size_mb.is_none() {
                    return Err(missing("min_size_mb or max_size_mb"));
                }
                Ok(Check::SizeCheck {
                    files,
                    min_mb: self.min_size_mb,
                    max_mb: self.max_size_mb,
                })
            }
            VerificationType::CommandOutput => Ok(Check::CommandOutput {
                command: command.ok_or_else(|| missing("command"))?,
                expected,
            }),
            VerificationType::BootTest => Ok(Check::BootTest {
                command: command.ok_or_else(|| missing("command"))?,
                expected: expected.ok_or_else(|| missing("expected_output"))?,
            }),
            VerificationType::Checksum => {
                if files.is_empty() {
                    return Err(missing("expected_files"));
                }
                Ok(Check::Checksum {
                    files,
                    expected_digest: expected,
                })
            }
        }
    }

    /// Step timeout before the runner's multiplier is applied.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Typed view of a verification step: one variant per verification kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Check<'a> {
    FileCheck {
        files: &'a [String],
    },
    SizeCheck {
        files: &'a [String],
        min_mb: Option<u64>,
        max_mb: Option<u64>,
    },
    CommandOutput {
        command: &'a str,
        expected: Option<&'a str>,
    },
    BootTest {
        command: &'a str,
        expected: &'a str,
    },
    Checksum {
        files: &'a [String],
        expected_digest: Option<&'a str>,
    },
}

/// A verification step that lacks a field its kind requires.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} step requires {field}")]
pub struct IncompleteStep {
    pub kind: VerificationType,
    pub field: &'static str,
}

fn default_base_image() -> String {
    DEFAULT_BASE_IMAGE.to_string()
}

fn default_disk_gb() -> u32 {
    20
}

fn default_ram_gb() -> u32 {
    4
}

/// What the isolated environment must provide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRequirements {
    #[serde(default = "default_base_image")]
    pub base_image: String,
    #[serde(default)]
    pub required_packages: Vec<String>,
    #[serde(default = "default_disk_gb")]
    pub required_disk_gb: u32,
    #[serde(default = "default_ram_gb")]
    pub required_ram_gb: u32,
}

impl Default for EnvironmentRequirements {
    fn default() -> Self {
        Self {
            base_image: default_base_image(),
            required_packages: Vec::new(),
            required_disk_gb: default_disk_gb(),
            required_ram_gb: default_ram_gb(),
        }
    }
}

fn default_time_limit() -> u32 {
    120
}

fn default_build_minutes() -> u32 {
    30
}

/// A Linux system-building benchmark task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: Category,
    pub difficulty: Difficulty,
    /// Free text shown to the agent. Not parsed.
    pub instructions: String,
    pub expected_steps: u32,
    /// Task ids this task builds on. Documentation only.
    #[serde(default)]
    pub prerequisites: BTreeSet<String>,
    #[serde(flatten)]
    pub environment: EnvironmentRequirements,
    #[serde(default)]
    pub verification_steps: Vec<VerificationStep>,
    #[serde(default)]
    pub success_artifacts: Vec<String>,
    /// Advisory; recorded but not enforced during evaluation.
    #[serde(default = "default_time_limit")]
    pub time_limit_minutes: u32,
    #[serde(default = "default_build_minutes")]
    pub expected_build_minutes: u32,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub reference_docs: Vec<String>,
    #[serde(default)]
    pub common_failure_points: Vec<String>,
}

impl Task {
    /// Creates a task with the required identity fields and defaults elsewhere.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: Category,
        difficulty: Difficulty,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category,
            difficulty,
            instructions: String::new(),
            expected_steps: 0,
            prerequisites: BTreeSet::new(),
            environment: EnvironmentRequirements::default(),
            verification_steps: Vec::new(),
            success_artifacts: Vec::new(),
            time_limit_minutes: default_time_limit(),
            expected_build_minutes: default_build_minutes(),
            tags: BTreeSet::new(),
            reference_docs: Vec::new(),
            common_failure_points: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: VerificationStep) -> Self {
        self.verification_steps.push(step);
        self
    }

    pub fn with_artifact(mut self, path: impl Into<String>) -> Self {
        self.success_artifacts.push(path.into());
        self
    }

    pub fn with_packages(mut self, packages: &[&str]) -> Self {
        self.environment.required_packages = packages.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Serializes the task to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parses a task from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Advisory wall-clock budget for the whole task.
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(u64::from(self.time_limit_minutes) * 60)
    }

    /// Lists structural problems that will make steps fail vacuously.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.id.trim().is_empty() {
            issues.push("task id is empty".to_string());
        }
        if self.verification_steps.is_empty() {
            issues.push(format!("task '{}' has no verification steps", self.id));
        }
        for (idx, step) in self.verification_steps.iter().enumerate() {
            if let Err(e) = step.check() {
                issues.push(format!("step {} ({}): {}", idx + 1, step.description, e));
            }
        }
        issues
    }
}
