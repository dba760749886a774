//! Configuration for trace-collection runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::agent::AgentOptions;

const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert Linux systems engineer being evaluated on your ability to build Linux systems.

Your task is to complete the given Linux build challenge. You should:
1. Understand what is being asked
2. Execute the necessary commands to build/configure the system
3. Verify your work actually succeeded (check file existence, run tests, etc.)
4. Report clearly whether you succeeded or failed

Be methodical and verify each step. If something fails, debug and retry.
You have access to Docker for building Linux systems.

IMPORTANT: Actually execute commands and verify results. Don't just describe what you would do.";

/// Configuration for driving an agent and recording its trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub model: String,
    /// Directory trace files are written to.
    pub trace_dir: PathBuf,
    /// Working directory of the agent.
    pub working_dir: PathBuf,
    pub allowed_tools: Vec<String>,
    pub permission_mode: String,
    pub max_turns: u32,
    pub system_prompt: String,
    /// Max characters kept from each tool output.
    pub tool_output_limit: usize,
    /// Max characters kept from the final assistant text.
    pub final_output_limit: usize,
    /// Hard limit on the whole run. `None` means unbounded.
    pub run_timeout_secs: Option<u64>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            trace_dir: PathBuf::from("traces"),
            working_dir: PathBuf::from("."),
            allowed_tools: ["Bash", "Read", "Write", "Edit", "Glob", "Grep"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            permission_mode: "acceptEdits".to_string(),
            max_turns: 50,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            tool_output_limit: 5000,
            final_output_limit: 2000,
            run_timeout_secs: None,
        }
    }
}

impl CollectorConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_trace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trace_dir = dir.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_run_timeout(mut self, seconds: u64) -> Self {
        self.run_timeout_secs = Some(seconds);
        self
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Options handed to the agent runtime.
    pub fn agent_options(&self) -> AgentOptions {
        AgentOptions {
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            allowed_tools: self.allowed_tools.clone(),
            permission_mode: self.permission_mode.clone(),
            cwd: self.working_dir.clone(),
            max_turns: self.max_turns,
        }
    }

    pub fn trace_dir(&self) -> &Path {
        &self.trace_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CollectorConfig::default();
        assert_eq!(config.allowed_tools.len(), 6);
        assert_eq!(config.permission_mode, "acceptEdits");
        assert_eq!(config.max_turns, 50);
        assert_eq!(config.tool_output_limit, 5000);
        assert!(config.run_timeout().is_none());
        assert!(config.system_prompt.starts_with("You are an expert Linux systems engineer"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: CollectorConfig =
            serde_yaml::from_str("model: claude-opus-4\nrun_timeout_secs: 600\n").unwrap();
        assert_eq!(config.model, "claude-opus-4");
        assert_eq!(config.run_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.final_output_limit, 2000);
    }

    #[test]
    fn test_agent_options_follow_config() {
        let config = CollectorConfig::default()
            .with_model("m")
            .with_working_dir("/tmp/build");
        let options = config.agent_options();
        assert_eq!(options.model, "m");
        assert_eq!(options.cwd, PathBuf::from("/tmp/build"));
        assert_eq!(options.max_turns, 50);
    }
}
