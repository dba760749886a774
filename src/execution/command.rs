//! Shell command execution with hard timeouts.
//!
//! Local commands run in their own process group so a timeout kills the whole
//! tree (an emulator launched through a pipeline, for instance). Commands inside
//! an environment are wrapped in coreutils `timeout` and additionally bounded
//! on the client side.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, warn};

use super::runtime::{ContainerRuntime, ExecResult};
use crate::error::CommandError;

/// Exit status coreutils `timeout` reports when it had to stop the command.
const TIMEOUT_EXIT_CODE: i64 = 124;

/// Grace period between SIGTERM and SIGKILL inside the environment.
const KILL_GRACE_SECS: u64 = 5;

/// Runs `command` through `sh -c` in `cwd`, killing its process group on timeout.
pub async fn run_local(
    command: &str,
    cwd: &Path,
    timeout: Duration,
) -> Result<ExecResult, CommandError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd
        .spawn()
        .map_err(|e| CommandError::Spawn(format!("sh -c {command:?}: {e}")))?;
    let pid = child.id();

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            Ok(ExecResult {
                exit_code: output.status.code().map(i64::from).unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
        Err(_) => {
            if let Some(pid) = pid {
                kill_process_group(pid);
            }
            warn!(timeout_secs = timeout.as_secs(), "Local command timed out");
            Err(CommandError::Timeout(timeout))
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    // The child was made leader of its own group, so -pgid addresses every
    // process it started.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, "Process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Seconds with millisecond precision and no trailing zeros: `300`, `1.5`, `0.25`.
pub fn format_secs(duration: &Duration) -> String {
    let millis = duration.as_millis();
    let (whole, frac) = (millis / 1000, millis % 1000);
    if frac == 0 {
        whole.to_string()
    } else {
        format!("{whole}.{frac:03}").trim_end_matches('0').to_string()
    }
}

/// Budget handed to coreutils `timeout`, at millisecond resolution and never zero
/// (`timeout 0` disables the limit).
fn container_budget(timeout: Duration) -> Duration {
    Duration::from_millis(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1))
}

/// Wraps a shell command so the environment itself enforces the timeout.
pub fn timeout_argv(command: &str, timeout: Duration) -> Vec<String> {
    vec![
        "timeout".to_string(),
        "-k".to_string(),
        KILL_GRACE_SECS.to_string(),
        format_secs(&container_budget(timeout)),
        "bash".to_string(),
        "-c".to_string(),
        command.to_string(),
    ]
}

/// Runs `command` inside a container, bounded both in and out of the container.
pub async fn run_in_container(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    command: &str,
    timeout: Duration,
) -> Result<ExecResult, CommandError> {
    let budget = container_budget(timeout);
    let argv = timeout_argv(command, budget);
    let outer = budget + Duration::from_secs(KILL_GRACE_SECS * 2);
    let start = Instant::now();

    let result = match tokio::time::timeout(outer, runtime.exec(container_id, &argv)).await {
        Ok(result) => result?,
        Err(_) => return Err(CommandError::Timeout(timeout)),
    };

    // A command may itself exit 124 (an inner `timeout`); only count it when the
    // full budget passed to `timeout` was used.
    if result.exit_code == TIMEOUT_EXIT_CODE && start.elapsed() >= budget {
        return Err(CommandError::Timeout(timeout));
    }
    Ok(result)
}

/// Runs a fixed argv inside a container with no shell and no timeout wrapper.
pub async fn exec_probe(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    argv: &[&str],
) -> Result<ExecResult, CommandError> {
    let argv: Vec<String> = argv.iter().map(|a| a.to_string()).collect();
    Ok(runtime.exec(container_id, &argv).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_local_captures_output() {
        let dir = TempDir::new().unwrap();
        let result = run_local("echo out; echo err >&2; exit 3", dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_run_local_uses_cwd() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker"), "x").unwrap();
        let result = run_local("ls", dir.path(), Duration::from_secs(5)).await.unwrap();
        assert!(result.stdout.contains("marker"));
    }

    #[tokio::test]
    async fn test_run_local_times_out_and_kills_tree() {
        let dir = TempDir::new().unwrap();
        let start = Instant::now();
        let err = run_local("sleep 30 | cat", dir.path(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("1s"));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_argv() {
        let argv = timeout_argv("make -j8", Duration::from_secs(300));
        assert_eq!(
            argv,
            vec!["timeout", "-k", "5", "300", "bash", "-c", "make -j8"]
        );
        let argv = timeout_argv("qemu-system-x86_64", Duration::from_millis(1500));
        assert_eq!(argv[3], "1.5");
        assert_eq!(timeout_argv("true", Duration::ZERO)[3], "0.001");
    }

    #[test]
    fn test_format_secs() {
        assert_eq!(format_secs(&Duration::from_secs(42)), "42");
        assert_eq!(format_secs(&Duration::from_millis(500)), "0.5");
        assert_eq!(format_secs(&Duration::from_millis(1250)), "1.25");
        assert_eq!(format_secs(&Duration::from_secs_f64(3.3000000000000003)), "3.3");
    }
}
