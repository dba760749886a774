//! Filesystem and shell probes against an environment.
//!
//! Every probe has a local form (host filesystem under the work directory) and a
//! container form (a small command executed through the runtime).

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};

use super::provisioner::{Environment, EnvironmentHandle};
use crate::error::CommandError;
use crate::execution::command::{exec_probe, run_in_container, run_local};
use crate::execution::{ContainerRuntime, ExecResult};

/// Streams a file through SHA-256 and returns the lowercase hex digest.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Digest field of `sha256sum` output. GNU coreutils prefixes the line
/// with a backslash when the file name needed escaping.
fn parse_sha256sum(stdout: &str) -> Option<String> {
    let field = stdout.split_whitespace().next()?;
    let digest = field.strip_prefix('\\').unwrap_or(field);
    (!digest.is_empty()).then(|| digest.to_string())
}

fn resolve_local(work_dir: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        work_dir.join(candidate)
    }
}

fn container_parts(env: &Environment) -> Result<(&dyn ContainerRuntime, &str), CommandError> {
    match (env.handle(), env.runtime()) {
        (EnvironmentHandle::Container { id, .. }, Some(runtime)) => Ok((runtime, id.as_str())),
        _ => Err(CommandError::Probe("container environment has no runtime".to_string())),
    }
}

impl Environment {
    /// Whether `path` exists in the environment.
    pub async fn file_exists(&self, path: &str) -> Result<bool, CommandError> {
        if let EnvironmentHandle::Local { work_dir } = self.handle() {
            return Ok(resolve_local(work_dir, path).exists());
        }
        let (runtime, id) = container_parts(self)?;
        let result = exec_probe(runtime, id, &["test", "-e", path]).await?;
        match result.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(CommandError::Probe(format!(
                "test -e {path} exited {code}: {}",
                result.stderr.trim()
            ))),
        }
    }

    /// Size of `path` in bytes, or `None` when it does not exist.
    pub async fn file_size(&self, path: &str) -> Result<Option<u64>, CommandError> {
        if let EnvironmentHandle::Local { work_dir } = self.handle() {
            return match std::fs::metadata(resolve_local(work_dir, path)) {
                Ok(meta) => Ok(Some(meta.len())),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            };
        }
        let (runtime, id) = container_parts(self)?;
        let result = exec_probe(runtime, id, &["stat", "-L", "-c", "%s", path]).await?;
        if !result.success() {
            return Ok(None);
        }
        result
            .stdout
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| CommandError::Probe(format!("stat {path}: unexpected output: {e}")))
    }

    /// SHA-256 hex digest of `path`. Fails when the file cannot be read.
    pub async fn file_digest(&self, path: &str) -> Result<String, CommandError> {
        if let EnvironmentHandle::Local { work_dir } = self.handle() {
            let full = resolve_local(work_dir, path);
            return tokio::task::spawn_blocking(move || sha256_file(&full))
                .await
                .map_err(|e| CommandError::Probe(format!("hash task failed: {e}")))?
                .map_err(CommandError::from);
        }
        let (runtime, id) = container_parts(self)?;
        let result = exec_probe(runtime, id, &["sha256sum", path]).await?;
        if !result.success() {
            return Err(CommandError::Probe(format!(
                "sha256sum {path}: {}",
                result.stderr.trim()
            )));
        }
        parse_sha256sum(&result.stdout)
            .ok_or_else(|| CommandError::Probe(format!("sha256sum {path}: empty output")))
    }

    /// Runs a shell command with a hard timeout.
    pub async fn shell(&self, command: &str, timeout: Duration) -> Result<ExecResult, CommandError> {
        if let EnvironmentHandle::Local { work_dir } = self.handle() {
            return run_local(command, work_dir, timeout).await;
        }
        let (runtime, id) = container_parts(self)?;
        run_in_container(runtime, id, command, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_probes() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("out")).unwrap();
        std::fs::write(dir.path().join("out/bzImage"), vec![0u8; 2048]).unwrap();
        let env = Environment::local(dir.path());

        assert!(env.file_exists("out/bzImage").await.unwrap());
        assert!(!env.file_exists("out/rootfs.ext2").await.unwrap());
        assert_eq!(env.file_size("out/bzImage").await.unwrap(), Some(2048));
        assert_eq!(env.file_size("missing").await.unwrap(), None);
        env.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_local_digest_matches_known_value() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello\n").unwrap();
        let env = Environment::local(dir.path());
        assert_eq!(
            env.file_digest("hello.txt").await.unwrap(),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
        assert!(env.file_digest("nope").await.is_err());
    }

    #[test]
    fn test_parse_sha256sum_output() {
        let digest = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";
        assert_eq!(
            parse_sha256sum(&format!("{digest}  out/bzImage\n")).as_deref(),
            Some(digest)
        );
        assert_eq!(
            parse_sha256sum(&format!("\\{digest}  out/back\\\\slash.img\n")).as_deref(),
            Some(digest)
        );
        assert_eq!(parse_sha256sum(""), None);
    }

    #[tokio::test]
    async fn test_absolute_paths_bypass_work_dir() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let file = other.path().join("abs");
        std::fs::write(&file, "x").unwrap();
        let env = Environment::local(dir.path());
        assert!(env.file_exists(file.to_str().unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_shell_runs_in_work_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();
        let env = Environment::local(dir.path());
        let result = env.shell("test -f marker && echo ok", Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.stdout.trim(), "ok");
    }
}
