//! File storage for agent traces.
//!
//! One pretty-printed JSON document per run, named `<trace_id>.json`. The
//! directory listing is the only index.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::types::AgentTrace;
use crate::error::StorageError;

/// Local file storage for traces.
#[derive(Debug, Clone)]
pub struct TraceStorage {
    base_path: PathBuf,
}

impl TraceStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    async fn ensure_directory(&self) -> Result<(), StorageError> {
        if !self.base_path.exists() {
            fs::create_dir_all(&self.base_path).await.map_err(|e| {
                StorageError::DirectoryCreationFailed {
                    path: self.base_path.clone(),
                    message: e.to_string(),
                }
            })?;
        }
        Ok(())
    }

    /// Saves a trace and returns the path it was written to.
    pub async fn save(&self, trace: &AgentTrace) -> Result<PathBuf, StorageError> {
        self.ensure_directory().await?;

        let path = self.trace_path(&trace.trace_id);
        let json = serde_json::to_string_pretty(trace)?;

        let mut file = fs::File::create(&path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        Ok(path)
    }

    pub async fn load(&self, trace_id: &str) -> Result<AgentTrace, StorageError> {
        let path = self.trace_path(trace_id);
        if !path.exists() {
            return Err(StorageError::NotFound(trace_id.to_string()));
        }
        let contents = fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Lists stored trace ids, sorted.
    pub async fn list(&self) -> Result<Vec<String>, StorageError> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn trace_path(&self, trace_id: &str) -> PathBuf {
        self.base_path.join(format!("{trace_id}.json"))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}
