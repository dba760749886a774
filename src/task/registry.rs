//! Task registry: a validated, id-unique set of tasks.
//!
//! The built-in task set is embedded at compile time as YAML. Alternative sets
//! can be loaded from a single YAML/JSON file holding a list of tasks, or from a
//! directory of such files.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::types::{Category, Task};
use crate::error::RegistryError;

const BUILTIN_SOURCES: &[(&str, &str)] = &[
    ("builtin/buildroot.yaml", include_str!("builtin/buildroot.yaml")),
    ("builtin/debootstrap.yaml", include_str!("builtin/debootstrap.yaml")),
    ("builtin/debugging.yaml", include_str!("builtin/debugging.yaml")),
];

/// Ordered collection of tasks with unique ids.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    /// Tasks in load order.
    tasks: Vec<Task>,
    /// Task id to position in `tasks`.
    index: HashMap<String, usize>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the embedded built-in task set.
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for (name, source) in BUILTIN_SOURCES {
            registry.extend_from_yaml(name, source)?;
        }
        Ok(registry)
    }

    /// Parses a YAML document holding a list of tasks.
    pub fn from_yaml_str(source: &str) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.extend_from_yaml("<inline>", source)?;
        Ok(registry)
    }

    /// Loads tasks from a file, or from every `*.yaml`, `*.yml` and `*.json`
    /// file under a directory (sorted by path).
    pub fn load_path(path: &Path) -> Result<Self, RegistryError> {
        let mut registry = Self::new();

        if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let file = entry.path();
                if file.is_file() && is_task_file(file) {
                    registry.extend_from_file(file)?;
                } else {
                    debug!(path = %file.display(), "Skipping non-task file");
                }
            }
        } else {
            registry.extend_from_file(path)?;
        }

        Ok(registry)
    }

    fn extend_from_file(&mut self, path: &Path) -> Result<(), RegistryError> {
        let contents = fs::read_to_string(path)?;
        let name = path.display().to_string();
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            let tasks: Vec<Task> =
                serde_json::from_str(&contents).map_err(|e| RegistryError::Parse {
                    source_name: name.clone(),
                    message: e.to_string(),
                })?;
            self.register_all(&name, tasks)
        } else {
            self.extend_from_yaml(&name, &contents)
        }
    }

    fn extend_from_yaml(&mut self, name: &str, source: &str) -> Result<(), RegistryError> {
        let tasks: Vec<Task> = serde_yaml::from_str(source).map_err(|e| RegistryError::Parse {
            source_name: name.to_string(),
            message: e.to_string(),
        })?;
        self.register_all(name, tasks)
    }

    fn register_all(&mut self, name: &str, tasks: Vec<Task>) -> Result<(), RegistryError> {
        debug!(source = name, count = tasks.len(), "Loading task definitions");
        for task in tasks {
            self.register(task)?;
        }
        Ok(())
    }

    /// Adds a task.
    ///
    /// # Errors
    /// Returns `DuplicateTask` if a task with the same id is already registered.
    /// Structural problems in verification steps are logged, not rejected.
    pub fn register(&mut self, task: Task) -> Result<(), RegistryError> {
        if self.index.contains_key(&task.id) {
            return Err(RegistryError::DuplicateTask(task.id));
        }

        for issue in task.validate() {
            warn!(task_id = %task.id, "{}", issue);
        }

        self.index.insert(task.id.clone(), self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    /// Looks up a task by id.
    pub fn get(&self, task_id: &str) -> Result<&Task, RegistryError> {
        self.index
            .get(task_id)
            .map(|&idx| &self.tasks[idx])
            .ok_or_else(|| RegistryError::TaskNotFound(task_id.to_string()))
    }

    /// All tasks in load order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Task ids in load order.
    pub fn ids(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.id.as_str()).collect()
    }

    /// Tasks grouped by category, groups in first-seen order.
    pub fn by_category(&self) -> Vec<(Category, Vec<&Task>)> {
        let mut groups: Vec<(Category, Vec<&Task>)> = Vec::new();
        for task in &self.tasks {
            match groups.iter_mut().find(|(c, _)| *c == task.category) {
                Some((_, members)) => members.push(task),
                None => groups.push((task.category, vec![task])),
            }
        }
        groups
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Writes every task as one pretty-printed JSON array.
    pub fn export_json(&self, path: &Path) -> Result<(), RegistryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(&self.tasks)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

fn is_task_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml") | Some("json")
    )
}
