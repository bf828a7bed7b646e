//! Declarative task records.
//!
//! Each YAML file under a task directory describes one task:
//!
//! ```yaml
//! id: qa
//! type: task_set
//! short_description: Run all QA checks
//! placeholders:
//!   - name: "%project_dir%"
//!     value_resolver: STATIC
//!     configuration: { name: project-dir, value: ".", description: Project root }
//! tasks:
//!   - { id: lint, tags: [fast], stop_on_error: true }
//!   - { id: test, tags: [slow], stop_on_error: false }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::placeholder::Placeholder;
use crate::core::{Error, Result};

/// Kind of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    LocalCli,
    TaskSet,
}

/// A task record as written in a YAML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique task id
    pub id: String,

    /// Record kind
    #[serde(rename = "type")]
    pub task_type: TaskType,

    /// One line description
    #[serde(default)]
    pub short_description: String,

    /// Longer help text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,

    /// Command template (`local_cli` only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Placeholders used by the command
    #[serde(default)]
    pub placeholders: Vec<Placeholder>,

    /// Member references (`task_set` only)
    #[serde(default)]
    pub tasks: Vec<MemberDefinition>,
}

/// Reference from a task set to one of its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDefinition {
    /// Id of the member task
    pub id: String,

    /// Tags used to select the member
    #[serde(default)]
    pub tags: Vec<String>,

    /// Whether a failing member stops the set
    #[serde(default = "default_stop_on_error")]
    pub stop_on_error: bool,
}

fn default_stop_on_error() -> bool {
    true
}

/// Parse a task record from a file.
pub fn parse_definition(path: &Path) -> Result<TaskDefinition> {
    let content = std::fs::read_to_string(path)?;
    parse_definition_str(&content).map_err(|e| match e {
        Error::Yaml(err) => {
            Error::InvalidTask { id: path.display().to_string(), reason: err.to_string() }
        }
        other => other,
    })
}

/// Parse a task record from a string.
pub fn parse_definition_str(content: &str) -> Result<TaskDefinition> {
    let definition: TaskDefinition = serde_yaml::from_str(content)?;
    validate_definition(&definition)?;
    Ok(definition)
}

/// Validate a task record for common errors.
fn validate_definition(definition: &TaskDefinition) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidTask {
        id: definition.id.clone(),
        reason: reason.to_string(),
    };

    if definition.id.trim().is_empty() {
        return Err(invalid("task id cannot be empty"));
    }

    match definition.task_type {
        TaskType::LocalCli => {
            if definition.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
                return Err(invalid("local_cli tasks need a command"));
            }
            if !definition.tasks.is_empty() {
                return Err(invalid("local_cli tasks cannot have member tasks"));
            }
        }
        TaskType::TaskSet => {
            if definition.tasks.is_empty() {
                return Err(invalid("task sets need at least one member task"));
            }
            if definition.tasks.iter().any(|m| m.id.trim().is_empty()) {
                return Err(invalid("member task ids cannot be empty"));
            }
        }
    }

    for placeholder in &definition.placeholders {
        if placeholder.name.trim().is_empty() {
            return Err(invalid("placeholder names cannot be empty"));
        }
    }

    if let Some(ref command) = definition.command {
        let declared: Vec<&str> =
            definition.placeholders.iter().map(|p| p.name.as_str()).collect();
        for token in super::Command::local_cli(command.as_str()).tokens() {
            if !declared.contains(&token) {
                tracing::warn!(task = definition.id, token, "Undeclared placeholder in command");
            }
        }
    }

    Ok(())
}

/// Discover task records in the given directories.
///
/// Files are returned in sorted path order so that later files win
/// deterministically when ids collide.
pub fn discover_definitions(dirs: &[PathBuf]) -> Result<Vec<(PathBuf, TaskDefinition)>> {
    let mut paths = Vec::new();

    for dir in dirs {
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            let path = entry.path();
            if entry.file_type().is_file()
                && path.extension().map_or(false, |e| e == "yaml" || e == "yml")
            {
                paths.push(path.to_path_buf());
            }
        }
    }

    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let definition = parse_definition(&path)?;
            tracing::debug!(path = ?path, id = definition.id, "Loaded task definition");
            Ok((path, definition))
        })
        .collect()
}
