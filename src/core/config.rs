//! Configuration management for Taskrail.
//!
//! Handles loading and saving configuration from TOML files and exposes
//! individual settings through dotted paths such as `project.key`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::{Error, Result};

/// Name of the project-local configuration file.
pub const LOCAL_CONFIG_FILE: &str = ".taskrail.toml";

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Project identity and workflow selection
    pub project: ProjectConfig,

    /// Task source settings
    pub tasks: TasksConfig,

    /// Workflow definition and store settings
    pub workflow: WorkflowConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Shell used to run task commands (defaults to `sh`, or `cmd` on Windows)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
}

/// Project settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Unique project key, written by `taskrail init`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Workflows the project is pinned to
    pub workflows: Vec<String>,
}

/// Task source settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Directories scanned for task definition files
    pub dirs: Vec<PathBuf>,
}

/// Workflow settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Directories scanned for workflow definition files
    pub definition_dirs: Vec<PathBuf>,

    /// JSON file holding workflow instances and their transitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self { dirs: vec![PathBuf::from("tasks")] }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self { definition_dirs: vec![PathBuf::from("workflows")], store_path: None }
    }
}

/// How a value is written into a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingStrategy {
    /// The new value replaces the old one
    Replace,
    /// The new value is appended to the existing list
    Merge,
}

impl SettingStrategy {
    /// Name shown in setting listings.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Merge => "merge",
        }
    }
}

/// Description of a writable setting.
#[derive(Debug, Clone, Copy)]
pub struct SettingInfo {
    /// Dotted setting path
    pub path: &'static str,
    /// Value type (`string`, `array`, `path`)
    pub value_type: &'static str,
    /// Write strategy
    pub strategy: SettingStrategy,
    /// Human readable description
    pub description: &'static str,
}

/// Settings that can be changed with `taskrail setting set`.
pub const SETTINGS: &[SettingInfo] = &[
    SettingInfo {
        path: "project.key",
        value_type: "string",
        strategy: SettingStrategy::Replace,
        description: "Unique key identifying the project",
    },
    SettingInfo {
        path: "project.workflows",
        value_type: "array",
        strategy: SettingStrategy::Merge,
        description: "Workflows the project is pinned to",
    },
    SettingInfo {
        path: "tasks.dirs",
        value_type: "array",
        strategy: SettingStrategy::Merge,
        description: "Directories containing task definitions",
    },
    SettingInfo {
        path: "workflow.definition_dirs",
        value_type: "array",
        strategy: SettingStrategy::Merge,
        description: "Directories containing workflow definitions",
    },
    SettingInfo {
        path: "workflow.store_path",
        value_type: "path",
        strategy: SettingStrategy::Replace,
        description: "File storing workflow state",
    },
    SettingInfo {
        path: "general.shell",
        value_type: "string",
        strategy: SettingStrategy::Replace,
        description: "Shell used to run task commands",
    },
];

/// Project identity handed explicitly to the workflow service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSettings {
    /// Project key, if the project was initialized
    pub project_key: Option<String>,

    /// Workflows configured for the project
    pub workflows: Vec<String>,
}

impl ProjectSettings {
    /// Create settings for a project key.
    pub fn new(project_key: impl Into<String>) -> Self {
        Self { project_key: Some(project_key.into()), workflows: Vec::new() }
    }

    /// Set the configured workflows.
    #[must_use]
    pub fn with_workflows(mut self, workflows: Vec<String>) -> Self {
        self.workflows = workflows;
        self
    }

    /// The project key, treating an empty key as missing.
    pub fn project_key(&self) -> Option<&str> {
        self.project_key.as_deref().filter(|k| !k.is_empty())
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Looks for config in:
    /// 1. `.taskrail.toml` in current directory
    /// 2. `~/.config/taskrail/config.toml`
    /// 3. Falls back to defaults
    pub fn load() -> Result<Self> {
        match Self::locate() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Find the configuration file [`Config::load`] would read.
    pub fn locate() -> Option<PathBuf> {
        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Some(local_config);
        }

        Self::config_dir().map(|d| d.join("config.toml")).filter(|p| p.exists())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Save configuration to the global config file.
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir().ok_or_else(|| {
            Error::Configuration("Could not determine config directory".to_string())
        })?;
        self.save_to(&dir.join("config.toml"))
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("taskrail"))
    }

    /// Get the data directory path (for workflow state).
    pub fn data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("taskrail"))
    }

    /// Project identity for the workflow service.
    pub fn project_settings(&self) -> ProjectSettings {
        ProjectSettings {
            project_key: self.project.key.clone(),
            workflows: self.project.workflows.clone(),
        }
    }

    /// Task directories with `~` and environment variables expanded.
    pub fn task_dirs(&self) -> Vec<PathBuf> {
        self.tasks.dirs.iter().map(|p| expand_path(p)).collect()
    }

    /// Workflow definition directories with `~` and variables expanded.
    pub fn definition_dirs(&self) -> Vec<PathBuf> {
        self.workflow.definition_dirs.iter().map(|p| expand_path(p)).collect()
    }

    /// Path of the workflow store file.
    pub fn store_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.workflow.store_path {
            return Ok(expand_path(path));
        }
        Self::data_dir().map(|d| d.join("workflows.json")).ok_or_else(|| {
            Error::Configuration("Could not determine data directory".to_string())
        })
    }

    /// Read a setting by dotted path.
    pub fn setting(&self, path: &str) -> Result<serde_json::Value> {
        let root = serde_json::to_value(self)?;
        let pointer = format!("/{}", path.replace('.', "/"));

        match root.pointer(&pointer) {
            Some(value) => Ok(value.clone()),
            None if SETTINGS.iter().any(|s| s.path == path) => Ok(serde_json::Value::Null),
            None => Err(Error::MissingSetting(path.to_string())),
        }
    }

    /// Write a setting by dotted path.
    ///
    /// Array settings use the merge strategy: the value is appended unless
    /// it is already present.
    pub fn set_setting(&mut self, path: &str, value: &str) -> Result<()> {
        let info = SETTINGS
            .iter()
            .find(|s| s.path == path)
            .ok_or_else(|| Error::MissingSetting(path.to_string()))?;

        tracing::debug!(path, value, strategy = info.strategy.as_str(), "Updating setting");

        match info.path {
            "project.key" => self.project.key = Some(value.to_string()),
            "project.workflows" => merge_unique(&mut self.project.workflows, value.to_string()),
            "tasks.dirs" => merge_unique(&mut self.tasks.dirs, PathBuf::from(value)),
            "workflow.definition_dirs" => {
                merge_unique(&mut self.workflow.definition_dirs, PathBuf::from(value));
            }
            "workflow.store_path" => self.workflow.store_path = Some(PathBuf::from(value)),
            "general.shell" => self.general.shell = Some(value.to_string()),
            _ => return Err(Error::MissingSetting(path.to_string())),
        }

        Ok(())
    }
}

fn merge_unique<T: PartialEq>(values: &mut Vec<T>, value: T) {
    if !values.contains(&value) {
        values.push(value);
    }
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.project.key.is_none());
        assert!(config.project.workflows.is_empty());
        assert_eq!(config.tasks.dirs, vec![PathBuf::from("tasks")]);
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [project]
            key = "abc"
            workflows = ["release"]

            [tasks]
            dirs = ["qa", "build"]

            [workflow]
            store_path = "/tmp/state.json"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.project.key.as_deref(), Some("abc"));
        assert_eq!(config.tasks.dirs.len(), 2);
        assert_eq!(config.store_path().unwrap(), PathBuf::from("/tmp/state.json"));

        let settings = config.project_settings();
        assert_eq!(settings.project_key(), Some("abc"));
        assert_eq!(settings.workflows, vec!["release"]);
    }

    #[test]
    fn test_empty_project_key_is_missing() {
        let settings = ProjectSettings::new("");
        assert!(settings.project_key().is_none());
    }

    #[test]
    fn test_setting_paths() {
        let mut config = Config::default();
        config.set_setting("project.key", "p1").unwrap();
        config.set_setting("project.workflows", "release").unwrap();
        config.set_setting("project.workflows", "release").unwrap();
        config.set_setting("project.workflows", "hotfix").unwrap();

        assert_eq!(config.setting("project.key").unwrap(), serde_json::json!("p1"));
        assert_eq!(
            config.setting("project.workflows").unwrap(),
            serde_json::json!(["release", "hotfix"])
        );
        assert_eq!(config.setting("workflow.store_path").unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn test_unknown_setting_fails() {
        let mut config = Config::default();
        assert!(matches!(config.set_setting("nope", "x"), Err(Error::MissingSetting(_))));
        assert!(matches!(config.setting("nope.deeper"), Err(Error::MissingSetting(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCAL_CONFIG_FILE);

        let mut config = Config::default();
        config.project.key = Some("p1".to_string());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
