//! Error types shared by the task and workflow engines.

use thiserror::Error;

/// Result type for taskrail operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while composing tasks or governing workflows.
///
/// A transition whose guard fails is not an error: its blockers are
/// reported as messages on the [`Context`](super::Context).
#[derive(Debug, Error)]
pub enum Error {
    /// An operation needs a project or an active workflow that is missing.
    #[error("{0}")]
    NotInitialized(String),

    /// Child workflows can only be restarted through their parent.
    #[error("Restarting children workflows is not permitted")]
    RestartForbidden,

    /// A required setting is absent or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested task id is not known to the repository.
    #[error("Could not find task {0}")]
    TaskNotFound(String),

    /// A task set references a task id that was never defined.
    #[error("Task set '{set}' references unknown task '{member}'")]
    UnknownMember { set: String, member: String },

    /// Task set membership loops back onto itself.
    #[error("Task sets form a cycle: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    /// A declarative task record failed validation.
    #[error("Invalid task '{id}': {reason}")]
    InvalidTask { id: String, reason: String },

    /// A workflow definition failed validation.
    #[error("Invalid workflow definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },

    /// A setting path is not known.
    #[error("Setting '{0}' does not exist")]
    MissingSetting(String),

    /// A required placeholder received no value.
    #[error("No value provided for required placeholder '{0}'")]
    MissingValue(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    /// Build the error raised when no project key is configured.
    pub fn project_not_initialized() -> Self {
        Self::NotInitialized("Project is not initialized. Run the `taskrail init` command.".into())
    }

    /// Build the error raised when no workflow is bound or given.
    pub fn workflow_not_initialized() -> Self {
        Self::NotInitialized("Workflow is not initialized".into())
    }
}
