//! Core types shared by the task and workflow engines.
//!
//! This module contains configuration, the per-invocation context,
//! error types and command execution.

mod config;
mod context;
mod error;
mod executor;

pub use config::{
    expand_path, Config, GeneralConfig, ProjectConfig, ProjectSettings, SettingInfo,
    SettingStrategy, TasksConfig, WorkflowConfig, LOCAL_CONFIG_FILE, SETTINGS,
};
pub use context::{Context, KeyedMessage, Message, Verbosity};
pub use error::{Error, Result};
pub use executor::{CommandExecutor, ExecutionResult, ShellExecutor};
