//! # Taskrail
//!
//! Compose declarative tasks and govern project workflows from your terminal.
//!
//! Tasks are declared in YAML files. A task is either a single shell command
//! template with placeholders, or a task set composed of other tasks that can
//! be narrowed by tags. Projects move through named workflows whose
//! transitions may be bound to tasks and guarded by context values.
//!
//! ## Features
//!
//! - **Task composition**: Task sets flatten their members' commands and
//!   placeholders, filtered by tags
//! - **Command surfaces**: Every task becomes a sub-command whose options are
//!   derived from its placeholders
//! - **Workflow governance**: State machines and workflow nets loaded from YAML,
//!   persisted per project
//!
//! ## Quick Start
//!
//! ```bash
//! # Give the project a key
//! taskrail init
//!
//! # List and run tasks
//! taskrail list
//! taskrail run qa --tags fast
//!
//! # Drive the release workflow
//! taskrail workflow init release
//! taskrail workflow apply build
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::derivable_impls)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::map_unwrap_or)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::unnecessary_literal_bound)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::unnecessary_map_or)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::or_fun_call)]

pub mod core;
pub mod surface;
pub mod task;
pub mod workflow;

pub use crate::core::{
    CommandExecutor, Config, Context, Error, ExecutionResult, KeyedMessage, Message,
    ProjectSettings, Result, ShellExecutor, Verbosity,
};
pub use surface::{runnable_tasks, CommandSurface, RunRequest, SurfaceBuilder, TaskOption};
pub use task::{
    Command, Placeholder, ResolverRegistry, Task, TaskKind, TaskMember, TaskRepository,
    TaskRunner, TaskYamlRepository, ValueResolver,
};
pub use workflow::{
    run_workflow, JsonWorkflowStore, MemoryWorkflowStore, ProjectWorkflow, StateMachine,
    Workflow, WorkflowDefinition, WorkflowRegistry, WorkflowStore, WorkflowTransition,
};

/// Application name used for config and data directories.
pub const APP_NAME: &str = "taskrail";

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
