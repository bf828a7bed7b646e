//! Task model, repository and execution.
//!
//! Tasks are loaded from YAML records, composed into [`Task`] values and run
//! through a [`TaskRunner`].

mod command;
mod definition;
mod model;
mod placeholder;
mod repository;
mod resolver;
mod runner;

pub use command::{Command, CommandKind};
pub use definition::{
    discover_definitions, parse_definition, parse_definition_str, MemberDefinition,
    TaskDefinition, TaskType,
};
pub use model::{Task, TaskKind, TaskMember};
pub use placeholder::{merge_placeholders, Placeholder, Placeholders};
pub use repository::{TaskRepository, TaskYamlRepository};
pub use resolver::{
    value_to_arg, ResolverRegistry, SettingValueResolver, StaticValueResolver, ValueResolver,
};
pub use runner::TaskRunner;
