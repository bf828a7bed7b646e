//! Task data structures.
//!
//! A task is either a single command (`Leaf`) or a composite of member
//! tasks (`Composite`, a task set). Tasks are fully composed before they are
//! handed out and never change afterwards.

use std::collections::BTreeSet;

use serde::Serialize;

use super::command::Command;
use super::placeholder::{merge_placeholders, Placeholder, Placeholders};

/// A named, reusable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    /// Unique identifier within a repository snapshot
    pub id: String,

    /// One line description
    pub short_description: String,

    /// Longer help text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,

    /// Placeholders of the task and its members, in assembly order
    pub placeholders: Placeholders,

    /// Single command or task set
    pub kind: TaskKind,
}

/// Shape of a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// A single command
    Leaf(Command),
    /// Members selected by tag filtering, in declaration order
    Composite(Vec<TaskMember>),
}

/// A member of a task set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskMember {
    /// The composed member task
    pub task: Task,

    /// Whether a failing member stops the set
    pub stop_on_error: bool,

    /// Tags declared on the membership
    pub tags: BTreeSet<String>,
}

impl TaskMember {
    /// Create a new member.
    pub fn new(task: Task, stop_on_error: bool, tags: impl IntoIterator<Item = String>) -> Self {
        Self { task, stop_on_error, tags: tags.into_iter().collect() }
    }

    /// Whether the member survives filtering by `requested` tags.
    ///
    /// An empty request keeps every member.
    pub fn matches_tags(&self, requested: &BTreeSet<String>) -> bool {
        requested.is_empty() || self.tags.iter().any(|t| requested.contains(t))
    }
}

impl Task {
    /// Create a single-command task.
    pub fn leaf(
        id: impl Into<String>,
        short_description: impl Into<String>,
        command: Command,
    ) -> Self {
        Self {
            id: id.into(),
            short_description: short_description.into(),
            help: None,
            placeholders: Placeholders::new(),
            kind: TaskKind::Leaf(command),
        }
    }

    /// Create a task set.
    ///
    /// `own` placeholders come first, followed by those of every member in
    /// order; later definitions of the same name win.
    pub fn composite(
        id: impl Into<String>,
        short_description: impl Into<String>,
        own: &[Placeholder],
        members: Vec<TaskMember>,
    ) -> Self {
        let mut placeholders = Placeholders::new();
        merge_placeholders(&mut placeholders, own);
        for member in &members {
            merge_placeholders(&mut placeholders, member.task.placeholders.values());
        }

        Self {
            id: id.into(),
            short_description: short_description.into(),
            help: None,
            placeholders,
            kind: TaskKind::Composite(members),
        }
    }

    /// Set the help text.
    #[must_use]
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add a placeholder (replacing one of the same name).
    #[must_use]
    pub fn with_placeholder(mut self, placeholder: Placeholder) -> Self {
        self.placeholders.insert(placeholder.name.clone(), placeholder);
        self
    }

    /// Whether this task is a task set.
    pub fn is_task_set(&self) -> bool {
        matches!(self.kind, TaskKind::Composite(_))
    }

    /// Members of a task set (empty for single-command tasks).
    pub fn members(&self) -> &[TaskMember] {
        match &self.kind {
            TaskKind::Leaf(_) => &[],
            TaskKind::Composite(members) => members,
        }
    }

    /// Direct sub-tasks of a task set.
    pub fn sub_tasks(&self) -> impl Iterator<Item = &Task> {
        self.members().iter().map(|m| &m.task)
    }

    /// Commands to execute, in order.
    ///
    /// A member contributes its own commands, each carrying the membership's
    /// stop-on-error flag and tags.
    pub fn commands(&self) -> Vec<Command> {
        match &self.kind {
            TaskKind::Leaf(command) => vec![command.clone()],
            TaskKind::Composite(members) => members
                .iter()
                .flat_map(|member| {
                    member
                        .task
                        .commands()
                        .into_iter()
                        .map(|c| c.as_member(member.stop_on_error, &member.tags))
                        .collect::<Vec<_>>()
                })
                .collect(),
        }
    }

    /// Union of the tags carried by this task's commands.
    pub fn tags(&self) -> BTreeSet<String> {
        self.commands().into_iter().flat_map(|c| c.tags).collect()
    }
}
