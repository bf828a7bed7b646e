//! Command surface of a task.
//!
//! Each task is exposed as its own sub-command. The surface lists the
//! options that sub-command accepts: one per placeholder, tag and stage
//! filters, and the options controlling the invocation context.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches};

use crate::core::{Context, Error, Result};
use crate::task::{ResolverRegistry, Task};
use crate::workflow::{ProjectWorkflow, WorkflowStore};

/// Option name of the tag filter.
pub const OPTION_TAGS: &str = "tags";
/// Option name of the stage filter.
pub const OPTION_STAGES: &str = "stages";
/// Option name of the context input file.
pub const OPTION_READ_CONTEXT_FROM: &str = "read-context-from";
/// Option name enabling context output.
pub const OPTION_ENABLE_CONTEXT_WRITING: &str = "enable-context-writing";
/// Option name of the context output file.
pub const OPTION_WRITE_CONTEXT_TO: &str = "write-context-to";
/// Option name of the dry-run flag.
pub const OPTION_DRY_RUN: &str = "dry-run";
/// Option name of the context overwrites.
pub const OPTION_OVERWRITES: &str = "overwrites";
/// Option name of the report format.
pub const OPTION_FORMAT: &str = "format";

const BUILTIN_OPTIONS: &[&str] = &[
    OPTION_TAGS,
    OPTION_STAGES,
    OPTION_READ_CONTEXT_FROM,
    OPTION_ENABLE_CONTEXT_WRITING,
    OPTION_WRITE_CONTEXT_TO,
    OPTION_DRY_RUN,
    OPTION_OVERWRITES,
    OPTION_FORMAT,
];

/// Default file name for written contexts.
pub const DEFAULT_CONTEXT_FILE: &str = "taskrail.context.json";

/// How an option takes values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// A single value
    Value,
    /// Repeatable, collecting every value
    Multi,
    /// A boolean switch
    Flag,
}

/// Where an option came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionOrigin {
    /// Supplies a placeholder value
    Placeholder,
    /// Built into every task surface
    Builtin,
}

/// A single option of a task surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOption {
    /// Long option name
    pub name: String,

    /// Short option letter
    pub short: Option<char>,

    /// Value shape
    pub kind: OptionKind,

    /// Whether a value must follow the option when it is given
    pub value_required: bool,

    /// Help text
    pub description: String,

    /// Default values
    pub defaults: Vec<String>,

    /// Option origin
    pub origin: OptionOrigin,
}

impl TaskOption {
    fn builtin(name: &str, kind: OptionKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            short: None,
            kind,
            value_required: kind != OptionKind::Flag,
            description: description.to_string(),
            defaults: Vec::new(),
            origin: OptionOrigin::Builtin,
        }
    }

    #[must_use]
    fn with_short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    #[must_use]
    fn with_defaults(mut self, defaults: Vec<String>) -> Self {
        self.defaults = defaults;
        self
    }

    /// Render the option as a clap argument.
    pub fn to_arg(&self) -> Arg {
        let mut arg =
            Arg::new(self.name.clone()).long(self.name.clone()).help(self.description.clone());
        if let Some(short) = self.short {
            arg = arg.short(short);
        }

        match self.kind {
            OptionKind::Flag => arg.action(ArgAction::SetTrue),
            OptionKind::Value => {
                let arg = arg.action(ArgAction::Set);
                let arg = if self.value_required { arg.num_args(1) } else { arg.num_args(0..=1) };
                match self.defaults.first() {
                    Some(default) => arg.default_value(default.clone()),
                    None => arg,
                }
            }
            OptionKind::Multi => {
                arg.action(ArgAction::Append).num_args(1).default_values(self.defaults.clone())
            }
        }
    }
}

/// Options accepted when running a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSurface {
    /// Task id, used as the sub-command name
    pub name: String,

    /// Short description
    pub about: String,

    /// Long help
    pub help: Option<String>,

    /// Options in declaration order
    pub options: Vec<TaskOption>,
}

impl CommandSurface {
    /// Look up an option by name.
    pub fn option(&self, name: &str) -> Option<&TaskOption> {
        self.options.iter().find(|o| o.name == name)
    }

    /// Render the surface as a clap command.
    pub fn to_clap(&self) -> clap::Command {
        let mut command = clap::Command::new(self.name.clone()).about(self.about.clone());
        if let Some(ref help) = self.help {
            command = command.long_about(help.clone());
        }
        self.options.iter().fold(command, |command, option| command.arg(option.to_arg()))
    }

    /// Extract the run request from parsed matches.
    pub fn parse(&self, matches: &ArgMatches) -> RunRequest {
        let strings = |name: &str| -> Vec<String> {
            matches
                .try_get_many::<String>(name)
                .ok()
                .flatten()
                .map(|v| v.cloned().collect())
                .unwrap_or_default()
        };
        let string = |name: &str| matches.try_get_one::<String>(name).ok().flatten().cloned();
        let flag = |name: &str| matches.try_get_one::<bool>(name).ok().flatten().copied();

        let values = self
            .options
            .iter()
            .filter(|o| o.origin == OptionOrigin::Placeholder)
            .filter_map(|o| string(&o.name).map(|v| (o.name.clone(), v)))
            .collect();

        RunRequest {
            values,
            // Defaults list every tag, so only an explicit filter narrows the task.
            tags: match self.option(OPTION_TAGS).and_then(|_| matches.value_source(OPTION_TAGS)) {
                Some(ValueSource::CommandLine) => strings(OPTION_TAGS).into_iter().collect(),
                _ => BTreeSet::new(),
            },
            stages: strings(OPTION_STAGES).into_iter().collect(),
            read_context_from: string(OPTION_READ_CONTEXT_FROM).map(PathBuf::from),
            enable_context_writing: flag(OPTION_ENABLE_CONTEXT_WRITING).unwrap_or(false),
            write_context_to: string(OPTION_WRITE_CONTEXT_TO).map(PathBuf::from),
            dry_run: flag(OPTION_DRY_RUN).unwrap_or(false),
            overwrites: strings(OPTION_OVERWRITES),
            format: string(OPTION_FORMAT),
        }
    }
}

/// Parsed options of a task invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    /// Placeholder values keyed by option name
    pub values: BTreeMap<String, String>,

    /// Tag filter
    pub tags: BTreeSet<String>,

    /// Stage filter
    pub stages: BTreeSet<String>,

    /// Context file to start from
    pub read_context_from: Option<PathBuf>,

    /// Whether to write the context afterwards
    pub enable_context_writing: bool,

    /// Where to write the context
    pub write_context_to: Option<PathBuf>,

    /// Simulate only
    pub dry_run: bool,

    /// `key=value` context overwrites
    pub overwrites: Vec<String>,

    /// Report format
    pub format: Option<String>,
}

impl RunRequest {
    /// Build the invocation context.
    pub fn context(&self) -> Result<Context> {
        let mut context = match self.read_context_from {
            Some(ref path) => Context::load(path)?,
            None => Context::new(),
        };

        context.apply_overwrites(&self.overwrites);
        context.tags.extend(self.tags.iter().cloned());
        context.stages.extend(self.stages.iter().cloned());
        context.dry_run |= self.dry_run;
        if self.format.is_some() {
            context.format.clone_from(&self.format);
        }
        Ok(context)
    }
}

/// Builds [`CommandSurface`]s from tasks.
#[derive(Debug)]
pub struct SurfaceBuilder<'a> {
    resolvers: &'a ResolverRegistry,
    cwd: PathBuf,
}

impl<'a> SurfaceBuilder<'a> {
    /// Create a builder writing contexts relative to `cwd`.
    pub fn new(resolvers: &'a ResolverRegistry, cwd: impl Into<PathBuf>) -> Self {
        Self { resolvers, cwd: cwd.into() }
    }

    /// Build the surface of `task`.
    pub fn build(&self, task: &Task) -> Result<CommandSurface> {
        let mut options = Vec::new();
        self.add_placeholder_options(task, &mut options, &mut Vec::new())?;

        let mut tags: Vec<String> = Vec::new();
        for command in task.commands() {
            for tag in command.tags {
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }
        if !tags.is_empty() {
            push_option(
                &mut options,
                TaskOption::builtin(
                    OPTION_TAGS,
                    OptionKind::Multi,
                    "Only execute subtasks that match at least one of the given tags",
                )
                .with_short('t')
                .with_defaults(tags),
            );
        }

        push_option(
            &mut options,
            TaskOption::builtin(
                OPTION_STAGES,
                OptionKind::Multi,
                "Only execute subtasks that match at least one of the given stages",
            )
            .with_short('s'),
        );

        for option in self.context_options() {
            push_option(&mut options, option);
        }

        tracing::debug!(task = task.id, options = options.len(), "Built command surface");

        Ok(CommandSurface {
            name: task.id.clone(),
            about: task.short_description.clone(),
            help: task.help.clone(),
            options,
        })
    }

    fn add_placeholder_options(
        &self,
        task: &Task,
        options: &mut Vec<TaskOption>,
        visiting: &mut Vec<String>,
    ) -> Result<()> {
        if let Some(pos) = visiting.iter().position(|id| *id == task.id) {
            let mut cycle = visiting[pos..].to_vec();
            cycle.push(task.id.clone());
            return Err(Error::CycleDetected(cycle));
        }
        visiting.push(task.id.clone());

        for placeholder in task.placeholders.values() {
            let name = self.resolvers.option_name(placeholder);
            if BUILTIN_OPTIONS.contains(&name.as_str()) {
                tracing::warn!(task = task.id, option = name, "Placeholder shadows a built-in option");
                continue;
            }

            let resolver = self.resolvers.get(placeholder);
            push_option(
                options,
                TaskOption {
                    name,
                    short: None,
                    kind: OptionKind::Value,
                    value_required: !placeholder.optional,
                    description: resolver.description(placeholder),
                    defaults: Vec::new(),
                    origin: OptionOrigin::Placeholder,
                },
            );
        }

        for sub_task in task.sub_tasks() {
            self.add_placeholder_options(sub_task, options, visiting)?;
        }

        visiting.pop();
        Ok(())
    }

    fn context_options(&self) -> Vec<TaskOption> {
        let default_context = self.cwd.join(DEFAULT_CONTEXT_FILE).display().to_string();

        vec![
            TaskOption::builtin(
                OPTION_READ_CONTEXT_FROM,
                OptionKind::Value,
                "Read the context from the given JSON file",
            ),
            TaskOption::builtin(
                OPTION_ENABLE_CONTEXT_WRITING,
                OptionKind::Flag,
                "Write the context into a file after the run",
            ),
            TaskOption::builtin(
                OPTION_WRITE_CONTEXT_TO,
                OptionKind::Value,
                "File the context is written to",
            )
            .with_defaults(vec![default_context]),
            TaskOption::builtin(
                OPTION_DRY_RUN,
                OptionKind::Flag,
                "Only simulate the run, execute nothing",
            )
            .with_short('d'),
            TaskOption::builtin(
                OPTION_OVERWRITES,
                OptionKind::Multi,
                "Overwrite context values, as key=value",
            )
            .with_short('o'),
            TaskOption::builtin(OPTION_FORMAT, OptionKind::Value, "Report format (text, json)"),
        ]
    }
}

/// Add `option` unless one with the same name exists.
fn push_option(options: &mut Vec<TaskOption>, option: TaskOption) {
    if options.iter().any(|o| o.name == option.name) {
        tracing::debug!(option = option.name, "Skipping duplicate option");
        return;
    }
    options.push(option);
}

/// Tasks that may run given the project's workflow state.
///
/// Without an active workflow every task is runnable. Otherwise a task bound
/// to a transition (through the transition's `task` metadata) is runnable
/// only while that transition is enabled.
pub fn runnable_tasks<'t, S: WorkflowStore>(
    tasks: &'t BTreeMap<String, Task>,
    workflow: Option<&ProjectWorkflow<S>>,
) -> Vec<&'t Task> {
    let Some(workflow) = workflow.filter(|w| w.active().is_some()) else {
        return tasks.values().collect();
    };

    let bindings = workflow.task_bindings();
    let enabled = workflow.next_enabled_transitions();

    tasks
        .values()
        .filter(|task| match bindings.get(&task.id) {
            Some(transitions) => transitions.iter().any(|t| enabled.contains(t)),
            None => true,
        })
        .collect()
}
