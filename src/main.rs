//! Taskrail - compose declarative tasks and govern project workflows.
//!
//! Every task found in the configured task directories can be run as
//! `taskrail run <task>`, with options derived from its placeholders.

#![allow(clippy::single_match_else)]

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use taskrail::core::{Config, Context, Message, Verbosity, LOCAL_CONFIG_FILE, SETTINGS};
use taskrail::surface::{runnable_tasks, SurfaceBuilder, DEFAULT_CONTEXT_FILE};
use taskrail::task::{ResolverRegistry, TaskRepository, TaskRunner, TaskYamlRepository};
use taskrail::workflow::{run_workflow, JsonWorkflowStore, ProjectWorkflow, WorkflowRegistry};
use taskrail::ShellExecutor;

/// Compose declarative tasks and govern project workflows
#[derive(Parser)]
#[command(name = "taskrail")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tasks that can run in the current workflow state
    List {
        /// Show the tags of each task
        #[arg(short, long)]
        tags: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run a task; options after the task id are derived from its placeholders
    Run {
        /// Task id
        task: String,

        /// Task options (see `taskrail run <task> -- --help`)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Manage the project workflow
    Workflow {
        /// Workflow operation
        #[command(subcommand)]
        operation: WorkflowOperation,
    },

    /// Read and change settings
    Setting {
        /// Setting operation
        #[command(subcommand)]
        operation: SettingOperation,
    },

    /// Initialize the project in the current directory
    Init {
        /// Replace an existing project key
        #[arg(short, long)]
        force: bool,

        /// Additional settings (path=value)
        #[arg(short, long = "setting")]
        settings: Vec<String>,
    },

    /// Show configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum WorkflowOperation {
    /// Start or resume a workflow
    Init {
        /// Workflow definition name
        name: Option<String>,
    },

    /// Replace the active workflow with a fresh instance
    Restart,

    /// Show the active workflow
    Status,

    /// Show the transitions that can be applied next
    Next,

    /// Apply a transition to the active workflow
    Apply {
        /// Transition name
        transition: String,

        /// Context values checked by guards (key=value)
        #[arg(short, long)]
        set: Vec<String>,
    },

    /// List known workflow definitions
    List,

    /// Drive a workflow to completion, running the task bound to each transition
    Run {
        /// Workflow definition name
        name: Option<String>,

        /// Context values checked by guards (key=value)
        #[arg(short, long)]
        set: Vec<String>,

        /// Show the next step without executing it
        #[arg(short, long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum SettingOperation {
    /// Change a setting in the project configuration
    #[command(after_help = settings_help())]
    Set {
        /// Dotted setting path
        path: String,

        /// New value
        value: String,
    },

    /// Print a setting
    Get {
        /// Dotted setting path
        path: String,
    },

    /// List writable settings
    List,
}

fn settings_help() -> String {
    let mut help = String::from("Settings:\n");
    for info in SETTINGS {
        help.push_str(&format!(
            "  {:<26} {:<7} {:<8} {}\n",
            info.path,
            info.value_type,
            info.strategy.as_str(),
            info.description
        ));
    }
    help
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose { EnvFilter::new("debug") } else { EnvFilter::new("warn") };

    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();

    match cli.command {
        Commands::List { tags, format } => cmd_list(tags, &format),
        Commands::Run { task, args } => cmd_run(&task, args, cli.verbose),
        Commands::Workflow { operation } => cmd_workflow(operation, cli.verbose),
        Commands::Setting { operation } => cmd_setting(operation),
        Commands::Init { force, settings } => cmd_init(force, &settings),
        Commands::Config { path } => cmd_config(path),
        Commands::Completions { shell } => {
            cmd_completions(shell);
            Ok(())
        }
    }
}

/// Open the project's workflow service and bind a persisted instance, if any.
///
/// Returns `None` for projects without a key.
fn open_workflow(config: &Config) -> Result<Option<ProjectWorkflow<JsonWorkflowStore>>> {
    let settings = config.project_settings();
    if settings.project_key().is_none() {
        return Ok(None);
    }

    let registry = WorkflowRegistry::load(&config.definition_dirs())?;
    let store = JsonWorkflowStore::from_config(config)?;
    let mut workflow = ProjectWorkflow::new(settings, registry, store);
    workflow.initialize(None)?;
    Ok(Some(workflow))
}

/// Like [`open_workflow`], but failing for projects without a key.
fn require_workflow(config: &Config) -> Result<ProjectWorkflow<JsonWorkflowStore>> {
    open_workflow(config)?.ok_or_else(|| taskrail::Error::project_not_initialized().into())
}

/// Print the messages recorded from index `from` and exit non-zero if any
/// of them is an error.
fn report(context: &Context, from: usize, verbose: bool) -> Result<()> {
    let messages = context.messages.get(from..).unwrap_or_default();
    if context.format.as_deref() == Some("json") {
        println!("{}", serde_json::to_string_pretty(messages)?);
    } else {
        for keyed in messages {
            match keyed.message.verbosity {
                Verbosity::Debug if !verbose => {}
                Verbosity::Error => eprintln!("{}", keyed.message),
                _ => println!("{}", keyed.message),
            }
        }
    }

    if context.has_errors_since(from) {
        std::process::exit(context.exit_code_since(from));
    }
    Ok(())
}

/// List runnable tasks.
fn cmd_list(show_tags: bool, format: &str) -> Result<()> {
    let config = Config::load()?;
    let repository = TaskYamlRepository::from_config(&config);
    let tasks = repository.find_all(&BTreeSet::new())?;
    let workflow = open_workflow(&config)?;
    let runnable = runnable_tasks(&tasks, workflow.as_ref());

    match format {
        "json" => {
            let entries: Vec<_> = runnable
                .iter()
                .map(|task| {
                    serde_json::json!({
                        "id": task.id,
                        "description": task.short_description,
                        "task_set": task.is_task_set(),
                        "tags": task.tags(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            for task in &runnable {
                if show_tags && !task.tags().is_empty() {
                    let tags: Vec<_> = task.tags().into_iter().collect();
                    println!("{} - {} [{}]", task.id, task.short_description, tags.join(", "));
                } else {
                    println!("{} - {}", task.id, task.short_description);
                }
            }
            println!("\nTotal: {} tasks", runnable.len());
        }
    }

    Ok(())
}

/// Run a single task.
fn cmd_run(task_id: &str, args: Vec<String>, verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let cwd = std::env::current_dir()?;
    let repository = TaskYamlRepository::from_config(&config);
    let tasks = repository.find_all(&BTreeSet::new())?;

    let task = tasks.get(task_id).ok_or_else(|| taskrail::Error::TaskNotFound(task_id.into()))?;
    let workflow = open_workflow(&config)?;
    if !runnable_tasks(&tasks, workflow.as_ref()).iter().any(|t| t.id == task.id) {
        anyhow::bail!("Task '{task_id}' is not available in the current workflow state");
    }

    let resolvers = ResolverRegistry::new();
    let surface = SurfaceBuilder::new(&resolvers, &cwd).build(task)?;
    let argv = std::iter::once(task_id.to_string()).chain(args);
    let matches = match surface.to_clap().try_get_matches_from(argv) {
        Ok(matches) => matches,
        Err(e) => e.exit(),
    };
    let request = surface.parse(&matches);
    let context = request.context()?;
    let baseline = context.messages.len();

    // Compose again so tag filtering applies to the members.
    let task = repository.get(task_id, &request.tags)?;
    let executor =
        ShellExecutor::new().with_shell(config.general.shell.clone()).with_working_dir(&cwd);
    let runner = TaskRunner::new(executor, &resolvers, &config);
    let context = runner.run(&task, &request.values, context)?;

    if request.enable_context_writing {
        let path =
            request.write_context_to.clone().unwrap_or_else(|| cwd.join(DEFAULT_CONTEXT_FILE));
        context
            .save(&path)
            .with_context(|| format!("Failed to write context to {}", path.display()))?;
    }

    report(&context, baseline, verbose)
}

/// Handle workflow commands.
fn cmd_workflow(operation: WorkflowOperation, verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let mut workflow = require_workflow(&config)?;
    let mut context = Context::new();

    match operation {
        WorkflowOperation::Init { name } => {
            if workflow.initialize(name.as_deref())? {
                if let Some(active) = workflow.active() {
                    let text = format!("Workflow \"{}\" is active", active.code);
                    context.add_message(&active.code, Message::success(text));
                }
            } else {
                let key = name.unwrap_or_default();
                let text = if key.is_empty() {
                    "No workflow is initialized, pass a workflow name".to_string()
                } else {
                    format!("Workflow \"{key}\" cannot be initialized for this project")
                };
                context.add_message(key, Message::error(text));
            }
        }

        WorkflowOperation::Restart => {
            workflow.restart()?;
            if let Some(active) = workflow.active() {
                let text = format!("Workflow \"{}\" restarted", active.code);
                context.add_message(&active.code, Message::success(text));
            }
        }

        WorkflowOperation::Status => {
            let active = workflow.active().ok_or_else(taskrail::Error::workflow_not_initialized)?;
            println!("Workflow: {}", active.code);
            println!("Id: {}", active.id);
            println!("Started: {}", active.created_at.to_rfc3339());
            println!("Marking: {}", active.marked_places().join(", "));
            if let Some(description) = workflow.workflow_metadata().get("description") {
                println!("Description: {}", description.as_str().unwrap_or_default());
            }
            if let Some(running) = workflow.running_transition(None)? {
                println!("Running: {}", running.transition);
            }
            if let Some(previous) = workflow.previous_transition(None)? {
                println!("Previous: {}", previous.transition);
            }
            println!("Finished: {}", workflow.is_finished(None)?);
        }

        WorkflowOperation::Next => {
            workflow.active().ok_or_else(taskrail::Error::workflow_not_initialized)?;
            let bindings = workflow.task_bindings();
            for transition in workflow.next_enabled_transitions() {
                let task = bindings
                    .iter()
                    .find(|(_, transitions)| transitions.contains(&transition))
                    .map(|(task, _)| task.as_str());
                match task {
                    Some(task) => println!("{transition} (task: {task})"),
                    None => println!("{transition}"),
                }
            }
        }

        WorkflowOperation::Apply { transition, set } => {
            workflow.active().ok_or_else(taskrail::Error::workflow_not_initialized)?;
            context.apply_overwrites(&set);
            context = workflow.apply_transition(&transition, context)?;
            if !context.has_errors() {
                let text = format!("Transition \"{transition}\" applied");
                context.add_message(&transition, Message::success(text));
            }
        }

        WorkflowOperation::List => {
            let initialized = workflow.initialized_workflows()?;
            let active = workflow.active().map(|w| w.code.clone());
            for name in workflow.all() {
                let marker = if active.as_deref() == Some(name.as_str()) {
                    "*"
                } else if initialized.contains(&name) {
                    "+"
                } else {
                    " "
                };
                println!("{marker} {name}");
            }
        }

        WorkflowOperation::Run { name, set, dry_run } => {
            let name = choose_workflow(&workflow, name)?;
            let repository = TaskYamlRepository::from_config(&config);
            let resolvers = ResolverRegistry::new();
            let executor = ShellExecutor::new()
                .with_shell(config.general.shell.clone())
                .with_working_dir(std::env::current_dir()?);
            let runner = TaskRunner::new(executor, &resolvers, &config);

            context = context.with_dry_run(dry_run);
            context.apply_overwrites(&set);
            context = run_workflow(&mut workflow, &name, &repository, &runner, context)?;
        }
    }

    report(&context, 0, verbose)
}

/// Pick the workflow `workflow run` should drive.
///
/// An explicit name must already be initialized when the project has
/// instances. Otherwise the single initialized, configured or known
/// workflow is used.
fn choose_workflow(
    workflow: &ProjectWorkflow<JsonWorkflowStore>,
    name: Option<String>,
) -> Result<String> {
    let initialized = workflow.initialized_workflows()?;

    if let Some(name) = name {
        if !initialized.is_empty() && !initialized.contains(&name) {
            anyhow::bail!("Workflow '{name}' is not initialized for this project");
        }
        return Ok(name);
    }

    let candidates = if !initialized.is_empty() {
        initialized
    } else if !workflow.project_workflows().is_empty() {
        workflow.project_workflows().to_vec()
    } else {
        workflow.all()
    };

    match candidates.as_slice() {
        [only] => Ok(only.clone()),
        [] => anyhow::bail!("No workflow definitions found"),
        _ => anyhow::bail!(
            "Several workflows are available ({}), pass a name",
            candidates.join(", ")
        ),
    }
}

/// Handle setting commands.
fn cmd_setting(operation: SettingOperation) -> Result<()> {
    match operation {
        SettingOperation::Set { path, value } => {
            let file = Config::locate().unwrap_or_else(|| PathBuf::from(LOCAL_CONFIG_FILE));
            let mut config = load_or_default(&file)?;
            config.set_setting(&path, &value)?;
            config.save_to(&file)?;
            println!("Success: Setting \"{path}\" updated in {}", file.display());
        }
        SettingOperation::Get { path } => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config.setting(&path)?)?);
        }
        SettingOperation::List => print!("{}", settings_help()),
    }
    Ok(())
}

fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        Ok(Config::load_from_file(path)?)
    } else {
        Ok(Config::default())
    }
}

/// Initialize the project in the current directory.
fn cmd_init(force: bool, settings: &[String]) -> Result<()> {
    let file = PathBuf::from(LOCAL_CONFIG_FILE);
    let mut config = load_or_default(&file)?;

    if config.project_settings().project_key().is_some() && !force {
        anyhow::bail!("Project is already initialized, use --force to replace its key");
    }

    let key = uuid::Uuid::new_v4().to_string();
    config.set_setting("project.key", &key)?;

    for setting in settings {
        let (path, value) = setting
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid setting '{setting}', expected path=value"))?;
        config.set_setting(path.trim(), value.trim())?;
    }

    config.save_to(&file)?;
    println!("Success: Project initialized with key {key}");
    Ok(())
}

/// Show configuration.
fn cmd_config(show_path: bool) -> Result<()> {
    if show_path {
        match Config::locate() {
            Some(path) => println!("{}", path.display()),
            None => {
                if let Some(dir) = Config::config_dir() {
                    println!("{}", dir.join("config.toml").display());
                }
            }
        }
        return Ok(());
    }

    let config = Config::load()?;
    let toml = toml::to_string_pretty(&config)?;
    println!("{toml}");

    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "taskrail", &mut io::stdout());
}
