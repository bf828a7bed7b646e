//! Task execution.
//!
//! Walks a composed task's commands in order and reports the outcome of each
//! as messages on the [`Context`].

use std::collections::BTreeMap;

use super::model::Task;
use super::resolver::ResolverRegistry;
use crate::core::{CommandExecutor, Config, Context, Message, Result, Verbosity};

/// Runs composed tasks through a [`CommandExecutor`].
#[derive(Debug)]
pub struct TaskRunner<'a, E> {
    executor: E,
    resolvers: &'a ResolverRegistry,
    config: &'a Config,
}

impl<'a, E: CommandExecutor> TaskRunner<'a, E> {
    /// Create a new runner.
    pub fn new(executor: E, resolvers: &'a ResolverRegistry, config: &'a Config) -> Self {
        Self { executor, resolvers, config }
    }

    /// Run `task` with option values supplied by the caller.
    ///
    /// Returns the context with one message per command. Missing required
    /// placeholder values fail before anything runs.
    pub fn run(
        &self,
        task: &Task,
        provided: &BTreeMap<String, String>,
        mut context: Context,
    ) -> Result<Context> {
        let values = self.resolvers.resolve_values(task, provided, &context, self.config)?;
        // A context read back from disk carries messages from earlier runs.
        let baseline = context.messages.len();
        let commands = task.commands();

        tracing::info!(
            task = task.id,
            commands = commands.len(),
            dry_run = context.dry_run,
            "Running task"
        );

        for command in &commands {
            let line = command.resolve(&values);

            if context.dry_run {
                context.add_message(&task.id, Message::info(format!("Would run `{line}`")));
                continue;
            }

            context.add_message(&task.id, Message::debug(format!("Running `{line}`")));
            let result = self.executor.execute(&line)?;

            if result.success() {
                continue;
            }

            let code = result.code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            let mut text = format!("Command `{line}` failed with exit code {code}");
            if let Some(stderr) = result.stderr.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                text.push('\n');
                text.push_str(stderr);
            }
            context.add_message(&task.id, Message::error(text));

            if command.stop_on_error {
                tracing::warn!(task = task.id, command = line, "Stopping task after failure");
                break;
            }
        }

        let failed = context.messages[baseline..]
            .iter()
            .any(|m| m.key == task.id && m.message.verbosity == Verbosity::Error);
        if !context.dry_run && !failed {
            context.add_message(&task.id, Message::success(format!("Task {} finished", task.id)));
        }

        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ExecutionResult;
    use crate::task::{Command, Placeholder, TaskMember};
    use std::cell::RefCell;
    use std::time::Duration;

    /// Records command lines and fails those containing `fail`.
    #[derive(Default)]
    struct RecordingExecutor {
        lines: RefCell<Vec<String>>,
    }

    impl CommandExecutor for &RecordingExecutor {
        fn execute(&self, command_line: &str) -> Result<ExecutionResult> {
            self.lines.borrow_mut().push(command_line.to_string());
            let code = if command_line.contains("fail") { 1 } else { 0 };
            Ok(ExecutionResult {
                code: Some(code),
                stdout: None,
                stderr: Some("boom".to_string()),
                duration: Duration::ZERO,
            })
        }
    }

    fn member(id: &str, template: &str, stop_on_error: bool) -> TaskMember {
        TaskMember::new(Task::leaf(id, id, Command::local_cli(template)), stop_on_error, Vec::new())
    }

    #[test]
    fn test_runs_commands_with_values() {
        let executor = RecordingExecutor::default();
        let resolvers = ResolverRegistry::new();
        let config = Config::default();
        let runner = TaskRunner::new(&executor, &resolvers, &config);

        let task = Task::leaf("lint", "Lint", Command::local_cli("lint %path%")).with_placeholder(
            Placeholder::new("%path%", "STATIC").with_config("name", "path").with_config("value", "src"),
        );

        let context = runner.run(&task, &BTreeMap::new(), Context::new()).unwrap();
        assert_eq!(executor.lines.borrow().as_slice(), ["lint src"]);
        assert!(!context.has_errors());
        assert!(context.messages_for("lint").any(|m| m.verbosity == Verbosity::Success));
    }

    #[test]
    fn test_dry_run_executes_nothing() {
        let executor = RecordingExecutor::default();
        let resolvers = ResolverRegistry::new();
        let config = Config::default();
        let runner = TaskRunner::new(&executor, &resolvers, &config);

        let task = Task::leaf("lint", "Lint", Command::local_cli("lint"));
        let context = runner.run(&task, &BTreeMap::new(), Context::new().with_dry_run(true)).unwrap();

        assert!(executor.lines.borrow().is_empty());
        let messages: Vec<_> = context.messages_for("lint").collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].to_string(), "Info: Would run `lint`");
    }

    #[test]
    fn test_stop_on_error() {
        let executor = RecordingExecutor::default();
        let resolvers = ResolverRegistry::new();
        let config = Config::default();
        let runner = TaskRunner::new(&executor, &resolvers, &config);

        let set = Task::composite(
            "qa",
            "QA",
            &[],
            vec![member("a", "fail-a", true), member("b", "run-b", true)],
        );
        let context = runner.run(&set, &BTreeMap::new(), Context::new()).unwrap();

        assert_eq!(executor.lines.borrow().as_slice(), ["fail-a"]);
        assert!(context.has_errors());
    }

    #[test]
    fn test_continue_on_error() {
        let executor = RecordingExecutor::default();
        let resolvers = ResolverRegistry::new();
        let config = Config::default();
        let runner = TaskRunner::new(&executor, &resolvers, &config);

        let set = Task::composite(
            "qa",
            "QA",
            &[],
            vec![member("a", "fail-a", false), member("b", "run-b", true)],
        );
        let context = runner.run(&set, &BTreeMap::new(), Context::new()).unwrap();

        assert_eq!(executor.lines.borrow().as_slice(), ["fail-a", "run-b"]);
        assert_eq!(context.exit_code(), 1);
    }

    #[test]
    fn test_earlier_errors_do_not_mask_success() {
        let executor = RecordingExecutor::default();
        let resolvers = ResolverRegistry::new();
        let config = Config::default();
        let runner = TaskRunner::new(&executor, &resolvers, &config);

        let mut previous = Context::new();
        previous.add_message("lint", Message::error("Command `lint` failed with exit code 1"));
        let start = previous.messages.len();

        let task = Task::leaf("lint", "Lint", Command::local_cli("lint"));
        let context = runner.run(&task, &BTreeMap::new(), previous).unwrap();

        let last = context.messages.last().unwrap();
        assert_eq!(last.message.to_string(), "Success: Task lint finished");
        assert!(context.has_errors());
        assert_eq!(context.exit_code_since(start), 0);
    }
}
