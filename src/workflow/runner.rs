//! Drives a workflow to completion.
//!
//! Each step takes the first enabled transition, runs the task bound to it
//! (if any) and applies the transition. The run stops on the first failure,
//! when a transition is blocked, or when the workflow is finished.

use std::collections::BTreeMap;

use super::service::ProjectWorkflow;
use super::store::WorkflowStore;
use crate::core::{CommandExecutor, Context, Message, Result, Verbosity};
use crate::task::{TaskRepository, TaskRunner};

/// Upper bound on transitions applied in one run.
pub const MAX_STEPS: usize = 64;

fn error_count(context: &Context) -> usize {
    context.messages.iter().filter(|m| m.message.verbosity == Verbosity::Error).count()
}

/// Run workflow `name` for the project.
pub fn run_workflow<S, E>(
    workflow: &mut ProjectWorkflow<S>,
    name: &str,
    tasks: &dyn TaskRepository,
    runner: &TaskRunner<'_, E>,
    mut context: Context,
) -> Result<Context>
where
    S: WorkflowStore,
    E: CommandExecutor,
{
    if !workflow.initialize(Some(name))? {
        context.add_message(
            name,
            Message::error(format!(
                "Workflow \"{name}\" is not initialized and cannot be started for this project"
            )),
        );
        return Ok(context);
    }

    for _ in 0..MAX_STEPS {
        let Some(transition) = workflow.next_enabled_transitions().into_iter().next() else {
            context.add_message(name, Message::success(format!("Workflow \"{name}\" is finished")));
            return Ok(context);
        };

        let errors = error_count(&context);
        let task_id = workflow
            .transition_metadata(&transition)
            .get("task")
            .and_then(|t| t.as_str().map(str::to_string));

        if let Some(ref task_id) = task_id {
            let task = tasks.get(task_id, &context.tags)?;
            context = runner.run(&task, &BTreeMap::new(), context)?;
            if error_count(&context) > errors {
                return Ok(context);
            }
        }

        if context.dry_run {
            context.add_message(
                &transition,
                Message::info(format!("Would apply transition \"{transition}\"")),
            );
            return Ok(context);
        }

        context = workflow.apply_transition(&transition, context)?;
        if error_count(&context) > errors {
            return Ok(context);
        }
        let applied = format!("Applied transition \"{transition}\"");
        context.add_message(&transition, Message::info(applied));
    }

    tracing::warn!(workflow = name, steps = MAX_STEPS, "Workflow run did not finish");
    context.add_message(
        name,
        Message::error(format!("Workflow \"{name}\" did not finish after {MAX_STEPS} transitions")),
    );
    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Config, ExecutionResult, ProjectSettings};
    use crate::task::{Command, ResolverRegistry, Task, TaskYamlRepository};
    use crate::workflow::{MemoryWorkflowStore, WorkflowDefinition, WorkflowRegistry};
    use std::cell::RefCell;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct Recorder {
        lines: RefCell<Vec<String>>,
    }

    impl CommandExecutor for &Recorder {
        fn execute(&self, command_line: &str) -> Result<ExecutionResult> {
            self.lines.borrow_mut().push(command_line.to_string());
            Ok(ExecutionResult {
                code: Some(i32::from(command_line.contains("fail"))),
                stdout: None,
                stderr: None,
                duration: Duration::ZERO,
            })
        }
    }

    fn project(yaml: &str) -> ProjectWorkflow<MemoryWorkflowStore> {
        let registry =
            WorkflowRegistry::new().with_definition(WorkflowDefinition::from_yaml(yaml).unwrap());
        ProjectWorkflow::new(ProjectSettings::new("P1"), registry, MemoryWorkflowStore::new())
    }

    fn repository(tasks: &[Task]) -> (TempDir, TaskYamlRepository) {
        let dir = tempdir().unwrap();
        let repository = TaskYamlRepository::new(vec![dir.path().to_path_buf()]);
        (dir, tasks.iter().cloned().fold(repository, TaskYamlRepository::with_task))
    }

    const FLOW: &str = r"
name: flow
initial_marking: start
places: [start, built, done]
transitions:
  build: { from: start, to: built, metadata: { task: build } }
  finish: { from: built, to: done }
";

    #[test]
    fn test_runs_to_completion() {
        let mut workflow = project(FLOW);
        let (_dir, tasks) = repository(&[Task::leaf("build", "Build", Command::local_cli("make"))]);
        let recorder = Recorder::default();
        let resolvers = ResolverRegistry::new();
        let config = Config::default();
        let runner = TaskRunner::new(&recorder, &resolvers, &config);

        let context = run_workflow(&mut workflow, "flow", &tasks, &runner, Context::new()).unwrap();

        assert_eq!(recorder.lines.borrow().as_slice(), ["make"]);
        assert!(!context.has_errors());
        assert!(workflow.is_finished(None).unwrap());
    }

    #[test]
    fn test_stops_on_task_failure() {
        let mut workflow = project(FLOW);
        let (_dir, tasks) = repository(&[Task::leaf("build", "Build", Command::local_cli("fail"))]);
        let recorder = Recorder::default();
        let resolvers = ResolverRegistry::new();
        let config = Config::default();
        let runner = TaskRunner::new(&recorder, &resolvers, &config);

        let context = run_workflow(&mut workflow, "flow", &tasks, &runner, Context::new()).unwrap();

        assert!(context.has_errors());
        assert_eq!(workflow.next_enabled_transitions(), vec!["build"]);
    }

    #[test]
    fn test_unknown_workflow_reports_error() {
        let mut workflow = project(FLOW);
        let (_dir, tasks) = repository(&[]);
        let recorder = Recorder::default();
        let resolvers = ResolverRegistry::new();
        let config = Config::default();
        let runner = TaskRunner::new(&recorder, &resolvers, &config);

        let context = run_workflow(&mut workflow, "other", &tasks, &runner, Context::new()).unwrap();
        assert_eq!(context.messages_for("other").count(), 1);
        assert!(context.has_errors());
    }

    #[test]
    fn test_dry_run_applies_nothing() {
        let mut workflow = project(FLOW);
        let (_dir, tasks) = repository(&[Task::leaf("build", "Build", Command::local_cli("make"))]);
        let recorder = Recorder::default();
        let resolvers = ResolverRegistry::new();
        let config = Config::default();
        let runner = TaskRunner::new(&recorder, &resolvers, &config);

        let context = run_workflow(
            &mut workflow,
            "flow",
            &tasks,
            &runner,
            Context::new().with_dry_run(true),
        )
        .unwrap();

        assert!(recorder.lines.borrow().is_empty());
        assert!(!context.has_errors());
        assert_eq!(workflow.next_enabled_transitions(), vec!["build"]);
    }
}
