//! Per-project workflow governance.
//!
//! [`ProjectWorkflow`] binds a project to one active workflow instance and
//! mediates every lifecycle operation on it: initialization, restart,
//! transition application and history lookups.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::engine::{StateMachine, WorkflowRegistry};
use super::model::{Workflow, WorkflowTransition};
use super::store::{ProjectLocks, WorkflowStore};
use crate::core::{Context, Error, Message, ProjectSettings, Result};

/// The instance currently bound to the service and its engine.
struct Active {
    workflow: Workflow,
    machine: Arc<dyn StateMachine>,
}

/// Workflow lifecycle of a single project.
pub struct ProjectWorkflow<S> {
    settings: ProjectSettings,
    registry: WorkflowRegistry,
    store: S,
    locks: Arc<ProjectLocks>,
    active: Option<Active>,
}

impl<S> std::fmt::Debug for ProjectWorkflow<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectWorkflow")
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .field("active", &self.active.as_ref().map(|a| &a.workflow))
            .finish_non_exhaustive()
    }
}

impl<S: WorkflowStore> ProjectWorkflow<S> {
    /// Create a service for `settings`, using the process wide lock table.
    pub fn new(settings: ProjectSettings, registry: WorkflowRegistry, store: S) -> Self {
        Self { settings, registry, store, locks: ProjectLocks::global(), active: None }
    }

    /// Use a specific lock table.
    #[must_use]
    pub fn with_locks(mut self, locks: Arc<ProjectLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The active workflow instance, if any.
    pub fn active(&self) -> Option<&Workflow> {
        self.active.as_ref().map(|a| &a.workflow)
    }

    fn project_key(&self) -> Result<String> {
        self.settings.project_key().map(str::to_string).ok_or_else(Error::project_not_initialized)
    }

    /// Run `operation` as one read-modify-flush sequence.
    ///
    /// Holds the project lock and the store's own lock, starts from freshly
    /// loaded state and flushes only when `operation` succeeds.
    fn locked<T>(
        &mut self,
        project: &str,
        operation: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let lock = self.locks.for_project(project);
        let _guard = lock.lock();

        match self.reload_active(project).and_then(|()| operation(self)) {
            Ok(value) => {
                self.store.flush()?;
                Ok(value)
            }
            Err(e) => {
                self.store.release();
                Err(e)
            }
        }
    }

    /// Reload the store and rebind the active instance to its stored state.
    ///
    /// A root instance replaced by a restart elsewhere is followed by its
    /// definition name.
    fn reload_active(&mut self, project: &str) -> Result<()> {
        self.store.reload()?;

        let Some((id, code, root)) = self
            .active
            .as_ref()
            .map(|a| (a.workflow.id, a.workflow.code.clone(), a.workflow.is_root()))
        else {
            return Ok(());
        };

        let current = match self.store.find_by_id(id)? {
            Some(workflow) => Some(workflow),
            None if root => self.store.find_workflow(project, Some(&code))?,
            None => None,
        };

        match current {
            Some(workflow) => {
                if let Some(active) = self.active.as_mut() {
                    active.workflow = workflow;
                }
            }
            None => {
                tracing::debug!(project, workflow = code, %id, "Active workflow was removed");
                self.active = None;
            }
        }
        Ok(())
    }

    /// Workflows the project is configured to use.
    pub fn project_workflows(&self) -> &[String] {
        &self.settings.workflows
    }

    /// Bind the project to a workflow instance.
    ///
    /// Returns `Ok(true)` when an instance is active afterwards. A new root
    /// instance is only created when `name` is given, the project has no
    /// configured workflows and `name` is a known definition.
    pub fn initialize(&mut self, name: Option<&str>) -> Result<bool> {
        let project = self.project_key()?;

        if let Some(ref active) = self.active {
            if name.map_or(true, |n| active.workflow.code == n) {
                return Ok(true);
            }
        }

        self.locked(&project, |this| this.bind(&project, name))
    }

    fn bind(&mut self, project: &str, name: Option<&str>) -> Result<bool> {
        let workflow = match self.store.find_workflow(project, name)? {
            Some(workflow) => workflow,
            None => {
                let Some(name) = name else {
                    return Ok(false);
                };
                if !self.settings.workflows.is_empty() || !self.registry.contains(name) {
                    tracing::debug!(project, workflow = name, "Workflow cannot be created");
                    return Ok(false);
                }

                let workflow = self.store.save(Workflow::new(project, name))?;
                tracing::info!(project, workflow = name, id = %workflow.id, "Created workflow");
                workflow
            }
        };

        let machine = self.registry.get(&workflow)?;
        self.active = Some(Active { workflow, machine });
        Ok(true)
    }

    /// Replace the active root instance with a fresh one.
    pub fn restart(&mut self) -> Result<bool> {
        let active = self.active.as_ref().ok_or_else(Error::workflow_not_initialized)?;
        if active.workflow.parent.is_some() {
            return Err(Error::RestartForbidden);
        }

        let project = active.workflow.project.clone();
        self.locked(&project, |this| {
            let active = this.active.as_ref().ok_or_else(Error::workflow_not_initialized)?;
            let removed = this.store.remove(&active.workflow)?;
            let workflow = this.store.save(Workflow::new(removed.project, removed.code))?;

            tracing::info!(
                project = workflow.project,
                workflow = workflow.code,
                id = %workflow.id,
                "Restarted workflow"
            );

            let machine = this.registry.get(&workflow)?;
            this.active = Some(Active { workflow, machine });
            Ok(true)
        })
    }

    /// Apply `transition` to the active instance.
    ///
    /// A blocked transition leaves the marking unchanged and adds one error
    /// message per blocker, keyed by the transition name. Without an active
    /// instance the context is returned untouched.
    pub fn apply_transition(&mut self, transition: &str, context: Context) -> Result<Context> {
        let Some(project) = self.active.as_ref().map(|a| a.workflow.project.clone()) else {
            return Ok(context);
        };

        self.locked(&project, |this| this.fire(transition, context))
    }

    fn fire(&mut self, transition: &str, mut context: Context) -> Result<Context> {
        let Some(active) = self.active.as_mut() else {
            return Ok(context);
        };

        let blockers = active.machine.blockers(&active.workflow, transition, &context);
        if blockers.is_empty() {
            let mut record = WorkflowTransition::running(&active.workflow, transition)
                .with_data(serde_json::to_value(&context.data)?);
            self.store.save_transition(record.clone())?;

            let mut workflow = active.workflow.clone();
            match active.machine.apply(&mut workflow, transition, &context) {
                Ok(()) => {
                    active.workflow = self.store.save(workflow)?;
                    record.finish();
                    self.store.save_transition(record)?;
                    tracing::info!(
                        workflow = active.workflow.code,
                        transition,
                        marking = ?active.workflow.marked_places(),
                        "Transition applied"
                    );
                }
                Err(not_enabled) => {
                    for blocker in not_enabled.blockers {
                        context.add_message(transition, Message::error(blocker));
                    }
                }
            }
        } else {
            tracing::debug!(transition, ?blockers, "Transition blocked");
            for blocker in blockers {
                context.add_message(transition, Message::error(blocker));
            }
        }

        Ok(context)
    }

    fn target<'a>(&'a self, workflow: Option<&'a Workflow>) -> Result<&'a Workflow> {
        workflow.or_else(|| self.active()).ok_or_else(Error::workflow_not_initialized)
    }

    /// The last transition of `workflow` (or the active one) if still running.
    pub fn running_transition(
        &self,
        workflow: Option<&Workflow>,
    ) -> Result<Option<WorkflowTransition>> {
        let workflow = self.target(workflow)?;
        Ok(self.store.last_transition(workflow)?.filter(|t| !t.is_finished()))
    }

    /// The last transition of `workflow` (or the active one) if finished.
    pub fn previous_transition(
        &self,
        workflow: Option<&Workflow>,
    ) -> Result<Option<WorkflowTransition>> {
        let workflow = self.target(workflow)?;
        Ok(self.store.last_transition(workflow)?.filter(WorkflowTransition::is_finished))
    }

    /// Whether `workflow` (or the active one) has no enabled transitions left.
    pub fn is_finished(&self, workflow: Option<&Workflow>) -> Result<bool> {
        let workflow = self.target(workflow)?;
        let machine = self.registry.get(workflow)?;
        Ok(machine.enabled_transitions(workflow).is_empty())
    }

    /// Transitions the active instance can take next.
    pub fn next_enabled_transitions(&self) -> Vec<String> {
        self.active
            .as_ref()
            .map(|a| a.machine.enabled_transitions(&a.workflow))
            .unwrap_or_default()
    }

    /// Every known workflow definition.
    pub fn all(&self) -> Vec<String> {
        self.registry.all()
    }

    /// Whether the project has any workflow instance.
    pub fn has_workflow(&self) -> Result<bool> {
        self.store.has_workflow(&self.project_key()?)
    }

    /// Definition names of the project's root instances.
    pub fn initialized_workflows(&self) -> Result<Vec<String>> {
        Ok(self.store.workflows(&self.project_key()?)?.into_iter().map(|w| w.code).collect())
    }

    /// Metadata of the active workflow definition.
    pub fn workflow_metadata(&self) -> BTreeMap<String, serde_json::Value> {
        self.active.as_ref().map(|a| a.machine.metadata().clone()).unwrap_or_default()
    }

    /// Task ids bound to transitions of the active definition.
    ///
    /// A transition binds a task through its `task` metadata entry.
    pub fn task_bindings(&self) -> BTreeMap<String, Vec<String>> {
        let mut bindings: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let Some(ref active) = self.active else {
            return bindings;
        };

        for (transition, definition) in &active.machine.definition().transitions {
            if let Some(task) = definition.metadata.get("task").and_then(|t| t.as_str()) {
                bindings.entry(task.to_string()).or_default().push(transition.clone());
            }
        }
        bindings
    }

    /// Metadata of a transition of the active workflow definition.
    pub fn transition_metadata(&self, transition: &str) -> BTreeMap<String, serde_json::Value> {
        self.active
            .as_ref()
            .and_then(|a| a.machine.transition_metadata(transition).cloned())
            .unwrap_or_default()
    }
}
