//! Workflow governance.
//!
//! Projects move through named workflows, sequences of permitted state
//! transitions. This module contains:
//! - the persisted instance and transition records
//! - state machine engines built from YAML definitions
//! - stores for instances and history
//! - [`ProjectWorkflow`], the per-project lifecycle service
//! - [`run_workflow`], which drives a workflow to completion

mod engine;
mod model;
mod runner;
mod service;
mod store;

pub use engine::{
    EngineKind, NotEnabled, SingleStateMachine, StateMachine, TransitionDefinition,
    WorkflowDefinition, WorkflowNet, WorkflowRegistry, MARKING_BLOCKER,
};
pub use model::{Marking, TransitionState, Workflow, WorkflowTransition};
pub use runner::{run_workflow, MAX_STEPS};
pub use service::ProjectWorkflow;
pub use store::{JsonWorkflowStore, MemoryWorkflowStore, ProjectLocks, StoreData, WorkflowStore};
