//! Persisted workflow instances and transition history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Place name to token count.
pub type Marking = BTreeMap<String, u32>;

/// A workflow instance bound to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique instance id
    pub id: Uuid,

    /// Project key
    pub project: String,

    /// Name of the workflow definition
    pub code: String,

    /// Parent instance, `None` for roots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Uuid>,

    /// Current marking, empty until the first transition is applied
    #[serde(default)]
    pub values: Marking,

    /// When the instance was created
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    /// Create a root instance.
    pub fn new(project: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project: project.into(),
            code: code.into(),
            parent: None,
            values: Marking::new(),
            created_at: Utc::now(),
        }
    }

    /// Create a child instance of `parent` running definition `code`.
    pub fn child_of(parent: &Workflow, code: impl Into<String>) -> Self {
        Self { parent: Some(parent.id), ..Self::new(parent.project.clone(), code) }
    }

    /// Whether this is a root instance.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Marked places, in name order.
    pub fn marked_places(&self) -> Vec<&str> {
        self.values.iter().filter(|(_, n)| **n > 0).map(|(p, _)| p.as_str()).collect()
    }
}

/// Lifecycle state of a transition record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionState {
    Running,
    Finished,
}

/// A record of a transition applied to a workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTransition {
    /// Unique record id
    pub id: Uuid,

    /// Instance the transition was applied to
    pub workflow: Uuid,

    /// Transition name
    pub transition: String,

    /// Record state
    pub state: TransitionState,

    /// Opaque data captured with the transition
    #[serde(default)]
    pub data: serde_json::Value,

    /// When the record was created
    pub created_at: DateTime<Utc>,
}

impl WorkflowTransition {
    /// Create a running record.
    pub fn running(workflow: &Workflow, transition: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow: workflow.id,
            transition: transition.into(),
            state: TransitionState::Running,
            data: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Attach data to the record.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Mark the record finished.
    pub fn finish(&mut self) {
        self.state = TransitionState::Finished;
    }

    /// Whether the record is finished.
    pub fn is_finished(&self) -> bool {
        self.state == TransitionState::Finished
    }
}
