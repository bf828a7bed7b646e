//! Workflow definitions and the engines that evaluate them.
//!
//! A definition is loaded from YAML and turned into a [`StateMachine`]
//! according to its `type`:
//!
//! - `state_machine` - exactly one place is marked at a time
//! - `workflow` - a net where several places can be marked at once
//!
//! Transitions may carry a `guard` mapping context keys to expected values.
//! A transition that is not enabled reports blockers instead of failing.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use walkdir::WalkDir;

use super::model::{Marking, Workflow};
use crate::core::{Context, Error, Result};

/// Blocker reported when the marking does not enable a transition.
pub const MARKING_BLOCKER: &str = "The marking does not enable the transition.";

/// Kind of engine a definition runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    #[default]
    StateMachine,
    Workflow,
}

/// A workflow definition as written in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Definition name, referenced by workflow instances
    pub name: String,

    /// Engine kind
    #[serde(rename = "type", default)]
    pub kind: EngineKind,

    /// Places marked when an instance starts
    #[serde(deserialize_with = "one_or_many")]
    pub initial_marking: Vec<String>,

    /// All places
    pub places: Vec<String>,

    /// Free form metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Transitions in declaration order
    #[serde(default)]
    pub transitions: IndexMap<String, TransitionDefinition>,
}

/// A single transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionDefinition {
    /// Places that must be marked
    #[serde(deserialize_with = "one_or_many")]
    pub from: Vec<String>,

    /// Places marked afterwards
    #[serde(deserialize_with = "one_or_many")]
    pub to: Vec<String>,

    /// Context values required to apply the transition
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub guard: BTreeMap<String, serde_json::Value>,

    /// Free form metadata, `task` binds the transition to a task id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Accept either `from: start` or `from: [start, other]`.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

impl WorkflowDefinition {
    /// Parse a definition from YAML.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let definition: Self = serde_yaml::from_str(content)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Check places and transitions for consistency.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidDefinition { name: self.name.clone(), reason };

        if self.name.trim().is_empty() {
            return Err(invalid("name cannot be empty".to_string()));
        }
        if self.places.is_empty() {
            return Err(invalid("at least one place is required".to_string()));
        }

        let places: BTreeSet<&str> = self.places.iter().map(String::as_str).collect();
        let unknown = |list: &[String]| list.iter().find(|p| !places.contains(p.as_str())).cloned();

        if let Some(place) = unknown(&self.initial_marking) {
            return Err(invalid(format!("initial marking uses unknown place '{place}'")));
        }
        if self.kind == EngineKind::StateMachine && self.initial_marking.len() != 1 {
            return Err(invalid("a state machine starts in exactly one place".to_string()));
        }

        for (name, transition) in &self.transitions {
            if transition.from.is_empty() || transition.to.is_empty() {
                return Err(invalid(format!("transition '{name}' needs from and to places")));
            }
            if let Some(place) = unknown(&transition.from).or_else(|| unknown(&transition.to)) {
                return Err(invalid(format!("transition '{name}' uses unknown place '{place}'")));
            }
            if self.kind == EngineKind::StateMachine && transition.to.len() != 1 {
                return Err(invalid(format!("transition '{name}' must lead to exactly one place")));
            }
        }

        Ok(())
    }

    /// Marking of a fresh instance.
    pub fn initial(&self) -> Marking {
        self.initial_marking.iter().map(|p| (p.clone(), 1)).collect()
    }

    /// Current marking of `workflow`, falling back to the initial marking.
    pub fn marking_of(&self, workflow: &Workflow) -> Marking {
        if workflow.values.values().any(|n| *n > 0) {
            workflow.values.clone()
        } else {
            self.initial()
        }
    }
}

/// A transition could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotEnabled {
    /// Transition name
    pub transition: String,

    /// Human readable reasons
    pub blockers: Vec<String>,
}

/// Engine evaluating one workflow definition.
pub trait StateMachine: Send + Sync {
    /// The definition being evaluated.
    fn definition(&self) -> &WorkflowDefinition;

    /// Whether the marking enables `transition`.
    fn marking_enables(&self, marking: &Marking, transition: &TransitionDefinition) -> bool;

    /// Marking after firing `transition`.
    fn fire(&self, marking: Marking, transition: &TransitionDefinition) -> Marking;

    /// Definition name.
    fn name(&self) -> &str {
        &self.definition().name
    }

    /// Engine kind.
    fn kind(&self) -> EngineKind {
        self.definition().kind
    }

    /// Names of transitions the current marking enables, in declaration order.
    ///
    /// Guards are only evaluated when a transition is applied.
    fn enabled_transitions(&self, workflow: &Workflow) -> Vec<String> {
        let marking = self.definition().marking_of(workflow);
        self.definition()
            .transitions
            .iter()
            .filter(|(_, t)| self.marking_enables(&marking, t))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Reasons why `transition` cannot be applied right now.
    fn blockers(&self, workflow: &Workflow, transition: &str, context: &Context) -> Vec<String> {
        let Some(definition) = self.definition().transitions.get(transition) else {
            return vec![format!(
                "Transition \"{transition}\" is not defined for workflow \"{}\".",
                self.name()
            )];
        };

        if !self.marking_enables(&self.definition().marking_of(workflow), definition) {
            return vec![MARKING_BLOCKER.to_string()];
        }

        definition
            .guard
            .iter()
            .filter(|(key, expected)| context.get(key) != Some(*expected))
            .map(|(key, expected)| format!("\"{key}\" must be {expected} to apply \"{transition}\""))
            .collect()
    }

    /// Apply `transition` to `workflow`, updating its marking.
    fn apply(
        &self,
        workflow: &mut Workflow,
        transition: &str,
        context: &Context,
    ) -> std::result::Result<(), NotEnabled> {
        let blockers = self.blockers(workflow, transition, context);
        let definition = match self.definition().transitions.get(transition) {
            Some(definition) if blockers.is_empty() => definition,
            _ => return Err(NotEnabled { transition: transition.to_string(), blockers }),
        };

        let marking = self.definition().marking_of(workflow);
        workflow.values = self.fire(marking, definition);
        tracing::debug!(
            workflow = self.name(),
            transition,
            marking = ?workflow.marked_places(),
            "Applied transition"
        );
        Ok(())
    }

    /// Workflow level metadata.
    fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.definition().metadata
    }

    /// Metadata of a single transition.
    fn transition_metadata(&self, transition: &str) -> Option<&BTreeMap<String, serde_json::Value>> {
        self.definition().transitions.get(transition).map(|t| &t.metadata)
    }
}

/// Engine where exactly one place is marked.
#[derive(Debug, Clone)]
pub struct SingleStateMachine {
    definition: WorkflowDefinition,
}

impl SingleStateMachine {
    /// Create an engine for `definition`.
    pub fn new(definition: WorkflowDefinition) -> Self {
        Self { definition }
    }
}

impl StateMachine for SingleStateMachine {
    fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    fn marking_enables(&self, marking: &Marking, transition: &TransitionDefinition) -> bool {
        transition.from.iter().any(|p| marking.get(p).copied().unwrap_or(0) > 0)
    }

    fn fire(&self, _marking: Marking, transition: &TransitionDefinition) -> Marking {
        transition.to.iter().take(1).map(|p| (p.clone(), 1)).collect()
    }
}

/// Engine where several places may be marked at once.
#[derive(Debug, Clone)]
pub struct WorkflowNet {
    definition: WorkflowDefinition,
}

impl WorkflowNet {
    /// Create an engine for `definition`.
    pub fn new(definition: WorkflowDefinition) -> Self {
        Self { definition }
    }
}

impl StateMachine for WorkflowNet {
    fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    fn marking_enables(&self, marking: &Marking, transition: &TransitionDefinition) -> bool {
        transition.from.iter().all(|p| marking.get(p).copied().unwrap_or(0) > 0)
    }

    fn fire(&self, mut marking: Marking, transition: &TransitionDefinition) -> Marking {
        for place in &transition.from {
            marking.remove(place);
        }
        for place in &transition.to {
            marking.insert(place.clone(), 1);
        }
        marking
    }
}

/// Known workflow definitions.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    machines: IndexMap<String, Arc<dyn StateMachine>>,
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry").field("workflows", &self.all()).finish()
    }
}

impl WorkflowRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every definition found in `dirs`.
    ///
    /// Directories that do not exist are skipped.
    pub fn load(dirs: &[PathBuf]) -> Result<Self> {
        let mut registry = Self::new();

        let mut paths = Vec::new();
        for dir in dirs {
            if !dir.is_dir() {
                tracing::debug!(dir = ?dir, "Skipping missing workflow directory");
                continue;
            }
            for entry in WalkDir::new(dir).follow_links(true) {
                let entry = entry.map_err(|e| Error::Io(e.into()))?;
                let path = entry.path();
                if entry.file_type().is_file()
                    && path.extension().map_or(false, |e| e == "yaml" || e == "yml")
                {
                    paths.push(path.to_path_buf());
                }
            }
        }
        paths.sort();

        for path in paths {
            registry.register(load_definition(&path)?);
        }

        Ok(registry)
    }

    /// Register a definition, replacing one with the same name.
    pub fn register(&mut self, definition: WorkflowDefinition) {
        let machine: Arc<dyn StateMachine> = match definition.kind {
            EngineKind::StateMachine => Arc::new(SingleStateMachine::new(definition)),
            EngineKind::Workflow => Arc::new(WorkflowNet::new(definition)),
        };
        if self.machines.insert(machine.name().to_string(), Arc::clone(&machine)).is_some() {
            tracing::warn!(workflow = machine.name(), "Workflow definition replaced");
        }
    }

    /// Builder form of [`WorkflowRegistry::register`].
    #[must_use]
    pub fn with_definition(mut self, definition: WorkflowDefinition) -> Self {
        self.register(definition);
        self
    }

    /// Engine for the instance's definition.
    pub fn get(&self, workflow: &Workflow) -> Result<Arc<dyn StateMachine>> {
        self.by_name(&workflow.code)
    }

    /// Engine for a definition name.
    pub fn by_name(&self, name: &str) -> Result<Arc<dyn StateMachine>> {
        self.machines.get(name).cloned().ok_or_else(|| {
            Error::Configuration(format!("Unable to find a workflow definition named '{name}'"))
        })
    }

    /// Whether a definition exists.
    pub fn contains(&self, name: &str) -> bool {
        self.machines.contains_key(name)
    }

    /// Every definition name, in load order.
    pub fn all(&self) -> Vec<String> {
        self.machines.keys().cloned().collect()
    }
}

fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)?;
    WorkflowDefinition::from_yaml(&content).map_err(|e| match e {
        Error::Yaml(err) => {
            Error::InvalidDefinition { name: path.display().to_string(), reason: err.to_string() }
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    const RELEASE: &str = r"
name: release
type: state_machine
initial_marking: start
places: [start, built, done]
metadata:
  description: Release flow
transitions:
  build:
    from: start
    to: built
    metadata: { task: build }
  deploy:
    from: [built]
    to: [done]
    guard: { approved: true }
";

    const REVIEW: &str = r"
name: review
type: workflow
initial_marking: [draft]
places: [draft, checked, reviewed, merged]
transitions:
  start: { from: draft, to: [checked, reviewed] }
  merge: { from: [checked, reviewed], to: merged }
";

    fn release() -> Arc<dyn StateMachine> {
        WorkflowRegistry::new()
            .with_definition(WorkflowDefinition::from_yaml(RELEASE).unwrap())
            .by_name("release")
            .unwrap()
    }

    #[test]
    fn test_initial_enabled_transitions() {
        let machine = release();
        let workflow = Workflow::new("P1", "release");

        assert_eq!(machine.kind(), EngineKind::StateMachine);
        assert_eq!(machine.enabled_transitions(&workflow), vec!["build"]);
        assert_eq!(machine.transition_metadata("build").unwrap()["task"], json!("build"));
        assert_eq!(machine.metadata()["description"], json!("Release flow"));
    }

    #[test]
    fn test_apply_moves_marking() {
        let machine = release();
        let mut workflow = Workflow::new("P1", "release");

        machine.apply(&mut workflow, "build", &Context::new()).unwrap();
        assert_eq!(workflow.marked_places(), vec!["built"]);
        assert_eq!(machine.enabled_transitions(&workflow), vec!["deploy"]);
    }

    #[test]
    fn test_marking_blocker() {
        let machine = release();
        let mut workflow = Workflow::new("P1", "release");

        let err = machine.apply(&mut workflow, "deploy", &Context::new()).unwrap_err();
        assert_eq!(err.blockers, vec![MARKING_BLOCKER.to_string()]);
        assert!(workflow.values.is_empty());
    }

    #[test]
    fn test_guard_blocker() {
        let machine = release();
        let mut workflow = Workflow::new("P1", "release");
        machine.apply(&mut workflow, "build", &Context::new()).unwrap();

        let err = machine.apply(&mut workflow, "deploy", &Context::new()).unwrap_err();
        assert_eq!(err.blockers, vec!["\"approved\" must be true to apply \"deploy\"".to_string()]);
        assert_eq!(workflow.marked_places(), vec!["built"]);

        let mut context = Context::new();
        context.set("approved", true);
        machine.apply(&mut workflow, "deploy", &context).unwrap();
        assert!(machine.enabled_transitions(&workflow).is_empty());
    }

    #[test]
    fn test_unknown_transition_is_blocked() {
        let machine = release();
        let mut workflow = Workflow::new("P1", "release");

        let err = machine.apply(&mut workflow, "nope", &Context::new()).unwrap_err();
        assert_eq!(err.blockers.len(), 1);
    }

    #[test]
    fn test_workflow_net_needs_all_places() {
        let registry =
            WorkflowRegistry::new().with_definition(WorkflowDefinition::from_yaml(REVIEW).unwrap());
        let machine = registry.by_name("review").unwrap();
        let mut workflow = Workflow::new("P1", "review");

        machine.apply(&mut workflow, "start", &Context::new()).unwrap();
        assert_eq!(workflow.marked_places(), vec!["checked", "reviewed"]);
        assert_eq!(machine.enabled_transitions(&workflow), vec!["merge"]);

        workflow.values.remove("reviewed");
        assert!(machine.enabled_transitions(&workflow).is_empty());
    }

    #[test]
    fn test_invalid_definitions() {
        let unknown_place = "name: x\nplaces: [a]\ninitial_marking: b\n";
        assert!(matches!(
            WorkflowDefinition::from_yaml(unknown_place),
            Err(Error::InvalidDefinition { .. })
        ));

        let split = "name: x\nplaces: [a, b, c]\ninitial_marking: a\ntransitions:\n  t: { from: a, to: [b, c] }\n";
        assert!(WorkflowDefinition::from_yaml(split).is_err());
    }

    #[test]
    fn test_load_from_dirs() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("release.yaml"), RELEASE).unwrap();
        std::fs::write(dir.path().join("review.yml"), REVIEW).unwrap();

        let registry =
            WorkflowRegistry::load(&[dir.path().to_path_buf(), PathBuf::from("/missing")]).unwrap();
        assert_eq!(registry.all(), vec!["release", "review"]);
        assert!(registry.contains("release"));
        assert!(registry.by_name("other").is_err());
    }
}
