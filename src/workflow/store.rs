//! Persistence of workflow instances and their transition history.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs4::fs_std::FileExt;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::{Workflow, WorkflowTransition};
use crate::core::{Config, Result};

/// Storage for workflow instances and transition records.
pub trait WorkflowStore {
    /// Root instance of `project`, for `code` if given.
    fn find_workflow(&self, project: &str, code: Option<&str>) -> Result<Option<Workflow>>;

    /// Instance with the given id, root or child.
    fn find_by_id(&self, id: Uuid) -> Result<Option<Workflow>>;

    /// Re-read the persisted state before a read-modify-flush sequence.
    ///
    /// Stores shared between processes take their exclusive lock here and
    /// hold it until [`WorkflowStore::flush`] or [`WorkflowStore::release`].
    fn reload(&mut self) -> Result<()> {
        Ok(())
    }

    /// End a sequence started by [`WorkflowStore::reload`] without writing.
    fn release(&mut self) {}

    /// Insert or update an instance.
    fn save(&mut self, workflow: Workflow) -> Result<Workflow>;

    /// Remove an instance together with its transitions and children.
    fn remove(&mut self, workflow: &Workflow) -> Result<Workflow>;

    /// Persist pending changes and end the current sequence.
    fn flush(&mut self) -> Result<()>;

    /// Root instances of `project`.
    fn workflows(&self, project: &str) -> Result<Vec<Workflow>>;

    /// Whether `project` has any instance.
    fn has_workflow(&self, project: &str) -> Result<bool>;

    /// Most recent transition record of `workflow`.
    fn last_transition(&self, workflow: &Workflow) -> Result<Option<WorkflowTransition>>;

    /// Insert or update a transition record.
    fn save_transition(&mut self, transition: WorkflowTransition) -> Result<()>;
}

/// Serialized store contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreData {
    /// Workflow instances
    pub workflows: Vec<Workflow>,

    /// Transition records in insertion order
    pub transitions: Vec<WorkflowTransition>,
}

impl StoreData {
    fn find_workflow(&self, project: &str, code: Option<&str>) -> Option<Workflow> {
        self.workflows
            .iter()
            .filter(|w| w.project == project && w.is_root())
            .find(|w| code.map_or(true, |c| w.code == c))
            .cloned()
    }

    fn find_by_id(&self, id: Uuid) -> Option<Workflow> {
        self.workflows.iter().find(|w| w.id == id).cloned()
    }

    fn save(&mut self, workflow: Workflow) -> Workflow {
        match self.workflows.iter_mut().find(|w| w.id == workflow.id) {
            Some(existing) => *existing = workflow.clone(),
            None => self.workflows.push(workflow.clone()),
        }
        workflow
    }

    fn remove(&mut self, workflow: &Workflow) -> Workflow {
        let mut doomed = vec![workflow.id];
        let mut index = 0;
        while index < doomed.len() {
            let id = doomed[index];
            doomed.extend(self.workflows.iter().filter(|w| w.parent == Some(id)).map(|w| w.id));
            index += 1;
        }

        self.workflows.retain(|w| !doomed.contains(&w.id));
        self.transitions.retain(|t| !doomed.contains(&t.workflow));
        workflow.clone()
    }

    fn workflows(&self, project: &str) -> Vec<Workflow> {
        self.workflows.iter().filter(|w| w.project == project && w.is_root()).cloned().collect()
    }

    fn has_workflow(&self, project: &str) -> bool {
        self.workflows.iter().any(|w| w.project == project)
    }

    fn last_transition(&self, workflow: &Workflow) -> Option<WorkflowTransition> {
        self.transitions.iter().rev().find(|t| t.workflow == workflow.id).cloned()
    }

    fn save_transition(&mut self, transition: WorkflowTransition) {
        match self.transitions.iter_mut().find(|t| t.id == transition.id) {
            Some(existing) => *existing = transition,
            None => self.transitions.push(transition),
        }
    }
}

/// Store keeping everything in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkflowStore {
    data: StoreData,
}

impl MemoryWorkflowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored data.
    pub fn data(&self) -> &StoreData {
        &self.data
    }
}

impl WorkflowStore for MemoryWorkflowStore {
    fn find_workflow(&self, project: &str, code: Option<&str>) -> Result<Option<Workflow>> {
        Ok(self.data.find_workflow(project, code))
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<Workflow>> {
        Ok(self.data.find_by_id(id))
    }

    fn save(&mut self, workflow: Workflow) -> Result<Workflow> {
        Ok(self.data.save(workflow))
    }

    fn remove(&mut self, workflow: &Workflow) -> Result<Workflow> {
        Ok(self.data.remove(workflow))
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn workflows(&self, project: &str) -> Result<Vec<Workflow>> {
        Ok(self.data.workflows(project))
    }

    fn has_workflow(&self, project: &str) -> Result<bool> {
        Ok(self.data.has_workflow(project))
    }

    fn last_transition(&self, workflow: &Workflow) -> Result<Option<WorkflowTransition>> {
        Ok(self.data.last_transition(workflow))
    }

    fn save_transition(&mut self, transition: WorkflowTransition) -> Result<()> {
        self.data.save_transition(transition);
        Ok(())
    }
}

/// Store backed by a JSON document.
///
/// Changes stay in memory until [`WorkflowStore::flush`], which replaces the
/// file atomically. [`WorkflowStore::reload`] takes an exclusive lock on a
/// `.lock` file next to the document, so processes sharing the document
/// serialize their read-modify-flush sequences.
#[derive(Debug)]
pub struct JsonWorkflowStore {
    path: PathBuf,
    data: StoreData,
    dirty: bool,
    lock: Option<File>,
}

impl JsonWorkflowStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = Self::read(&path)?;

        tracing::debug!(path = ?path, workflows = data.workflows.len(), "Opened workflow store");
        Ok(Self { path, data, dirty: false, lock: None })
    }

    /// Open the store at the configured path.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::open(config.store_path()?)
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of the lock file guarding the document.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(OsString::from).unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn read(path: &Path) -> Result<StoreData> {
        if !path.exists() {
            return Ok(StoreData::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn acquire(&mut self) -> Result<()> {
        if self.lock.is_some() {
            return Ok(());
        }

        fs::create_dir_all(self.parent_dir())?;
        let file =
            OpenOptions::new().create(true).write(true).truncate(false).open(self.lock_path())?;
        file.lock_exclusive()?;
        tracing::trace!(path = ?self.path, "Locked workflow store");
        self.lock = Some(file);
        Ok(())
    }

    fn write(&self) -> Result<()> {
        let parent = self.parent_dir();
        fs::create_dir_all(&parent)?;

        let mut file = tempfile::NamedTempFile::new_in(&parent)?;
        file.write_all(serde_json::to_string_pretty(&self.data)?.as_bytes())?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl WorkflowStore for JsonWorkflowStore {
    fn find_workflow(&self, project: &str, code: Option<&str>) -> Result<Option<Workflow>> {
        Ok(self.data.find_workflow(project, code))
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<Workflow>> {
        Ok(self.data.find_by_id(id))
    }

    fn reload(&mut self) -> Result<()> {
        self.acquire()?;
        self.data = Self::read(&self.path)?;
        self.dirty = false;
        Ok(())
    }

    fn release(&mut self) {
        // Pending changes are never written; the next reload replaces them.
        self.dirty = false;
        self.lock = None;
    }

    fn save(&mut self, workflow: Workflow) -> Result<Workflow> {
        self.dirty = true;
        Ok(self.data.save(workflow))
    }

    fn remove(&mut self, workflow: &Workflow) -> Result<Workflow> {
        self.dirty = true;
        Ok(self.data.remove(workflow))
    }

    fn flush(&mut self) -> Result<()> {
        // Held until the document has been replaced.
        let _lock = self.lock.take();
        if self.dirty {
            self.write()?;
            self.dirty = false;
            tracing::debug!(path = ?self.path, "Flushed workflow store");
        }
        Ok(())
    }

    fn workflows(&self, project: &str) -> Result<Vec<Workflow>> {
        Ok(self.data.workflows(project))
    }

    fn has_workflow(&self, project: &str) -> Result<bool> {
        Ok(self.data.has_workflow(project))
    }

    fn last_transition(&self, workflow: &Workflow) -> Result<Option<WorkflowTransition>> {
        Ok(self.data.last_transition(workflow))
    }

    fn save_transition(&mut self, transition: WorkflowTransition) -> Result<()> {
        self.dirty = true;
        self.data.save_transition(transition);
        Ok(())
    }
}

static GLOBAL_LOCKS: Lazy<Arc<ProjectLocks>> = Lazy::new(|| Arc::new(ProjectLocks::new()));

/// Table of per-project locks serializing read-modify-flush sequences.
#[derive(Debug, Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProjectLocks {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process wide table.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_LOCKS)
    }

    /// Lock for `project`, created on first use.
    pub fn for_project(&self, project: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(project.to_string()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_find_only_roots() {
        let mut store = MemoryWorkflowStore::new();
        let root = store.save(Workflow::new("P1", "release")).unwrap();
        store.save(Workflow::child_of(&root, "deploy")).unwrap();

        assert_eq!(store.find_workflow("P1", None).unwrap().unwrap().id, root.id);
        assert!(store.find_workflow("P1", Some("deploy")).unwrap().is_none());
        assert!(store.find_workflow("P2", None).unwrap().is_none());
        assert_eq!(store.workflows("P1").unwrap().len(), 1);
        assert!(store.has_workflow("P1").unwrap());
    }

    #[test]
    fn test_remove_cascades() {
        let mut store = MemoryWorkflowStore::new();
        let root = store.save(Workflow::new("P1", "release")).unwrap();
        let child = store.save(Workflow::child_of(&root, "deploy")).unwrap();
        store.save_transition(WorkflowTransition::running(&root, "build")).unwrap();
        store.save_transition(WorkflowTransition::running(&child, "ship")).unwrap();

        store.remove(&root).unwrap();
        assert!(store.data().workflows.is_empty());
        assert!(store.data().transitions.is_empty());
    }

    #[test]
    fn test_last_transition_and_update() {
        let mut store = MemoryWorkflowStore::new();
        let root = store.save(Workflow::new("P1", "release")).unwrap();

        let first = WorkflowTransition::running(&root, "build");
        store.save_transition(first).unwrap();
        let mut second = WorkflowTransition::running(&root, "deploy");
        store.save_transition(second.clone()).unwrap();
        second.finish();
        store.save_transition(second).unwrap();

        let last = store.last_transition(&root).unwrap().unwrap();
        assert_eq!(last.transition, "deploy");
        assert!(last.is_finished());
        assert_eq!(store.data().transitions.len(), 2);
    }

    #[test]
    fn test_json_store_flush_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("workflows.json");

        let mut store = JsonWorkflowStore::open(&path).unwrap();
        let root = store.save(Workflow::new("P1", "release")).unwrap();
        assert!(!path.exists());
        store.flush().unwrap();
        assert!(path.exists());

        let reopened = JsonWorkflowStore::open(&path).unwrap();
        assert_eq!(reopened.find_workflow("P1", Some("release")).unwrap().unwrap().id, root.id);
    }

    #[test]
    fn test_json_store_reload_sees_other_writers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("workflows.json");
        let mut first = JsonWorkflowStore::open(&path).unwrap();
        let mut second = JsonWorkflowStore::open(&path).unwrap();

        first.reload().unwrap();
        let root = first.save(Workflow::new("P1", "release")).unwrap();
        first.flush().unwrap();
        assert!(first.lock_path().exists());

        assert!(second.find_by_id(root.id).unwrap().is_none());
        second.reload().unwrap();
        assert_eq!(second.find_by_id(root.id).unwrap().unwrap().code, "release");
        second.save_transition(WorkflowTransition::running(&root, "build")).unwrap();
        second.flush().unwrap();

        // A stale snapshot must not overwrite the transition on its next write.
        first.reload().unwrap();
        first.save(Workflow::new("P1", "nightly")).unwrap();
        first.flush().unwrap();

        let reopened = JsonWorkflowStore::open(&path).unwrap();
        assert_eq!(reopened.workflows("P1").unwrap().len(), 2);
        assert!(reopened.last_transition(&root).unwrap().is_some());
    }

    #[test]
    fn test_json_store_release_discards_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("workflows.json");
        let mut store = JsonWorkflowStore::open(&path).unwrap();

        store.reload().unwrap();
        store.save(Workflow::new("P1", "release")).unwrap();
        store.release();
        store.flush().unwrap();
        assert!(!path.exists());

        // The lock was released, so another store can take it.
        let mut other = JsonWorkflowStore::open(&path).unwrap();
        other.reload().unwrap();
        assert!(!other.has_workflow("P1").unwrap());
        other.flush().unwrap();
    }

    #[test]
    fn test_project_locks_are_shared() {
        let locks = ProjectLocks::new();
        let a = locks.for_project("P1");
        let b = locks.for_project("P1");
        let c = locks.for_project("P2");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let _guard = a.lock();
        assert!(b.try_lock().is_none());
        assert!(c.try_lock().is_some());
    }
}
