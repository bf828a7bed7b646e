//! Task repository.
//!
//! Loads declarative task records and composes them into [`Task`] values.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use super::command::Command;
use super::definition::{discover_definitions, TaskDefinition, TaskType};
use super::model::{Task, TaskMember};
use crate::core::{Config, Error, Result};

/// Source of composed tasks.
pub trait TaskRepository {
    /// Every known task, composed with the requested tags.
    ///
    /// Tags filter the members of each task set; an empty set keeps every
    /// member.
    fn find_all(&self, tags: &BTreeSet<String>) -> Result<BTreeMap<String, Task>>;

    /// A single task, if it exists.
    fn find_by_id(&self, id: &str, tags: &BTreeSet<String>) -> Result<Option<Task>> {
        Ok(self.find_all(tags)?.remove(id))
    }

    /// A single task, failing when it does not exist.
    fn get(&self, id: &str, tags: &BTreeSet<String>) -> Result<Task> {
        self.find_by_id(id, tags)?.ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }
}

/// Repository reading task records from YAML files.
#[derive(Debug, Clone, Default)]
pub struct TaskYamlRepository {
    dirs: Vec<PathBuf>,
    prebuilt: Vec<Task>,
}

impl TaskYamlRepository {
    /// Create a repository scanning `dirs`.
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs, prebuilt: Vec::new() }
    }

    /// Create a repository for the configured task directories.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.task_dirs())
    }

    /// Add a pre-built task that overrides any declarative task of the same id.
    #[must_use]
    pub fn with_task(mut self, task: Task) -> Self {
        self.prebuilt.push(task);
        self
    }

    /// Configured task directories.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Load all records keyed by id.
    fn load_records(&self) -> Result<BTreeMap<String, TaskDefinition>> {
        if self.dirs.is_empty() {
            return Err(Error::Configuration("task dirs are not configured properly".to_string()));
        }
        if let Some(dir) = self.dirs.iter().find(|d| !d.is_dir()) {
            return Err(Error::Configuration(format!(
                "task dir '{}' is not a directory",
                dir.display()
            )));
        }

        let mut records = BTreeMap::new();
        let mut origins: HashMap<String, PathBuf> = HashMap::new();

        for (path, definition) in discover_definitions(&self.dirs)? {
            if let Some(previous) = origins.insert(definition.id.clone(), path.clone()) {
                tracing::warn!(
                    id = definition.id,
                    previous = ?previous,
                    current = ?path,
                    "Duplicate task id, the later file wins"
                );
            }
            records.insert(definition.id.clone(), definition);
        }

        Ok(records)
    }
}

impl TaskRepository for TaskYamlRepository {
    fn find_all(&self, tags: &BTreeSet<String>) -> Result<BTreeMap<String, Task>> {
        let records = self.load_records()?;
        check_membership(&records)?;

        let mut composer = Composer { records: &records, cache: HashMap::new() };
        let mut tasks = BTreeMap::new();
        for id in records.keys() {
            let task = composer.compose(id, tags)?;
            tasks.insert(id.clone(), task);
        }

        for task in &self.prebuilt {
            tasks.insert(task.id.clone(), task.clone());
        }

        tracing::debug!(count = tasks.len(), ?tags, "Composed tasks");
        Ok(tasks)
    }
}

/// Reject references to unknown tasks and membership cycles.
fn check_membership(records: &BTreeMap<String, TaskDefinition>) -> Result<()> {
    fn visit(
        id: &str,
        records: &BTreeMap<String, TaskDefinition>,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        if let Some(pos) = stack.iter().position(|s| s == id) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(id.to_string());
            return Err(Error::CycleDetected(cycle));
        }
        if !visited.insert(id.to_string()) {
            return Ok(());
        }

        let Some(record) = records.get(id) else {
            return Ok(());
        };

        stack.push(id.to_string());
        for member in &record.tasks {
            if !records.contains_key(&member.id) {
                return Err(Error::UnknownMember { set: id.to_string(), member: member.id.clone() });
            }
            visit(&member.id, records, visited, stack)?;
        }
        stack.pop();

        Ok(())
    }

    let mut visited = HashSet::new();
    for id in records.keys() {
        visit(id, records, &mut visited, &mut Vec::new())?;
    }
    Ok(())
}

/// Builds tasks from records, caching unfiltered compositions.
struct Composer<'a> {
    records: &'a BTreeMap<String, TaskDefinition>,
    cache: HashMap<String, Task>,
}

impl Composer<'_> {
    /// Compose `id`, filtering its direct members by `tags`.
    ///
    /// Members are always composed in full.
    fn compose(&mut self, id: &str, tags: &BTreeSet<String>) -> Result<Task> {
        if tags.is_empty() {
            if let Some(task) = self.cache.get(id) {
                return Ok(task.clone());
            }
        }

        let record = self.records.get(id).ok_or_else(|| Error::TaskNotFound(id.to_string()))?;

        let task = match record.task_type {
            TaskType::LocalCli => {
                let template = record.command.clone().unwrap_or_default();
                let mut task = Task::leaf(
                    &record.id,
                    &record.short_description,
                    Command::local_cli(template),
                );
                for placeholder in &record.placeholders {
                    task = task.with_placeholder(placeholder.clone());
                }
                task
            }
            TaskType::TaskSet => {
                let no_tags = BTreeSet::new();
                let mut members = Vec::new();
                for definition in &record.tasks {
                    let member = TaskMember::new(
                        self.compose(&definition.id, &no_tags)?,
                        definition.stop_on_error,
                        definition.tags.iter().cloned(),
                    );
                    if !member.matches_tags(tags) {
                        tracing::debug!(
                            set = id,
                            member = definition.id,
                            "Member filtered out by tags"
                        );
                        continue;
                    }
                    members.push(member);
                }
                Task::composite(&record.id, &record.short_description, &record.placeholders, members)
            }
        };

        let task = match record.help {
            Some(ref help) => task.with_help(help),
            None => task,
        };

        if tags.is_empty() {
            self.cache.insert(id.to_string(), task.clone());
        }
        Ok(task)
    }
}
