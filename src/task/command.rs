//! Command data structures.
//!
//! A `Command` is a single executable step owned by a task.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static PLACEHOLDER_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%([A-Za-z0-9_.\-]+)%").expect("placeholder token pattern"));

/// How a command entered its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// The command of a `local_cli` task
    LocalCli,
    /// A command contributed by a member of a task set
    TaskSetMember,
}

/// A single executable step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Command line template, may contain `%name%` tokens
    pub template: String,

    /// Origin of the command
    pub kind: CommandKind,

    /// Whether a failure stops the remaining commands
    pub stop_on_error: bool,

    /// Tags of the task set member that contributed the command
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl Command {
    /// Create the command of a `local_cli` task.
    pub fn local_cli(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            kind: CommandKind::LocalCli,
            stop_on_error: true,
            tags: BTreeSet::new(),
        }
    }

    /// Turn this command into a task set member command.
    #[must_use]
    pub fn as_member(&self, stop_on_error: bool, tags: &BTreeSet<String>) -> Self {
        Self {
            template: self.template.clone(),
            kind: CommandKind::TaskSetMember,
            stop_on_error,
            tags: tags.clone(),
        }
    }

    /// Set the stop-on-error flag.
    #[must_use]
    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Placeholder tokens used by the template, in order of appearance.
    pub fn tokens(&self) -> Vec<&str> {
        PLACEHOLDER_TOKEN.find_iter(&self.template).map(|m| m.as_str()).collect()
    }

    /// Substitute placeholder tokens with resolved values.
    ///
    /// Values may be keyed either by the full token (`%level%`) or by the
    /// bare name (`level`). Tokens without a value are left untouched.
    pub fn resolve(&self, values: &BTreeMap<String, String>) -> String {
        PLACEHOLDER_TOKEN
            .replace_all(&self.template, |caps: &regex::Captures| {
                values
                    .get(&caps[0])
                    .or_else(|| values.get(&caps[1]))
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}
