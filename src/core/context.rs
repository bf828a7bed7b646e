//! Per-invocation context.
//!
//! A [`Context`] carries key/value data and diagnostic messages through one
//! top-level invocation. It is passed by value into each operation that
//! mutates it and handed back afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::Result;

/// Severity of a context message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Info,
    Error,
    Success,
    Debug,
}

impl Verbosity {
    /// Label used when rendering a message.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Error => "Error",
            Self::Success => "Success",
            Self::Debug => "Debug",
        }
    }
}

/// A single diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message text
    pub text: String,

    /// Message severity
    pub verbosity: Verbosity,
}

impl Message {
    /// Create a new message.
    pub fn new(text: impl Into<String>, verbosity: Verbosity) -> Self {
        Self { text: text.into(), verbosity }
    }

    /// Create an error message.
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(text, Verbosity::Error)
    }

    /// Create an info message.
    pub fn info(text: impl Into<String>) -> Self {
        Self::new(text, Verbosity::Info)
    }

    /// Create a success message.
    pub fn success(text: impl Into<String>) -> Self {
        Self::new(text, Verbosity::Success)
    }

    /// Create a debug message.
    pub fn debug(text: impl Into<String>) -> Self {
        Self::new(text, Verbosity::Debug)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.verbosity.label(), self.text)
    }
}

/// A message together with the transition or task that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedMessage {
    /// Transition or task name
    pub key: String,

    /// The message itself
    #[serde(flatten)]
    pub message: Message,
}

/// Mutable carrier of data and messages for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Context {
    /// Arbitrary key/value data
    pub data: BTreeMap<String, serde_json::Value>,

    /// Messages in the order they were recorded
    pub messages: Vec<KeyedMessage>,

    /// Tags requested for task set filtering
    pub tags: BTreeSet<String>,

    /// Stages requested for task set filtering
    pub stages: BTreeSet<String>,

    /// Whether commands should only be simulated
    pub dry_run: bool,

    /// Report format requested by the front-end
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a context previously written with [`Context::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the context as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Set the dry-run flag.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the requested tags.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    /// Get a data value.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Set a data value, replacing any previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Apply `key=value` overwrites.
    ///
    /// Values that parse as JSON (`true`, `3`, `"x"`) are stored typed,
    /// anything else is stored as a string. Entries without a `key=` prefix
    /// are skipped with a warning.
    pub fn apply_overwrites<S: AsRef<str>>(&mut self, overwrites: &[S]) {
        for entry in overwrites {
            let split = entry.as_ref().split_once('=');
            let Some((key, raw)) = split.filter(|(key, _)| !key.trim().is_empty()) else {
                tracing::warn!(entry = entry.as_ref(), "Ignoring overwrite without key=value");
                continue;
            };
            let value = serde_json::from_str(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
            self.set(key.trim(), value);
        }
    }

    /// Record a message produced by `key`.
    pub fn add_message(&mut self, key: impl Into<String>, message: Message) {
        self.messages.push(KeyedMessage { key: key.into(), message });
    }

    /// Messages produced by `key`, in order.
    pub fn messages_for<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Message> + 'a {
        self.messages.iter().filter(move |m| m.key == key).map(|m| &m.message)
    }

    /// Whether any error message has been recorded.
    pub fn has_errors(&self) -> bool {
        self.has_errors_since(0)
    }

    /// Whether an error was recorded at or after message index `from`.
    ///
    /// A context read back from disk keeps the messages of earlier runs;
    /// callers pass the message count they started with.
    pub fn has_errors_since(&self, from: usize) -> bool {
        self.messages.iter().skip(from).any(|m| m.message.verbosity == Verbosity::Error)
    }

    /// Process exit code implied by the recorded messages.
    pub fn exit_code(&self) -> i32 {
        self.exit_code_since(0)
    }

    /// Process exit code implied by the messages recorded from index `from`.
    pub fn exit_code_since(&self, from: usize) -> i32 {
        i32::from(self.has_errors_since(from))
    }
}
