//! Placeholder definitions.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Placeholders of a task keyed by name, in assembly order.
///
/// Inserting an existing name replaces the definition but keeps the slot
/// of the first occurrence.
pub type Placeholders = IndexMap<String, Placeholder>;

/// A named parameter whose value is supplied by a value resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placeholder {
    /// Name as it appears in command templates, e.g. `%level%`
    pub name: String,

    /// Id of the resolver that produces the value
    pub value_resolver: String,

    /// Resolver specific configuration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configuration: BTreeMap<String, serde_json::Value>,

    /// Whether the placeholder may stay unresolved
    #[serde(default)]
    pub optional: bool,
}

impl Placeholder {
    /// Create a required placeholder.
    pub fn new(name: impl Into<String>, value_resolver: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_resolver: value_resolver.into(),
            configuration: BTreeMap::new(),
            optional: false,
        }
    }

    /// Add a configuration entry.
    #[must_use]
    pub fn with_config(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }

    /// Mark the placeholder optional.
    #[must_use]
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// The name without surrounding `%` markers.
    pub fn token_name(&self) -> &str {
        self.name.trim_matches('%')
    }

    /// A string configuration entry.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Merge placeholder lists into `target`, later entries winning.
pub fn merge_placeholders<'a>(
    target: &mut Placeholders,
    placeholders: impl IntoIterator<Item = &'a Placeholder>,
) {
    for placeholder in placeholders {
        target.insert(placeholder.name.clone(), placeholder.clone());
    }
}
