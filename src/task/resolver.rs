//! Placeholder value resolvers.
//!
//! A resolver turns a [`Placeholder`] into a concrete value. The resolver is
//! picked by the placeholder's `value_resolver` id; unknown ids fall back to
//! a generic resolver named after the placeholder.

use std::collections::{BTreeMap, HashMap};

use super::model::Task;
use super::placeholder::Placeholder;
use crate::core::{Config, Context, Error, Result};

/// Produces values for placeholders.
pub trait ValueResolver: Send + Sync {
    /// Resolver id referenced by `value_resolver`.
    fn id(&self) -> &str;

    /// Name of the option exposed for the placeholder.
    fn alias(&self, placeholder: &Placeholder) -> Option<String> {
        Some(default_alias(placeholder))
    }

    /// Description of the option exposed for the placeholder.
    fn description(&self, placeholder: &Placeholder) -> String {
        placeholder
            .config_str("description")
            .map_or_else(|| format!("Value for {}", placeholder.token_name()), str::to_string)
    }

    /// Value type hint (`string`, `bool`, `int`, ...).
    fn value_type(&self, placeholder: &Placeholder) -> String {
        placeholder.config_str("type").unwrap_or("string").to_string()
    }

    /// Resolve the value, `None` when the resolver has nothing to offer.
    fn value(
        &self,
        placeholder: &Placeholder,
        config: &Config,
    ) -> Result<Option<serde_json::Value>>;
}

/// Alias from the `name` configuration entry, or the bare token name.
fn default_alias(placeholder: &Placeholder) -> String {
    placeholder.config_str("name").unwrap_or_else(|| placeholder.token_name()).to_string()
}

/// Returns the configured `value` unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticValueResolver;

impl ValueResolver for StaticValueResolver {
    fn id(&self) -> &str {
        "STATIC"
    }

    fn value(
        &self,
        placeholder: &Placeholder,
        _config: &Config,
    ) -> Result<Option<serde_json::Value>> {
        Ok(placeholder.configuration.get("value").filter(|v| !v.is_null()).cloned())
    }
}

/// Reads a setting at the configured `setting_path`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SettingValueResolver;

impl ValueResolver for SettingValueResolver {
    fn id(&self) -> &str {
        "SETTING"
    }

    fn description(&self, placeholder: &Placeholder) -> String {
        match placeholder.config_str("description") {
            Some(description) => description.to_string(),
            None => format!(
                "Defaults to setting {}",
                placeholder.config_str("setting_path").unwrap_or("<unset>")
            ),
        }
    }

    fn value(&self, placeholder: &Placeholder, config: &Config) -> Result<Option<serde_json::Value>> {
        let path = placeholder.config_str("setting_path").ok_or_else(|| {
            Error::Configuration(format!(
                "placeholder '{}' uses SETTING without a setting_path",
                placeholder.name
            ))
        })?;

        let value = config.setting(path)?;
        Ok((!value.is_null()).then_some(value))
    }
}

/// Fallback for resolver ids nobody registered.
#[derive(Debug, Clone)]
struct GenericValueResolver;

impl ValueResolver for GenericValueResolver {
    fn id(&self) -> &str {
        "GENERIC"
    }

    fn value(
        &self,
        placeholder: &Placeholder,
        _config: &Config,
    ) -> Result<Option<serde_json::Value>> {
        Ok(placeholder.configuration.get("value").filter(|v| !v.is_null()).cloned())
    }
}

/// Registry of value resolvers keyed by id.
pub struct ResolverRegistry {
    resolvers: HashMap<String, Box<dyn ValueResolver>>,
    fallback: GenericValueResolver,
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.resolvers.keys().collect();
        ids.sort();
        f.debug_struct("ResolverRegistry").field("resolvers", &ids).finish()
    }
}

impl ResolverRegistry {
    /// Create a registry with the built-in resolvers.
    pub fn new() -> Self {
        let mut registry = Self { resolvers: HashMap::new(), fallback: GenericValueResolver };
        registry.register(StaticValueResolver);
        registry.register(SettingValueResolver);
        registry
    }

    /// Register a resolver, replacing one with the same id.
    pub fn register(&mut self, resolver: impl ValueResolver + 'static) {
        self.resolvers.insert(resolver.id().to_string(), Box::new(resolver));
    }

    /// Resolver for a placeholder.
    pub fn get(&self, placeholder: &Placeholder) -> &dyn ValueResolver {
        match self.resolvers.get(&placeholder.value_resolver) {
            Some(resolver) => resolver.as_ref(),
            None => {
                tracing::debug!(
                    resolver = placeholder.value_resolver,
                    placeholder = placeholder.name,
                    "Unknown resolver, using generic fallback"
                );
                &self.fallback
            }
        }
    }

    /// Name of the option exposed for a placeholder.
    pub fn option_name(&self, placeholder: &Placeholder) -> String {
        let resolver = self.get(placeholder);
        resolver.alias(placeholder).unwrap_or_else(|| resolver.id().to_string())
    }

    /// Resolve every placeholder of `task`.
    ///
    /// Values come from, in order: `provided` (keyed by option name), the
    /// context data (keyed by option or token name), then the resolver.
    /// Optional placeholders without a value resolve to an empty string.
    pub fn resolve_values(
        &self,
        task: &Task,
        provided: &BTreeMap<String, String>,
        context: &Context,
        config: &Config,
    ) -> Result<BTreeMap<String, String>> {
        let mut values = BTreeMap::new();

        for placeholder in task.placeholders.values() {
            let option = self.option_name(placeholder);

            let value = match provided.get(&option) {
                Some(value) => Some(value.clone()),
                None => match context
                    .get(&option)
                    .or_else(|| context.get(placeholder.token_name()))
                {
                    Some(value) => Some(value_to_arg(value)),
                    None => self.get(placeholder).value(placeholder, config)?.map(|v| value_to_arg(&v)),
                },
            };

            match value {
                Some(value) => {
                    values.insert(placeholder.name.clone(), value);
                }
                None if placeholder.optional => {
                    values.insert(placeholder.name.clone(), String::new());
                }
                None => return Err(Error::MissingValue(option)),
            }
        }

        Ok(values)
    }
}

/// Render a JSON value as a command line argument.
pub fn value_to_arg(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => {
            items.iter().map(value_to_arg).collect::<Vec<_>>().join(" ")
        }
        other => other.to_string(),
    }
}
