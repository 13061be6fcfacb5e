use crate::plugin::{Plugin, PluginConfig};
use crate::registry::isolate;
use agentflow_core::{AgentflowError, AgentflowResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Static list of plugins to load at process startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Entries in load order.
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

/// One manifest entry: which plugin to construct and the config it receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEntry {
    /// Plugin name, also the factory key.
    pub name: String,
    /// Disabled entries are skipped.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Passed to the plugin's `initialize`.
    #[serde(default)]
    pub config: PluginConfig,
}

fn default_enabled() -> bool {
    true
}

impl PluginEntry {
    /// Enabled entry with an empty config.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            config: PluginConfig::new(),
        }
    }

    /// Set the entry's config.
    pub fn with_config(mut self, config: PluginConfig) -> Self {
        self.config = config;
        self
    }
}

/// Constructor for one plugin type.
pub type PluginFactory = Box<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Name → constructor table that manifest entries are resolved against.
#[derive(Default)]
pub struct PluginFactories {
    factories: HashMap<String, PluginFactory>,
}

impl PluginFactories {
    /// Empty factory table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constructor under `name`, replacing any previous one.
    pub fn add<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    /// Whether a constructor exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Names with a constructor, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Construct the plugin registered under `name`. Constructor panics are caught.
    pub(crate) fn build(&self, name: &str) -> AgentflowResult<Arc<dyn Plugin>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            AgentflowError::Plugin(format!("no factory registered for plugin '{name}'"))
        })?;
        isolate(|| Ok(factory()))
    }
}

/// Outcome of loading a manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadReport {
    /// Entries registered successfully.
    pub loaded: Vec<String>,
    /// `(plugin name, error message)` for every entry that failed.
    pub failed: Vec<(String, String)>,
    /// Disabled entries.
    pub skipped: Vec<String>,
}

impl LoadReport {
    /// Whether no entry failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
