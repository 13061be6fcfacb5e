use agentflow_core::{AgentflowResult, ToolCall, ToolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Opaque configuration handed to a plugin on initialization.
pub type PluginConfig = serde_json::Map<String, serde_json::Value>;

/// Metadata describing a tool a plugin exposes to agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name the model requests it by.
    pub name: String,
    /// Shown to the model.
    pub description: String,
    /// JSON schema of the arguments.
    #[serde(default)]
    pub parameters_schema: serde_json::Value,
    /// Name of the owning plugin. Filled in by the registry.
    #[serde(default)]
    pub plugin: String,
}

impl ToolDescriptor {
    /// Tool with an empty argument schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters_schema: serde_json::json!({}),
            plugin: String::new(),
        }
    }

    /// Set the argument schema.
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.parameters_schema = schema;
        self
    }
}

/// Trait that all plugins must implement.
///
/// `name`, `version`, `initialize` and `shutdown` form the required surface.
/// Dependencies and tools are optional; plugins that only hook lifecycle keep
/// the defaults.
///
/// `initialize` runs without the registry lock held, so it may read the
/// registry. The plugin itself is not visible there until it returns.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// Semantic version (`MAJOR.MINOR.PATCH`, optional pre-release/build suffix).
    fn version(&self) -> &str;

    /// Names of plugins that must be registered before this one.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Called once, synchronously, at registration time.
    fn initialize(&self, config: &PluginConfig) -> AgentflowResult<()>;

    /// Called once when the plugin is unregistered. Errors are logged, never propagated.
    fn shutdown(&self) -> AgentflowResult<()>;

    /// Tools this plugin supplies to agents that enable it.
    fn tools(&self) -> Vec<ToolDescriptor> {
        Vec::new()
    }

    /// Execute one of the tools returned by [`Plugin::tools`].
    async fn call_tool(&self, call: ToolCall) -> AgentflowResult<ToolResult> {
        Ok(ToolResult::error(
            &call.id,
            format!("plugin '{}' exposes no tools", self.name()),
        ))
    }
}

/// Read-only summary of a registered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// Declared dependencies.
    pub dependencies: Vec<String>,
    /// Names of the tools it provides.
    pub tools: Vec<String>,
}

/// Checks `MAJOR.MINOR.PATCH` with an optional `-pre` and/or `+build` suffix.
pub fn is_valid_version(version: &str) -> bool {
    let (rest, build) = match version.split_once('+') {
        Some((rest, build)) => (rest, Some(build)),
        None => (version, None),
    };
    let (core, pre) = match rest.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (rest, None),
    };

    let numeric = core.split('.').collect::<Vec<_>>();
    let core_ok = numeric.len() == 3
        && numeric
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));

    let suffix_ok = |s: Option<&str>| {
        s.map_or(true, |s| {
            !s.is_empty()
                && s.split('.').all(|id| {
                    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                })
        })
    };

    core_ok && suffix_ok(pre) && suffix_ok(build)
}

/// Returns the names of required surface members a plugin fails to provide.
pub(crate) fn missing_surface(plugin: &dyn Plugin) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if plugin.name().trim().is_empty() {
        missing.push("name");
    }
    if !is_valid_version(plugin.version()) {
        missing.push("version");
    }
    missing
}
