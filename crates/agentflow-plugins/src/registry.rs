use crate::manifest::{LoadReport, PluginFactories, PluginManifest};
use crate::plugin::{missing_surface, Plugin, PluginConfig, PluginInfo, ToolDescriptor};
use agentflow_core::{AgentflowError, AgentflowResult, ToolCall, ToolResult};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Process-wide registry of plugins.
///
/// All mutation goes through one write lock, so concurrent workflow runs can
/// share a single registry. Plugin hooks run outside that lock and inside an
/// isolation boundary: an error or panic from one plugin never escapes as a
/// panic and never disturbs the plugins already registered.
pub struct PluginRegistry {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    plugins: HashMap<String, Arc<dyn Plugin>>,
    /// Registration order, used for listing and reverse-order shutdown.
    order: Vec<String>,
    /// Names reserved by registrations whose `initialize` is running,
    /// with their declared dependencies.
    pending: HashMap<String, Vec<String>>,
}

impl PluginRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a plugin with an empty configuration.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> AgentflowResult<()> {
        self.register_with_config(plugin, &PluginConfig::new())
    }

    /// Validate, initialize, and register a plugin.
    ///
    /// Fails with [`AgentflowError::Plugin`] when the plugin's surface is
    /// incomplete, its name is taken, a declared dependency is not registered
    /// yet, or `initialize` fails or panics. A failed plugin is not registered.
    ///
    /// The name is reserved while `initialize` runs without the registry
    /// lock, so the hook may read the registry. Until it returns the plugin
    /// is invisible to lookups and its name cannot be registered again.
    pub fn register_with_config(
        &self,
        plugin: Arc<dyn Plugin>,
        config: &PluginConfig,
    ) -> AgentflowResult<()> {
        let missing = missing_surface(plugin.as_ref());
        if !missing.is_empty() {
            warn!(plugin = %plugin.name(), missing = ?missing, "Plugin rejected: incomplete surface");
            return Err(AgentflowError::Plugin(format!(
                "plugin '{}' does not implement required interface; missing or invalid: {}",
                plugin.name(),
                missing.join(", ")
            )));
        }

        let name = plugin.name().to_string();
        {
            let mut inner = self.inner.write();

            if inner.plugins.contains_key(&name) || inner.pending.contains_key(&name) {
                return Err(AgentflowError::Plugin(format!(
                    "plugin '{name}' is already registered"
                )));
            }

            let dependencies = plugin.dependencies();
            let missing_deps: Vec<String> = dependencies
                .iter()
                .filter(|dep| !inner.plugins.contains_key(*dep))
                .cloned()
                .collect();
            if !missing_deps.is_empty() {
                warn!(plugin = %name, missing = ?missing_deps, "Plugin rejected: unregistered dependencies");
                return Err(AgentflowError::Plugin(format!(
                    "plugin '{name}' depends on unregistered plugin(s): {}",
                    missing_deps.join(", ")
                )));
            }

            inner.pending.insert(name.clone(), dependencies);
        }

        let initialized = isolate(|| plugin.initialize(config));

        let mut inner = self.inner.write();
        inner.pending.remove(&name);
        if let Err(e) = initialized {
            error!(plugin = %name, error = %e, "Plugin initialization failed");
            return Err(AgentflowError::Plugin(format!(
                "plugin '{name}' failed to initialize: {e}"
            )));
        }

        info!(plugin = %name, version = %plugin.version(), "Registered plugin");
        inner.order.push(name.clone());
        inner.plugins.insert(name, plugin);
        Ok(())
    }

    /// Shut down and remove a plugin.
    ///
    /// `shutdown` is best-effort: its errors and panics are logged and the
    /// plugin is removed regardless. Unknown names and plugins that other
    /// registered plugins still depend on are rejected.
    pub fn unregister(&self, name: &str) -> AgentflowResult<()> {
        let plugin = {
            let mut inner = self.inner.write();
            if !inner.plugins.contains_key(name) {
                return Err(AgentflowError::Plugin(format!(
                    "plugin '{name}' is not registered"
                )));
            }

            let mut dependents: Vec<&str> = inner
                .plugins
                .values()
                .filter(|p| p.dependencies().iter().any(|d| d == name))
                .map(|p| p.name())
                .chain(
                    inner
                        .pending
                        .iter()
                        .filter(|(_, deps)| deps.iter().any(|d| d == name))
                        .map(|(pending, _)| pending.as_str()),
                )
                .collect();
            if !dependents.is_empty() {
                dependents.sort_unstable();
                return Err(AgentflowError::Plugin(format!(
                    "plugin '{name}' is still required by: {}",
                    dependents.join(", ")
                )));
            }

            inner.order.retain(|n| n != name);
            inner.plugins.remove(name)
        };

        if let Some(plugin) = plugin {
            shutdown_isolated(plugin.as_ref());
        }
        info!(plugin = %name, "Unregistered plugin");
        Ok(())
    }

    /// Shut down every plugin in reverse registration order. Returns how many were removed.
    pub fn shutdown_all(&self) -> usize {
        let drained: Vec<Arc<dyn Plugin>> = {
            let mut inner = self.inner.write();
            let order = std::mem::take(&mut inner.order);
            order
                .iter()
                .rev()
                .filter_map(|name| inner.plugins.remove(name))
                .collect()
        };
        for plugin in &drained {
            shutdown_isolated(plugin.as_ref());
        }
        info!(count = drained.len(), "All plugins shut down");
        drained.len()
    }

    /// The registered plugin named `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.inner.read().plugins.get(name).cloned()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().plugins.contains_key(name)
    }

    /// Number of registered plugins.
    pub fn count(&self) -> usize {
        self.inner.read().plugins.len()
    }

    /// Summaries of all registered plugins in registration order.
    pub fn list(&self) -> Vec<PluginInfo> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|name| inner.plugins.get(name))
            .map(|p| PluginInfo {
                name: p.name().to_string(),
                version: p.version().to_string(),
                dependencies: p.dependencies(),
                tools: p.tools().into_iter().map(|t| t.name).collect(),
            })
            .collect()
    }

    /// Tool descriptors supplied by the given enabled plugins.
    ///
    /// Names that are not registered are logged and skipped so a missing
    /// optional plugin degrades an agent instead of failing it.
    pub fn tools_for(&self, enabled: &[String]) -> Vec<ToolDescriptor> {
        let inner = self.inner.read();
        let mut tools = Vec::new();
        for name in enabled {
            match inner.plugins.get(name) {
                Some(plugin) => {
                    tools.extend(plugin.tools().into_iter().map(|mut t| {
                        t.plugin = name.clone();
                        t
                    }));
                }
                None => warn!(plugin = %name, "Enabled plugin is not registered; skipping its tools"),
            }
        }
        tools
    }

    /// Dispatch a tool call to whichever enabled plugin owns the tool.
    ///
    /// Unknown tools and plugin errors come back as error results so the
    /// calling agent can react to them.
    pub async fn call_tool(&self, enabled: &[String], call: ToolCall) -> ToolResult {
        let owner = {
            let inner = self.inner.read();
            enabled
                .iter()
                .filter_map(|name| inner.plugins.get(name))
                .find(|p| p.tools().iter().any(|t| t.name == call.name))
                .cloned()
        };

        let Some(plugin) = owner else {
            warn!(tool = %call.name, "No enabled plugin provides the requested tool");
            return ToolResult::error(&call.id, format!("unknown tool: {}", call.name));
        };

        debug!(plugin = %plugin.name(), tool = %call.name, call_id = %call.id, "Dispatching tool call");
        let call_id = call.id.clone();
        match plugin.call_tool(call).await {
            Ok(result) => result,
            Err(e) => {
                error!(plugin = %plugin.name(), error = %e, "Tool call failed");
                ToolResult::error(call_id, e.to_string())
            }
        }
    }

    /// Register every enabled manifest entry, in manifest order.
    ///
    /// Stands in for dynamic entry-point discovery: the manifest names the
    /// plugins to load and `factories` maps each name to a constructor.
    /// Each entry is isolated, so one failure never stops the others.
    pub fn load_from_entry_points(
        &self,
        manifest: &PluginManifest,
        factories: &PluginFactories,
    ) -> LoadReport {
        let mut report = LoadReport::default();

        for entry in &manifest.plugins {
            if !entry.enabled {
                debug!(plugin = %entry.name, "Manifest entry disabled");
                report.skipped.push(entry.name.clone());
                continue;
            }

            let result = factories
                .build(&entry.name)
                .and_then(|plugin| {
                    if plugin.name() != entry.name {
                        return Err(AgentflowError::Plugin(format!(
                            "entry '{}' produced a plugin named '{}'",
                            entry.name,
                            plugin.name()
                        )));
                    }
                    self.register_with_config(plugin, &entry.config)
                });

            match result {
                Ok(()) => report.loaded.push(entry.name.clone()),
                Err(e) => {
                    error!(plugin = %entry.name, error = %e, "Failed to load plugin from manifest");
                    report.failed.push((entry.name.clone(), e.to_string()));
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Plugin manifest processed"
        );
        report
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a plugin hook, turning panics into [`AgentflowError::Plugin`].
pub(crate) fn isolate<T>(hook: impl FnOnce() -> AgentflowResult<T>) -> AgentflowResult<T> {
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(result) => result,
        Err(payload) => Err(AgentflowError::Plugin(format!(
            "panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn shutdown_isolated(plugin: &dyn Plugin) {
    match isolate(|| plugin.shutdown()) {
        Ok(()) => debug!(plugin = %plugin.name(), "Plugin shutdown completed"),
        Err(e) => error!(plugin = %plugin.name(), error = %e, "Plugin shutdown failed"),
    }
}
