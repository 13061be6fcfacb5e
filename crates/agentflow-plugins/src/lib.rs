//! Plugin registry for Agentflow.
//!
//! Plugins are optional capability modules with their own lifecycle. The
//! registry validates their surface, enforces declared dependency order,
//! initializes them inside a failure-isolating boundary, and exposes their
//! tools to the agents that enable them.
//!
//! # Main types
//!
//! - [`Plugin`] — Trait every plugin implements (name, version, initialize, shutdown).
//! - [`PluginRegistry`] — Thread-safe registry with lifecycle management.
//! - [`PluginManifest`] / [`PluginFactories`] — Static startup loading.
//! - [`ToolDescriptor`] — A tool a plugin supplies to agents.

/// Static plugin manifests and factory tables.
pub mod manifest;
/// The plugin trait and descriptors.
pub mod plugin;
/// The plugin registry.
pub mod registry;

pub use manifest::{LoadReport, PluginEntry, PluginFactories, PluginFactory, PluginManifest};
pub use plugin::{is_valid_version, Plugin, PluginConfig, PluginInfo, ToolDescriptor};
pub use registry::PluginRegistry;
