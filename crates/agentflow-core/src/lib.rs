//! Core types and error definitions for the Agentflow orchestrator.
//!
//! This crate provides the foundational types shared across all Agentflow crates,
//! including the error taxonomy, the per-run key/value context, and tool call
//! abstractions used between agents and plugins.
//!
//! # Main types
//!
//! - [`AgentflowError`] — Unified error enum for all Agentflow subsystems.
//! - [`AgentflowResult`] — Convenience alias for `Result<T, AgentflowError>`.
//! - [`RunContext`] — Mutable key/value scratch space for one workflow execution.
//! - [`ToolCall`] — An agent-initiated tool invocation request.
//! - [`ToolResult`] — The result returned after executing a tool call.

/// Per-run key/value context.
pub mod context;
/// Tracing subscriber bootstrap.
pub mod telemetry;

pub use context::RunContext;

use serde::{Deserialize, Serialize};

// --- Error types ---

/// Top-level error type for the Agentflow orchestrator.
///
/// Pre-execution variants (`Graph`, `Workflow`) are fatal to a whole run.
/// `Model` is the transient class that the engine retries.
#[derive(Debug, thiserror::Error)]
pub enum AgentflowError {
    /// The step dependency graph is invalid (cycle or missing node/input).
    #[error("Graph error: {0}")]
    Graph(String),

    /// A workflow definition or its agent bindings are invalid.
    #[error("Workflow error: {0}")]
    Workflow(String),

    /// An operation exceeded its deadline.
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Plugin registration, initialization, or shutdown failed.
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// A transient failure from a model backend; eligible for retry.
    #[error("Model error: {0}")]
    Model(String),

    /// A failure explicitly marked as not worth retrying.
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// The reasoner could not produce a routing decision.
    #[error("Routing error: {0}")]
    Routing(String),

    /// An error in configuration values.
    #[error("Config error: {0}")]
    Config(String),

    /// The operation was cancelled before it could finish.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentflowError {
    /// Whether a failure belongs to the transient class that a retry policy may retry.
    ///
    /// Timeouts are reported separately so callers can decide per policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentflowError::Model(_))
    }

    /// Whether the error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AgentflowError::Timeout(_))
    }
}

/// A convenience `Result` alias using [`AgentflowError`].
pub type AgentflowResult<T> = Result<T, AgentflowError>;

// --- Tool types ---

/// A request from an agent to invoke a specific plugin tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned to this call within one agent invocation.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON arguments to pass to the tool.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// The result returned after executing a [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The ID of the [`ToolCall`] this result corresponds to.
    pub call_id: String,
    /// The textual output produced by the tool.
    pub content: String,
    /// Whether the tool execution ended in an error.
    pub is_error: bool,
}

impl ToolResult {
    /// Creates a successful tool result.
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Creates an error tool result.
    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}
