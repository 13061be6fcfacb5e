//! Workflow execution for Agentflow.
//!
//! A [`Workflow`] is a named graph of steps, each bound to one agent. The
//! [`ExecutionEngine`] resolves the step graph, runs ready steps in
//! parallel, enforces timeouts and retries, and reports a terminal status
//! for every step.
//!
//! # Main types
//!
//! - [`ExecutionEngine`] — Wavefront executor tying agents, plugins, routing and learning together.
//! - [`Workflow`] / [`WorkflowStep`] — The workflow model and its builder.
//! - [`DependencyGraph`] — Pre-flight dependency resolution and cycle detection.
//! - [`Monitor`] — Per-agent step metrics and health.
//! - [`ExecutionResult`] — Per-step reports, final context and overall status.

/// The execution engine.
pub mod engine;
/// Step dependency graph.
pub mod graph;
/// Step metrics and health.
pub mod monitor;
/// Run results and engine configuration.
pub mod types;
/// Workflow and step definitions.
pub mod workflow;

pub use engine::ExecutionEngine;
pub use graph::DependencyGraph;
pub use monitor::{AgentMetrics, HealthSnapshot, HealthStatus, MetricEvent, Monitor};
pub use types::{EngineConfig, ExecutionResult, ExecutionStatus, StepReport, StepStatus};
pub use workflow::{StepCondition, Workflow, WorkflowBuilder, WorkflowStep};
