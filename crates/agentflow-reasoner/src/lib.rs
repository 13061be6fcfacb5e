//! Reasoning engine for Agentflow.
//!
//! Provides task complexity analysis, execution mode recommendations,
//! task routing across candidate workflows, and rule-based decisions with
//! a bounded decision history. Historical outcomes come from an optional
//! [`agentflow_learner::Learner`].

/// Rule-based decision engine.
pub mod decision;
/// The reasoner.
pub mod reasoner;
/// Reasoning result types.
pub mod types;

pub use decision::{DecisionEngine, RulePredicate};
pub use reasoner::{Reasoner, ReasonerConfig};
pub use types::{
    AgentStrategy, Decision, DecisionContext, DecisionKind, DecisionOption, DecisionRecord,
    ExecutionMode, RouteResult, TaskComplexity, WorkflowCandidate,
};
