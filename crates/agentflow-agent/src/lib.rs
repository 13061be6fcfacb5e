//! Agent model and invocation loop for Agentflow.
//!
//! An [`Agent`] is plain configuration: a role, a model reference, the
//! plugins it may call and an iteration budget. The [`AgentRunner`] turns an
//! agent plus a prompt into text by driving a [`ModelClient`], dispatching
//! any tool requests to the agent's enabled plugins along the way.

/// Agent definitions and the agent registry.
pub mod agent;
/// The model-client interface.
pub mod model;
/// Retry policy and exponential backoff.
pub mod retry;
/// The agent invocation loop.
pub mod runner;

pub use agent::{Agent, AgentRegistry};
pub use model::{GenerateParams, ModelClient};
pub use retry::{compute_backoff, run_with_retry, RetryPolicy};
pub use runner::{AgentOutput, AgentRunner};
