use agentflow_core::AgentflowResult;
use agentflow_plugins::ToolDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Generation parameters for one model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateParams {
    /// Model identifier understood by the backend.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Token limit for the reply.
    pub max_tokens: u32,
    /// Tools the model may request, from the agent's enabled plugins.
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

/// Text-generation backend an agent runs on.
///
/// Provider wire formats live behind this trait. Errors are treated as
/// transient and retried unless they are [`AgentflowError::Fatal`](agentflow_core::AgentflowError::Fatal).
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Generate a reply to `prompt`.
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        params: &GenerateParams,
    ) -> AgentflowResult<String>;
}
