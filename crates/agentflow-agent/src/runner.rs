use crate::agent::Agent;
use crate::model::{GenerateParams, ModelClient};
use agentflow_core::{AgentflowError, AgentflowResult, ToolCall};
use agentflow_plugins::PluginRegistry;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Final output of one agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    /// The model's final answer.
    pub text: String,
    /// Model calls made, including the final one.
    pub iterations: u32,
    /// Tool calls dispatched along the way, in order.
    pub tool_calls: Vec<ToolCall>,
}

/// The agent runner: drives one agent invocation.
/// Prompt → model → tool request → plugin → transcript → repeat.
pub struct AgentRunner {
    model: Arc<dyn ModelClient>,
    plugins: Option<Arc<PluginRegistry>>,
}

impl AgentRunner {
    /// Runner without plugins: tool requests come back as errors.
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self {
            model,
            plugins: None,
        }
    }

    /// Plugins that serve the agent's tool requests.
    pub fn with_plugins(mut self, plugins: Arc<PluginRegistry>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// Run `agent` on `prompt` until the model gives a final answer.
    ///
    /// Model errors other than [`AgentflowError::Fatal`], timeouts and
    /// cancellation are reported as [`AgentflowError::Model`] so callers
    /// treat them as transient. Running out of iterations is fatal.
    pub async fn run(&self, agent: &Agent, prompt: &str) -> AgentflowResult<AgentOutput> {
        let tools = match &self.plugins {
            Some(registry) => registry.tools_for(&agent.tools),
            None => Vec::new(),
        };
        let mut system_prompt = agent.effective_system_prompt();
        if !tools.is_empty() {
            system_prompt.push_str(&tool_instructions(&tools));
        }
        let params = GenerateParams {
            model: agent.model.clone(),
            temperature: agent.temperature,
            max_tokens: agent.max_tokens,
            tools,
        };

        let mut transcript = vec![prompt.to_string()];
        let mut tool_calls = Vec::new();
        let max_iterations = agent.max_iterations.max(1);

        debug!(agent = %agent.name, tools = params.tools.len(), "Starting agent loop");

        for iteration in 0..max_iterations {
            let reply = self
                .model
                .generate(&transcript.join("\n\n"), Some(&system_prompt), &params)
                .await
                .map_err(classify_model_error)?;

            let request = parse_tool_request(&reply)
                .filter(|(name, _)| params.tools.iter().any(|t| &t.name == name));

            let (Some((name, arguments)), Some(registry)) = (request, &self.plugins) else {
                info!(agent = %agent.name, iterations = iteration + 1, "Agent loop completed");
                return Ok(AgentOutput {
                    text: reply,
                    iterations: iteration + 1,
                    tool_calls,
                });
            };

            let call = ToolCall {
                id: format!("call_{}", tool_calls.len() + 1),
                name,
                arguments,
            };
            info!(agent = %agent.name, tool = %call.name, call_id = %call.id, "Executing tool call");
            let result = registry.call_tool(&agent.tools, call.clone()).await;

            transcript.push(format!("Assistant: {reply}"));
            transcript.push(
                serde_json::json!({
                    "type": "tool_result",
                    "tool": call.name,
                    "call_id": result.call_id,
                    "content": result.content,
                    "is_error": result.is_error,
                })
                .to_string(),
            );
            tool_calls.push(call);
        }

        warn!(agent = %agent.name, max_iterations, "Agent loop reached max iterations");
        Err(AgentflowError::Fatal(format!(
            "agent '{}' exceeded maximum of {max_iterations} iterations",
            agent.name
        )))
    }
}

fn tool_instructions(tools: &[agentflow_plugins::ToolDescriptor]) -> String {
    let mut out = String::from(
        "\n\nYou can use these tools. To call one, reply with only a JSON object \
         {\"tool\": \"<name>\", \"arguments\": {...}}.",
    );
    for tool in tools {
        out.push_str(&format!("\n- {}: {}", tool.name, tool.description));
    }
    out
}

fn classify_model_error(err: AgentflowError) -> AgentflowError {
    match err {
        AgentflowError::Fatal(_)
        | AgentflowError::Timeout(_)
        | AgentflowError::Cancelled(_)
        | AgentflowError::Model(_) => err,
        other => AgentflowError::Model(other.to_string()),
    }
}

fn fenced_json() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^```(?:json)?\s*(\{.*\})\s*```$").ok())
        .as_ref()
}

/// Extract `(tool, arguments)` from a reply that consists of a tool request,
/// either bare JSON or a single fenced code block.
pub(crate) fn parse_tool_request(reply: &str) -> Option<(String, serde_json::Value)> {
    let trimmed = reply.trim();
    let body = match fenced_json().and_then(|re| re.captures(trimmed)) {
        Some(caps) => caps.get(1)?.as_str(),
        None => trimmed,
    };
    if !body.starts_with('{') {
        return None;
    }

    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let name = value.get("tool")?.as_str()?.to_string();
    let arguments = value
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    Some((name, arguments))
}
