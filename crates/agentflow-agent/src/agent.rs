use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A named executor bound to a model backend and a set of enabled plugins.
///
/// Agents come from configuration and are immutable apart from `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent name, referenced by workflow steps.
    pub name: String,
    /// Free-text role, used in the derived system prompt.
    pub role: String,
    /// Model identifier passed through to the [`ModelClient`](crate::ModelClient).
    pub model: String,
    /// Enabled plugin names, in priority order.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Model calls allowed per invocation.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Overrides the role-derived system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Sampling temperature passed to the model.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Token limit per model call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Mutable annotations, e.g. observed success rates.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

impl Agent {
    /// Create an agent with default limits and no tools.
    pub fn new(name: impl Into<String>, role: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            model: model.into(),
            tools: Vec::new(),
            max_iterations: default_max_iterations(),
            system_prompt: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            metadata: HashMap::new(),
        }
    }

    /// Replace the enabled plugin list.
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Set the model-call cap per invocation.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Use a fixed system prompt instead of the role-derived one.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The system prompt sent with every model call: the configured one, or
    /// one derived from the agent's role.
    pub fn effective_system_prompt(&self) -> String {
        match &self.system_prompt {
            Some(prompt) => prompt.clone(),
            None => format!(
                "You are '{}', an agent acting as {}. Complete the task you are given.",
                self.name, self.role
            ),
        }
    }
}

/// Name → [`Agent`] map supplied by the caller of the execution engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentRegistry {
    agents: HashMap<String, Agent>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an agent, returning the one it replaced.
    pub fn insert(&mut self, agent: Agent) -> Option<Agent> {
        self.agents.insert(agent.name.clone(), agent)
    }

    /// Look up an agent by name.
    pub fn get(&self, name: &str) -> Option<&Agent> {
        self.agents.get(name)
    }

    /// Whether an agent named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Registered agent names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the registry has no agents.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Set one metadata entry. Returns `false` if the agent is unknown.
    pub fn set_metadata(
        &mut self,
        agent: &str,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> bool {
        match self.agents.get_mut(agent) {
            Some(a) => {
                a.metadata.insert(key.into(), value);
                true
            }
            None => false,
        }
    }
}

impl FromIterator<Agent> for AgentRegistry {
    fn from_iter<T: IntoIterator<Item = Agent>>(iter: T) -> Self {
        let mut registry = Self::new();
        for agent in iter {
            registry.insert(agent);
        }
        registry
    }
}
