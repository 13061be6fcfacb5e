use agentflow_agent::RetryPolicy;
use agentflow_core::{AgentflowError, AgentflowResult, RunContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Gate on a run-context value: the step only runs when `key` equals `equals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCondition {
    /// Context key to compare.
    pub key: String,
    /// Value the key must hold.
    pub equals: Value,
}

impl StepCondition {
    /// Condition requiring `key` to equal `equals`.
    pub fn new(key: impl Into<String>, equals: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            equals: equals.into(),
        }
    }

    /// A missing key never satisfies the condition.
    pub fn holds(&self, context: &RunContext) -> bool {
        context.get(&self.key) == Some(&self.equals)
    }
}

/// One unit of work, bound to exactly one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step name, unique within the workflow.
    pub name: String,
    /// Agent bound to the step.
    pub agent: String,
    /// Prompt template; `{key}` placeholders are filled from the inputs.
    #[serde(default)]
    pub prompt: String,
    /// Context keys the step reads.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Context keys the step's output is committed under.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Steps that must finish first, beyond those implied by inputs.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Per-attempt timeout. Falls back to the engine default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Overrides the engine retry policy for this step.
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Alternate agents the reasoner may route this step to.
    #[serde(default)]
    pub route: Vec<String>,
    /// Run only when this holds; skipped otherwise.
    #[serde(default)]
    pub condition: Option<StepCondition>,
}

impl WorkflowStep {
    /// Step `name` bound to `agent`, with no inputs or outputs.
    pub fn new(name: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent: agent.into(),
            prompt: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            depends_on: Vec::new(),
            timeout_secs: None,
            retry: None,
            route: Vec::new(),
            condition: None,
        }
    }

    /// Set the prompt template.
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Read `key` from the run context.
    pub fn input(mut self, key: impl Into<String>) -> Self {
        self.inputs.push(key.into());
        self
    }

    /// Commit the step's output under `key`.
    pub fn output(mut self, key: impl Into<String>) -> Self {
        self.outputs.push(key.into());
        self
    }

    /// Wait for `step` to finish first.
    pub fn depends_on(mut self, step: impl Into<String>) -> Self {
        self.depends_on.push(step.into());
        self
    }

    /// Per-attempt timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Step-specific retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Let the reasoner pick among the bound agent and `agents`.
    pub fn route_among<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.route.extend(agents.into_iter().map(Into::into));
        self
    }

    /// Run only when context key `key` equals `equals`.
    pub fn when(mut self, key: impl Into<String>, equals: impl Into<Value>) -> Self {
        self.condition = Some(StepCondition::new(key, equals));
        self
    }

    /// Fill the prompt template from the step's input values.
    ///
    /// The template is scanned once, so placeholder text inside a
    /// substituted value is left as is. Inputs the template does not
    /// mention are appended as a JSON block so the agent still sees them.
    pub fn render_prompt(&self, inputs: &HashMap<String, Value>) -> String {
        let template = if self.prompt.trim().is_empty() {
            format!("Complete the '{}' step.", self.name)
        } else {
            self.prompt.clone()
        };

        let mut prompt = String::with_capacity(template.len());
        let mut referenced: HashSet<&str> = HashSet::new();
        let mut rest = template.as_str();
        while let Some(open) = rest.find('{') {
            prompt.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let filled = after.find('}').and_then(|close| {
                let key = &after[..close];
                if !self.inputs.iter().any(|k| k == key) {
                    return None;
                }
                inputs.get(key).map(|value| (key, value, close))
            });
            match filled {
                Some((key, value, close)) => {
                    match value {
                        Value::String(s) => prompt.push_str(s),
                        other => prompt.push_str(&other.to_string()),
                    }
                    referenced.insert(key);
                    rest = &after[close + 1..];
                }
                None => {
                    prompt.push('{');
                    rest = after;
                }
            }
        }
        prompt.push_str(rest);

        let unreferenced: serde_json::Map<String, Value> = self
            .inputs
            .iter()
            .filter(|key| !referenced.contains(key.as_str()))
            .filter_map(|key| inputs.get(key).map(|v| (key.clone(), v.clone())))
            .collect();
        if !unreferenced.is_empty() {
            prompt.push_str("\n\nInputs:\n");
            prompt.push_str(&Value::Object(unreferenced).to_string());
        }
        prompt
    }

    /// The bound agent followed by any routing alternates, without repeats.
    pub fn candidate_agents(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        std::iter::once(self.agent.as_str())
            .chain(self.route.iter().map(String::as_str))
            .filter(|a| seen.insert(*a))
            .collect()
    }
}

/// A named graph of steps. Immutable once built; every execution gets a
/// fresh run context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow name.
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Steps in declaration order.
    pub steps: Vec<WorkflowStep>,
    /// Deadline for the whole run. `None` means no limit.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Workflow {
    /// Start building a workflow named `name`.
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    /// Check the structural invariants: at least one step, non-empty and
    /// unique step names, every step bound to an agent.
    pub fn validate(&self) -> AgentflowResult<()> {
        if self.steps.is_empty() {
            return Err(AgentflowError::Workflow(format!(
                "workflow '{}' has no steps",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(AgentflowError::Workflow(format!(
                    "workflow '{}' has a step without a name",
                    self.name
                )));
            }
            if step.agent.trim().is_empty() {
                return Err(AgentflowError::Workflow(format!(
                    "step '{}' is not bound to an agent",
                    step.name
                )));
            }
            if !names.insert(step.name.as_str()) {
                return Err(AgentflowError::Workflow(format!(
                    "duplicate step name '{}' in workflow '{}'",
                    step.name, self.name
                )));
            }
        }
        Ok(())
    }

    /// The step named `name`.
    pub fn step(&self, name: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Every agent a run may invoke, including routing alternates.
    pub fn referenced_agents(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.steps
            .iter()
            .flat_map(WorkflowStep::candidate_agents)
            .filter(|a| seen.insert(*a))
            .collect()
    }
}

/// Builder for [`Workflow`]; `build` runs [`Workflow::validate`].
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    workflow: Workflow,
}

impl WorkflowBuilder {
    /// Builder for a workflow named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            workflow: Workflow {
                name: name.into(),
                description: None,
                steps: Vec::new(),
                timeout_secs: None,
            },
        }
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.workflow.description = Some(description.into());
        self
    }

    /// Deadline for the whole run, in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.workflow.timeout_secs = Some(secs);
        self
    }

    /// Append a step.
    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.workflow.steps.push(step);
        self
    }

    /// Validate and return the workflow.
    pub fn build(self) -> AgentflowResult<Workflow> {
        self.workflow.validate()?;
        Ok(self.workflow)
    }
}
