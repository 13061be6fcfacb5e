use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Context map that complexity analysis and decision rules read from.
pub type DecisionContext = HashMap<String, serde_json::Value>;

/// How many executors a task calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStrategy {
    /// One agent handles the task.
    SingleAgent,
    /// The task needs several cooperating agents.
    MultiAgent,
    /// Too complex or risky to automate.
    EscalateToHuman,
}

/// Result of [`Reasoner::analyze_task_complexity`](crate::Reasoner::analyze_task_complexity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskComplexity {
    /// 1 (trivial) to 10 (hardest).
    pub score: u8,
    /// Signals that contributed to the score.
    pub factors: Vec<String>,
    /// Strategy implied by the score.
    pub recommendation: AgentStrategy,
}

/// How a set of subtasks should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One after another.
    Sequential,
    /// All at once.
    Parallel,
    /// Parallel where possible, ordered where needed.
    Hybrid,
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

/// A workflow (or agent) a task can be routed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowCandidate {
    /// Candidate name.
    pub name: String,
    /// Matched against the task along with the name.
    #[serde(default)]
    pub description: Option<String>,
}

impl WorkflowCandidate {
    /// Candidate with no description.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl From<&str> for WorkflowCandidate {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Outcome of routing a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    /// The chosen candidate.
    pub workflow: String,
    /// 0.0 means no candidate matched and `workflow` is the fallback.
    pub confidence: f64,
    /// Why it was chosen.
    pub reasoning: String,
    /// The other candidates, best first.
    pub alternatives: Vec<String>,
}

/// An option for [`Reasoner::make_decision`](crate::Reasoner::make_decision),
/// scored per criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOption {
    /// Option name.
    pub name: String,
    /// Criterion → score.
    #[serde(default)]
    pub scores: HashMap<String, f64>,
}

impl DecisionOption {
    /// Option with no scores.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scores: HashMap::new(),
        }
    }

    /// Score the option on `criterion`.
    pub fn score(mut self, criterion: impl Into<String>, value: f64) -> Self {
        self.scores.insert(criterion.into(), value);
        self
    }
}

/// Outcome of [`Reasoner::make_decision`](crate::Reasoner::make_decision).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// The chosen option.
    pub selected: String,
    /// Why it was chosen.
    pub reasoning: String,
    /// The rule that chose the option, if one fired.
    pub rule: Option<String>,
    /// Weighted score of the selected option when no rule fired.
    pub score: Option<f64>,
    /// The other options.
    pub alternatives: Vec<String>,
}

/// What produced a history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// A routing call.
    Route,
    /// A decision call.
    Decision,
}

/// One entry of the reasoner's decision history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// What produced the record.
    pub kind: DecisionKind,
    /// The task or question, truncated.
    pub subject: String,
    /// What was chosen.
    pub choice: String,
    /// Routing confidence; `None` for decisions.
    pub confidence: Option<f64>,
    /// Why it was chosen.
    pub reasoning: String,
    /// When the choice was made.
    pub timestamp: DateTime<Utc>,
}
