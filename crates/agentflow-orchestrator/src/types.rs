use agentflow_agent::RetryPolicy;
use agentflow_collab::CollaborationSession;
use agentflow_core::RunContext;
use agentflow_reasoner::RouteResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a step within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting for prerequisites.
    Pending,
    /// Dispatched and not yet finished.
    Running,
    /// Finished with output.
    Completed,
    /// Ran and failed after its retry budget.
    Failed,
    /// Not executed: a prerequisite did not complete or the step's
    /// condition was false.
    Skipped,
    /// The last attempt exceeded the step timeout.
    TimedOut,
    /// Stopped by the workflow deadline.
    Cancelled,
}

impl StepStatus {
    /// Whether the status is final for this run.
    pub fn is_terminal(self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }

    /// Failed or timed out after the step actually ran.
    pub fn is_failure(self) -> bool {
        matches!(self, StepStatus::Failed | StepStatus::TimedOut)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::TimedOut => "timed_out",
            StepStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Terminal record of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    /// Step name.
    pub name: String,
    /// The agent that ran the step (after routing), or the bound agent if
    /// the step never ran.
    pub agent: String,
    /// Final status.
    pub status: StepStatus,
    /// Attempts made.
    pub attempts: u32,
    /// Agent output when the step completed.
    pub output: Option<String>,
    /// Why the step did not complete.
    pub error: Option<String>,
    /// Tool calls made by the final attempt.
    pub tool_calls: usize,
    /// When the first attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// Wall time across all attempts.
    pub duration_ms: u64,
    /// Routing decision, for steps with alternates.
    pub route: Option<RouteResult>,
}

impl StepReport {
    pub(crate) fn pending(name: &str, agent: &str) -> Self {
        Self {
            name: name.to_string(),
            agent: agent.to_string(),
            status: StepStatus::Pending,
            attempts: 0,
            output: None,
            error: None,
            tool_calls: 0,
            started_at: None,
            duration_ms: 0,
            route: None,
        }
    }
}

/// Overall outcome of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Every step completed or was skipped by its own condition.
    Completed,
    /// Some steps completed, others failed.
    PartialFailure,
    /// Nothing completed.
    Failed,
    /// The workflow deadline expired.
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::PartialFailure => "partial_failure",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Outcome of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Workflow name.
    pub workflow: String,
    /// Overall status.
    pub status: ExecutionStatus,
    /// One report per step, in declaration order.
    pub steps: Vec<StepReport>,
    /// The final run context: initial values plus committed outputs.
    pub context: RunContext,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Wall time of the whole run.
    pub duration_ms: u64,
    /// The run's closed collaboration session, when a coordinator is
    /// attached. The coordinator itself no longer holds it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<CollaborationSession>,
}

impl ExecutionResult {
    /// Report of the step named `name`.
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Status of the step named `name`.
    pub fn status_of(&self, name: &str) -> Option<StepStatus> {
        self.step(name).map(|s| s.status)
    }

    /// `(step, status)` pairs in declaration order.
    pub fn statuses(&self) -> Vec<(&str, StepStatus)> {
        self.steps.iter().map(|s| (s.name.as_str(), s.status)).collect()
    }

    /// Whether the run finished as [`ExecutionStatus::Completed`].
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

/// Execution engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Steps running at once within one run.
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    /// Per-attempt timeout for steps that do not set their own.
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: Option<u64>,
    /// Retry policy for steps that do not set their own.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Record a success or error pattern for every step that ran.
    #[serde(default = "default_true")]
    pub learn_from_runs: bool,
}

fn default_max_parallelism() -> usize {
    4
}

fn default_step_timeout_secs() -> Option<u64> {
    Some(300)
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallelism: default_max_parallelism(),
            default_step_timeout_secs: default_step_timeout_secs(),
            retry: RetryPolicy::default(),
            learn_from_runs: true,
        }
    }
}
