use crate::graph::DependencyGraph;
use crate::monitor::{MetricEvent, Monitor};
use crate::types::{EngineConfig, ExecutionResult, ExecutionStatus, StepReport, StepStatus};
use crate::workflow::{Workflow, WorkflowStep};
use agentflow_agent::{run_with_retry, Agent, AgentOutput, AgentRegistry, AgentRunner, ModelClient, RetryPolicy};
use agentflow_collab::{MessageType, SessionId, TeamCoordinator};
use agentflow_core::{AgentflowError, AgentflowResult, RunContext};
use agentflow_learner::Learner;
use agentflow_plugins::PluginRegistry;
use agentflow_reasoner::{Reasoner, RouteResult, WorkflowCandidate};
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of running one step to the end of its retry budget.
struct StepOutcome {
    result: AgentflowResult<AgentOutput>,
    attempts: u32,
    duration_ms: u64,
}

/// Aborts the wrapped task when dropped, so aborting the supervising task
/// also stops the step it supervises.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Per-run bookkeeping. Only the engine's scheduling loop touches it.
struct RunState {
    run_id: Uuid,
    reports: Vec<StepReport>,
    remaining: Vec<usize>,
    ready: VecDeque<usize>,
    context: RunContext,
    session: Option<SessionId>,
}

/// The workflow execution engine.
///
/// Runs a workflow as a topological wavefront: every step whose
/// prerequisites are done is dispatched, up to `max_parallelism` at a time,
/// and each finished step unblocks its dependents. The engine is the only
/// writer of the run context and commits a step's outputs after the step
/// completes, so a dependent always sees its producers' results.
pub struct ExecutionEngine {
    agents: AgentRegistry,
    model: Arc<dyn ModelClient>,
    plugins: Option<Arc<PluginRegistry>>,
    learner: Option<Arc<Learner>>,
    reasoner: Option<Arc<Reasoner>>,
    monitor: Arc<Monitor>,
    collaboration: Option<Arc<TeamCoordinator>>,
    config: EngineConfig,
    results: Arc<RwLock<HashMap<String, String>>>,
}

impl ExecutionEngine {
    /// Engine over `agents` with a fresh monitor and default config.
    pub fn new(agents: AgentRegistry, model: Arc<dyn ModelClient>) -> Self {
        Self {
            agents,
            model,
            plugins: None,
            learner: None,
            reasoner: None,
            monitor: Arc::new(Monitor::new()),
            collaboration: None,
            config: EngineConfig::default(),
            results: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Plugins that supply tools to agents.
    pub fn with_plugins(mut self, plugins: Arc<PluginRegistry>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// Pattern store that receives one pattern per executed step.
    pub fn with_learner(mut self, learner: Arc<Learner>) -> Self {
        self.learner = Some(learner);
        self
    }

    /// Reasoner used to route steps that list alternate agents.
    pub fn with_reasoner(mut self, reasoner: Arc<Reasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    /// Share a monitor, e.g. across several engines.
    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Coordinator used to notify downstream agents as steps finish.
    pub fn with_collaboration(mut self, coordinator: Arc<TeamCoordinator>) -> Self {
        self.collaboration = Some(coordinator);
        self
    }

    /// Replace the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Agents available to workflow steps.
    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// The monitor receiving step metrics.
    pub fn monitor(&self) -> Arc<Monitor> {
        Arc::clone(&self.monitor)
    }

    /// Most recent output of the step named `step`, if it ever completed.
    pub async fn get_result(&self, step: &str) -> Option<String> {
        self.results.read().await.get(step).cloned()
    }

    /// Execute `workflow` starting from `initial`.
    ///
    /// Validation, agent lookup and graph construction happen before any
    /// step runs; their errors are returned as-is. Once steps start, the
    /// call always returns `Ok` and failures are reported per step.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        initial: RunContext,
    ) -> AgentflowResult<ExecutionResult> {
        workflow.validate()?;
        for step in &workflow.steps {
            if let Some(missing) = step
                .candidate_agents()
                .into_iter()
                .find(|a| !self.agents.contains(a))
            {
                return Err(AgentflowError::Workflow(format!(
                    "unknown agent '{missing}' in step '{}'",
                    step.name
                )));
            }
        }
        let graph = DependencyGraph::build(workflow, &initial)?;

        let started_at = Utc::now();
        let start = Instant::now();
        let run_id = Uuid::new_v4();
        info!(
            run_id = %run_id,
            workflow = %workflow.name,
            steps = graph.len(),
            "Workflow execution started"
        );

        let runner = Arc::new(self.build_runner());
        let mut state = RunState {
            run_id,
            reports: workflow
                .steps
                .iter()
                .map(|s| StepReport::pending(&s.name, &s.agent))
                .collect(),
            remaining: (0..graph.len())
                .map(|i| graph.dependency_indices(i).len())
                .collect(),
            ready: VecDeque::new(),
            context: initial,
            session: self.open_session(workflow),
        };
        state.ready = (0..graph.len()).filter(|&i| state.remaining[i] == 0).collect();

        let max_parallelism = self.config.max_parallelism.max(1);
        let deadline = workflow
            .timeout_secs
            .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));
        let mut join_set: JoinSet<(usize, StepOutcome)> = JoinSet::new();
        let mut in_flight = 0usize;
        let mut cancelled = false;

        loop {
            while in_flight < max_parallelism {
                let Some(i) = state.ready.pop_front() else {
                    break;
                };
                let step = &workflow.steps[i];

                if let Some(reason) = skip_reason(step, i, &graph, &state) {
                    info!(run_id = %run_id, step = %step.name, reason = %reason, "Step skipped");
                    state.reports[i].status = StepStatus::Skipped;
                    state.reports[i].error = Some(reason);
                    self.finish_step(workflow, &graph, i, &mut state).await;
                    continue;
                }

                let inputs = state.context.select(&step.inputs);
                let prompt = step.render_prompt(&inputs);
                let (agent, route) = self.select_agent(step, &prompt);
                let Some(agent) = agent else {
                    // Pre-flight guarantees every candidate exists.
                    state.reports[i].status = StepStatus::Failed;
                    state.reports[i].error = Some(format!("agent '{}' disappeared", step.agent));
                    self.finish_step(workflow, &graph, i, &mut state).await;
                    continue;
                };

                let policy = step.retry.clone().unwrap_or_else(|| self.config.retry.clone());
                let timeout = step
                    .timeout_secs
                    .or(self.config.default_step_timeout_secs)
                    .map(Duration::from_secs);

                let report = &mut state.reports[i];
                report.status = StepStatus::Running;
                report.agent = agent.name.clone();
                report.started_at = Some(Utc::now());
                report.route = route;
                info!(run_id = %run_id, step = %step.name, agent = %agent.name, "Step started");

                let runner = Arc::clone(&runner);
                let label = step.name.clone();
                join_set.spawn(async move {
                    let handle = tokio::spawn(run_step(runner, agent, prompt, policy, timeout, label));
                    let _guard = AbortOnDrop(handle.abort_handle());
                    let outcome = match handle.await {
                        Ok(outcome) => outcome,
                        Err(e) => StepOutcome {
                            result: Err(AgentflowError::Fatal(format!("step task failed: {e}"))),
                            attempts: 1,
                            duration_ms: 0,
                        },
                    };
                    (i, outcome)
                });
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }

            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        cancelled = true;
                        break;
                    }
                },
                None => join_set.join_next().await,
            };
            let Some(joined) = joined else {
                break;
            };
            in_flight -= 1;

            match joined {
                Ok((i, outcome)) => {
                    self.apply_outcome(workflow, i, outcome, &mut state).await;
                    self.finish_step(workflow, &graph, i, &mut state).await;
                }
                Err(e) => error!(run_id = %run_id, error = %e, "Step supervisor task failed"),
            }
        }

        if cancelled {
            join_set.abort_all();
            warn!(run_id = %run_id, workflow = %workflow.name, "Workflow deadline exceeded, cancelling remaining steps");
        }
        for i in 0..state.reports.len() {
            let report = &mut state.reports[i];
            if report.status.is_terminal() {
                continue;
            }
            if cancelled {
                report.status = StepStatus::Cancelled;
                report.error = Some("workflow deadline exceeded".into());
            } else {
                report.status = StepStatus::Failed;
                report.error = Some("step task ended without a result".into());
            }
            if let Some(started) = report.started_at {
                report.duration_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;
            }
            self.emit_metric(workflow, &state.run_id, &state.reports[i]).await;
        }

        let status = overall_status(&state.reports, cancelled);
        let session = match (&self.collaboration, state.session) {
            (Some(coordinator), Some(id)) => {
                coordinator.end_session(id, status.to_string());
                coordinator.remove_session(id)
            }
            _ => None,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            run_id = %run_id,
            workflow = %workflow.name,
            status = %status,
            duration_ms,
            "Workflow execution finished"
        );

        Ok(ExecutionResult {
            run_id,
            workflow: workflow.name.clone(),
            status,
            steps: state.reports,
            context: state.context,
            started_at,
            duration_ms,
            session,
        })
    }

    fn build_runner(&self) -> AgentRunner {
        let runner = AgentRunner::new(Arc::clone(&self.model));
        match &self.plugins {
            Some(plugins) => runner.with_plugins(Arc::clone(plugins)),
            None => runner,
        }
    }

    /// Pick the agent for a step. Steps with alternates are routed by the
    /// reasoner on the rendered prompt; a zero-confidence route keeps the
    /// bound agent.
    fn select_agent(&self, step: &WorkflowStep, prompt: &str) -> (Option<Agent>, Option<RouteResult>) {
        let bound = || self.agents.get(&step.agent).cloned();
        let Some(reasoner) = self.reasoner.as_ref().filter(|_| !step.route.is_empty()) else {
            return (bound(), None);
        };

        let candidates: Vec<WorkflowCandidate> = step
            .candidate_agents()
            .into_iter()
            .map(|name| {
                let candidate = WorkflowCandidate::new(name);
                match self.agents.get(name) {
                    Some(agent) => candidate.with_description(agent.role.clone()),
                    None => candidate,
                }
            })
            .collect();

        match reasoner.route_with_history_key(prompt, &candidates, "agent") {
            Ok(route) if route.confidence > 0.0 => {
                debug!(step = %step.name, agent = %route.workflow, confidence = route.confidence, "Step routed");
                (self.agents.get(&route.workflow).cloned(), Some(route))
            }
            Ok(route) => (bound(), Some(route)),
            Err(e) => {
                warn!(step = %step.name, error = %e, "Routing failed, using bound agent");
                (bound(), None)
            }
        }
    }

    async fn apply_outcome(&self, workflow: &Workflow, i: usize, outcome: StepOutcome, state: &mut RunState) {
        let step = &workflow.steps[i];
        let report = &mut state.reports[i];
        report.attempts = outcome.attempts;
        report.duration_ms = outcome.duration_ms;

        match outcome.result {
            Ok(output) => {
                commit_outputs(step, &output.text, &mut state.context);
                report.status = StepStatus::Completed;
                report.tool_calls = output.tool_calls.len();
                report.output = Some(output.text.clone());
                self.results.write().await.insert(step.name.clone(), output.text);
                info!(
                    run_id = %state.run_id,
                    step = %step.name,
                    attempts = outcome.attempts,
                    duration_ms = outcome.duration_ms,
                    "Step completed"
                );
            }
            Err(e) => {
                report.status = if e.is_timeout() {
                    StepStatus::TimedOut
                } else {
                    StepStatus::Failed
                };
                report.error = Some(e.to_string());
                error!(
                    run_id = %state.run_id,
                    step = %step.name,
                    status = %report.status,
                    attempts = outcome.attempts,
                    error = %e,
                    "Step failed"
                );
            }
        }
    }

    /// Side effects of a step reaching a terminal state, then unblock its
    /// dependents.
    async fn finish_step(&self, workflow: &Workflow, graph: &DependencyGraph, i: usize, state: &mut RunState) {
        let report = &state.reports[i];
        self.emit_metric(workflow, &state.run_id, report).await;

        let ran = matches!(
            report.status,
            StepStatus::Completed | StepStatus::Failed | StepStatus::TimedOut
        );
        if ran {
            self.record_pattern(workflow, report);
            self.notify_dependents(workflow, graph, i, state);
        }

        for &d in graph.dependent_indices(i) {
            state.remaining[d] = state.remaining[d].saturating_sub(1);
            if state.remaining[d] == 0 {
                state.ready.push_back(d);
            }
        }
    }

    async fn emit_metric(&self, workflow: &Workflow, run_id: &Uuid, report: &StepReport) {
        self.monitor
            .record(MetricEvent {
                run_id: *run_id,
                workflow: workflow.name.clone(),
                step: report.name.clone(),
                agent: report.agent.clone(),
                status: report.status,
                attempts: report.attempts,
                tool_calls: report.tool_calls,
                duration_ms: report.duration_ms,
                timestamp: Utc::now(),
            })
            .await;
    }

    fn record_pattern(&self, workflow: &Workflow, report: &StepReport) {
        let Some(learner) = self.learner.as_ref().filter(|_| self.config.learn_from_runs) else {
            return;
        };
        let description = format!("{}: {}", workflow.name, report.name);
        let mut context = HashMap::from([
            ("workflow".to_string(), Value::from(workflow.name.as_str())),
            ("step".to_string(), Value::from(report.name.as_str())),
            ("agent".to_string(), Value::from(report.agent.as_str())),
        ]);

        if report.status == StepStatus::Completed {
            let approach = format!("agent '{}' in {} attempt(s)", report.agent, report.attempts);
            learner.learn_success(&description, &approach, context);
        } else {
            if let Some(err) = &report.error {
                context.insert("error".into(), Value::from(err.as_str()));
            }
            context.insert("status".into(), Value::from(report.status.to_string()));
            learner.learn_error(&description, "unresolved", context);
        }
    }

    fn notify_dependents(&self, workflow: &Workflow, graph: &DependencyGraph, i: usize, state: &RunState) {
        let Some(coordinator) = &self.collaboration else {
            return;
        };
        let report = &state.reports[i];
        for &d in graph.dependent_indices(i) {
            let recipient = &workflow.steps[d].agent;
            if *recipient == report.agent {
                continue;
            }
            let metadata = HashMap::from([
                ("run_id".to_string(), Value::from(state.run_id.to_string())),
                ("step".to_string(), Value::from(report.name.as_str())),
                ("status".to_string(), Value::from(report.status.to_string())),
            ]);
            coordinator.send_message_with_metadata(
                &report.agent,
                recipient,
                MessageType::Notification,
                format!("step '{}' {}", report.name, report.status),
                metadata,
            );
        }
    }

    fn open_session(&self, workflow: &Workflow) -> Option<SessionId> {
        let coordinator = self.collaboration.as_ref()?;
        let participants: Vec<String> = workflow
            .referenced_agents()
            .into_iter()
            .map(String::from)
            .collect();
        for agent in &participants {
            coordinator.register_agent(agent.as_str());
        }
        Some(coordinator.start_session(workflow.name.clone(), participants))
    }
}

/// Why step `i` must not run, if anything.
fn skip_reason(step: &WorkflowStep, i: usize, graph: &DependencyGraph, state: &RunState) -> Option<String> {
    if let Some(&blocker) = graph
        .dependency_indices(i)
        .iter()
        .find(|&&d| state.reports[d].status != StepStatus::Completed)
    {
        let blocker = &state.reports[blocker];
        return Some(format!(
            "prerequisite '{}' did not complete ({})",
            blocker.name, blocker.status
        ));
    }
    match &step.condition {
        Some(condition) if !condition.holds(&state.context) => Some(format!(
            "condition not met: {} != {}",
            condition.key, condition.equals
        )),
        _ => None,
    }
}

/// Run one step under its retry policy, each attempt under its own timeout.
async fn run_step(
    runner: Arc<AgentRunner>,
    agent: Agent,
    prompt: String,
    policy: RetryPolicy,
    timeout: Option<Duration>,
    label: String,
) -> StepOutcome {
    let start = Instant::now();
    let (result, attempts) = run_with_retry(&policy, &label, |attempt| {
        let (runner, agent, prompt, label) = (&runner, &agent, &prompt, &label);
        async move {
            debug!(step = %label, attempt, "Step attempt");
            match timeout {
                Some(limit) => tokio::time::timeout(limit, runner.run(agent, prompt))
                    .await
                    .unwrap_or_else(|_| {
                        Err(AgentflowError::Timeout(format!(
                            "step '{label}' exceeded {}s",
                            limit.as_secs()
                        )))
                    }),
                None => runner.run(agent, prompt).await,
            }
        }
    })
    .await;

    StepOutcome {
        result,
        attempts,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

/// Write a completed step's outputs. A JSON object reply supplies the keys
/// it carries; every other declared key gets the raw reply.
fn commit_outputs(step: &WorkflowStep, text: &str, context: &mut RunContext) {
    let object = match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    };
    for key in &step.outputs {
        let value = object
            .as_ref()
            .and_then(|map| map.get(key).cloned())
            .unwrap_or_else(|| Value::String(text.to_string()));
        context.insert(key.clone(), value);
    }
}

fn overall_status(reports: &[StepReport], cancelled: bool) -> ExecutionStatus {
    if cancelled {
        return ExecutionStatus::Cancelled;
    }
    let any_failed = reports.iter().any(|r| r.status.is_failure());
    let any_completed = reports.iter().any(|r| r.status == StepStatus::Completed);
    match (any_failed, any_completed) {
        (false, _) => ExecutionStatus::Completed,
        (true, true) => ExecutionStatus::PartialFailure,
        (true, false) => ExecutionStatus::Failed,
    }
}
