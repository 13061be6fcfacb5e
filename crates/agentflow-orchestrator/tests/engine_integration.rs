//! Integration tests for the execution engine: wavefront scheduling,
//! failure isolation, timeouts, retries, routing and the side effects a
//! run leaves in the monitor, learner and collaboration layer.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use agentflow_agent::{Agent, AgentRegistry, GenerateParams, ModelClient, RetryPolicy};
use agentflow_collab::TeamCoordinator;
use agentflow_core::{AgentflowError, AgentflowResult, RunContext, ToolCall, ToolResult};
use agentflow_learner::{Learner, LearnerConfig};
use agentflow_orchestrator::*;
use agentflow_plugins::{Plugin, PluginConfig, PluginRegistry, ToolDescriptor};
use agentflow_reasoner::{Reasoner, ReasonerConfig};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Behavior {
    Reply(&'static str),
    /// Reply with the prompt itself.
    Echo,
    Slow(u64),
    /// Fail with a transient model error this many times, then succeed.
    Flaky(u32),
    Fatal,
    Panic,
}

/// Model backend whose behaviour is chosen by the agent's model id.
struct MockModel {
    behaviors: HashMap<String, Behavior>,
    failures: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<(String, String)>>,
    tool_counts: Mutex<HashMap<String, usize>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockModel {
    fn new(behaviors: &[(&str, Behavior)]) -> Arc<Self> {
        Arc::new(Self {
            behaviors: behaviors
                .iter()
                .map(|(agent, b)| (model_id(agent), b.clone()))
                .collect(),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            tool_counts: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn calls_for(&self, agent: &str) -> Vec<String> {
        let model = model_id(agent);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| *m == model)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for MockModel {
    async fn generate(
        &self,
        prompt: &str,
        _system_prompt: Option<&str>,
        params: &GenerateParams,
    ) -> AgentflowResult<String> {
        self.calls
            .lock()
            .unwrap()
            .push((params.model.clone(), prompt.to_string()));
        self.tool_counts
            .lock()
            .unwrap()
            .insert(params.model.clone(), params.tools.len());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        match self.behaviors.get(&params.model).cloned() {
            None => Ok(format!("{} done", params.model)),
            Some(Behavior::Reply(text)) => Ok(text.to_string()),
            Some(Behavior::Echo) => Ok(prompt.to_string()),
            Some(Behavior::Slow(ms)) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok("slow done".to_string())
            }
            Some(Behavior::Flaky(times)) => {
                let mut failures = self.failures.lock().unwrap();
                let seen = failures.entry(params.model.clone()).or_insert(0);
                if *seen < times {
                    *seen += 1;
                    Err(AgentflowError::Model("rate limited".into()))
                } else {
                    Ok("recovered".to_string())
                }
            }
            Some(Behavior::Fatal) => Err(AgentflowError::Fatal("invalid api key".into())),
            Some(Behavior::Panic) => panic!("model backend crashed"),
        }
    }
}

fn model_id(agent: &str) -> String {
    format!("{agent}-model")
}

fn agents(names: &[(&str, &str)]) -> AgentRegistry {
    names
        .iter()
        .map(|(name, role)| Agent::new(*name, *role, model_id(name)))
        .collect()
}

fn instant_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff_base_ms: 0,
        backoff_max_ms: 0,
        retry_on_timeout: false,
    }
}

fn engine(registry: AgentRegistry, model: Arc<MockModel>) -> ExecutionEngine {
    ExecutionEngine::new(registry, model).with_config(EngineConfig {
        retry: instant_retry(3),
        ..EngineConfig::default()
    })
}

fn build_test_deploy() -> Workflow {
    Workflow::builder("build-test-deploy")
        .step(WorkflowStep::new("build", "builder").output("artifact"))
        .step(
            WorkflowStep::new("test", "tester")
                .input("artifact")
                .output("report")
                .timeout_secs(1)
                .retry(RetryPolicy::none()),
        )
        .step(WorkflowStep::new("deploy", "deployer").input("report"))
        .build()
        .unwrap()
}

fn bdt_agents() -> AgentRegistry {
    agents(&[("builder", "build"), ("tester", "test"), ("deployer", "deploy")])
}

// ---------------------------------------------------------------------------
// Scheduling and failure isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_timed_out_step_skips_dependents() {
    let model = MockModel::new(&[("tester", Behavior::Slow(5_000))]);
    let engine = engine(bdt_agents(), model.clone());

    let result = engine
        .execute(&build_test_deploy(), RunContext::new())
        .await
        .unwrap();

    assert_eq!(result.status_of("build"), Some(StepStatus::Completed));
    assert_eq!(result.status_of("test"), Some(StepStatus::TimedOut));
    assert_eq!(result.status_of("deploy"), Some(StepStatus::Skipped));
    assert_eq!(result.status, ExecutionStatus::PartialFailure);
    assert_eq!(
        serde_json::to_value(result.status).unwrap(),
        json!("partial_failure")
    );

    assert!(result.context.contains("artifact"));
    assert!(!result.context.contains("report"));
    assert!(model.calls_for("deployer").is_empty());
    assert!(result.steps.iter().all(|s| s.status.is_terminal()));
}

#[tokio::test]
async fn test_cycle_fails_before_any_step_runs() {
    let model = MockModel::new(&[]);
    let engine = engine(agents(&[("a", "x"), ("b", "y"), ("c", "z")]), model.clone());
    let workflow = Workflow::builder("cyclic")
        .step(WorkflowStep::new("head", "c").output("seed"))
        .step(WorkflowStep::new("left", "a").input("seed").input("right_out").output("left_out"))
        .step(WorkflowStep::new("right", "b").input("left_out").output("right_out"))
        .build()
        .unwrap();

    let err = engine.execute(&workflow, RunContext::new()).await.unwrap_err();
    assert!(matches!(err, AgentflowError::Graph(_)), "{err:?}");
    assert_eq!(model.total_calls(), 0);
    assert_eq!(engine.monitor().aggregate_metrics().await.executed(), 0);
}

#[tokio::test]
async fn test_unknown_agent_is_rejected_up_front() {
    let model = MockModel::new(&[]);
    let engine = engine(agents(&[("coder", "code")]), model.clone());
    let workflow = Workflow::builder("wf")
        .step(WorkflowStep::new("write", "coder"))
        .step(WorkflowStep::new("review", "reviewer"))
        .build()
        .unwrap();

    let err = engine.execute(&workflow, RunContext::new()).await.unwrap_err();
    match err {
        AgentflowError::Workflow(msg) => assert!(msg.contains("unknown agent 'reviewer'")),
        other => panic!("expected workflow error, got {other:?}"),
    }
    assert_eq!(model.total_calls(), 0);
}

#[tokio::test]
async fn test_failure_only_affects_dependents() {
    let model = MockModel::new(&[("broken", Behavior::Fatal)]);
    let engine = engine(
        agents(&[("broken", "x"), ("worker", "y"), ("other", "z")]),
        model.clone(),
    );
    let workflow = Workflow::builder("branches")
        .step(WorkflowStep::new("a", "broken").output("a_out"))
        .step(WorkflowStep::new("b", "worker").input("a_out").output("b_out"))
        .step(WorkflowStep::new("c", "other").output("c_out"))
        .step(WorkflowStep::new("d", "worker").input("b_out").input("c_out"))
        .step(WorkflowStep::new("e", "other").input("c_out"))
        .build()
        .unwrap();

    let result = engine.execute(&workflow, RunContext::new()).await.unwrap();
    let statuses: HashMap<&str, StepStatus> = result.statuses().into_iter().collect();
    assert_eq!(statuses["a"], StepStatus::Failed);
    assert_eq!(statuses["b"], StepStatus::Skipped);
    assert_eq!(statuses["c"], StepStatus::Completed);
    assert_eq!(statuses["d"], StepStatus::Skipped);
    assert_eq!(statuses["e"], StepStatus::Completed);
    assert_eq!(result.status, ExecutionStatus::PartialFailure);

    // Fatal errors are not retried.
    assert_eq!(result.step("a").unwrap().attempts, 1);
    assert!(result.step("b").unwrap().error.as_deref().unwrap().contains("'a'"));
}

#[tokio::test]
async fn test_all_failures_is_failed() {
    let model = MockModel::new(&[("broken", Behavior::Fatal)]);
    let engine = engine(agents(&[("broken", "x")]), model);
    let workflow = Workflow::builder("doomed")
        .step(WorkflowStep::new("only", "broken"))
        .build()
        .unwrap();

    let result = engine.execute(&workflow, RunContext::new()).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_panicking_step_is_contained() {
    let model = MockModel::new(&[("crasher", Behavior::Panic)]);
    let engine = engine(agents(&[("crasher", "x"), ("steady", "y")]), model);
    let workflow = Workflow::builder("panics")
        .step(WorkflowStep::new("boom", "crasher"))
        .step(WorkflowStep::new("fine", "steady"))
        .build()
        .unwrap();

    let result = engine.execute(&workflow, RunContext::new()).await.unwrap();
    assert_eq!(result.status_of("boom"), Some(StepStatus::Failed));
    assert_eq!(result.status_of("fine"), Some(StepStatus::Completed));
    assert!(result.step("boom").unwrap().error.as_deref().unwrap().contains("panic"));
}

// ---------------------------------------------------------------------------
// Retries and timeouts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let model = MockModel::new(&[("flaky", Behavior::Flaky(2))]);
    let engine = engine(agents(&[("flaky", "x")]), model.clone());
    let workflow = Workflow::builder("retry")
        .step(WorkflowStep::new("call", "flaky").output("answer"))
        .build()
        .unwrap();

    let result = engine.execute(&workflow, RunContext::new()).await.unwrap();
    let step = result.step("call").unwrap();
    assert_eq!(step.status, StepStatus::Completed);
    assert_eq!(step.attempts, 3);
    assert_eq!(result.context.get("answer"), Some(&json!("recovered")));
    assert_eq!(model.calls_for("flaky").len(), 3);

    let metrics = engine.monitor().agent_metrics("flaky").await.unwrap();
    assert_eq!(metrics.retries, 2);
}

#[tokio::test]
async fn test_retry_budget_exhausted() {
    let model = MockModel::new(&[("flaky", Behavior::Flaky(5))]);
    let engine = engine(agents(&[("flaky", "x")]), model.clone());
    let workflow = Workflow::builder("retry")
        .step(WorkflowStep::new("call", "flaky").retry(instant_retry(2)))
        .build()
        .unwrap();

    let result = engine.execute(&workflow, RunContext::new()).await.unwrap();
    let step = result.step("call").unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.attempts, 2);
    assert!(step.error.as_deref().unwrap().contains("rate limited"));
}

#[tokio::test]
async fn test_workflow_deadline_cancels_remaining_steps() {
    let model = MockModel::new(&[("slow", Behavior::Slow(10_000))]);
    let engine = engine(agents(&[("slow", "x"), ("fast", "y")]), model.clone());
    let workflow = Workflow::builder("deadline")
        .timeout_secs(1)
        .step(WorkflowStep::new("quick", "fast"))
        .step(WorkflowStep::new("crawl", "slow").output("data"))
        .step(WorkflowStep::new("after", "fast").input("data"))
        .build()
        .unwrap();

    let started = Instant::now();
    let result = engine.execute(&workflow, RunContext::new()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(result.status, ExecutionStatus::Cancelled);
    assert_eq!(result.status_of("quick"), Some(StepStatus::Completed));
    assert_eq!(result.status_of("crawl"), Some(StepStatus::Cancelled));
    assert_eq!(result.status_of("after"), Some(StepStatus::Cancelled));
    assert_eq!(model.calls_for("fast").len(), 1);
}

#[tokio::test]
async fn test_parallelism_is_bounded() {
    let names = ["w1", "w2", "w3", "w4", "w5", "w6"];
    let behaviors: Vec<(&str, Behavior)> = names.iter().map(|n| (*n, Behavior::Slow(100))).collect();
    let model = MockModel::new(&behaviors);
    let registry = agents(&names.map(|n| (n, "worker")));
    let engine = ExecutionEngine::new(registry, model.clone()).with_config(EngineConfig {
        max_parallelism: 2,
        ..EngineConfig::default()
    });

    let mut builder = Workflow::builder("fan-out");
    for name in names {
        builder = builder.step(WorkflowStep::new(format!("step-{name}"), name));
    }
    let result = engine.execute(&builder.build().unwrap(), RunContext::new()).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(model.total_calls(), 6);
    let peak = model.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency {peak}");
    assert!(peak >= 2, "independent steps should overlap");
}

// ---------------------------------------------------------------------------
// Data flow, conditions and routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_outputs_flow_into_dependent_prompts() {
    let model = MockModel::new(&[
        ("planner", Behavior::Reply(r#"{"plan": "split the parser", "risk": "low"}"#)),
        ("writer", Behavior::Echo),
    ]);
    let engine = engine(agents(&[("planner", "plan"), ("writer", "write")]), model.clone());
    let workflow = Workflow::builder("plan-write")
        .step(WorkflowStep::new("plan", "planner").input("goal").output("plan").output("risk"))
        .step(
            WorkflowStep::new("write", "writer")
                .prompt("Implement: {plan}")
                .input("plan")
                .input("risk")
                .output("draft"),
        )
        .build()
        .unwrap();

    let mut initial = RunContext::new();
    initial.insert("goal", "refactor");
    let result = engine.execute(&workflow, initial).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.context.get("plan"), Some(&json!("split the parser")));
    assert_eq!(result.context.get("goal"), Some(&json!("refactor")));
    let prompt = &model.calls_for("writer")[0];
    assert!(prompt.starts_with("Implement: split the parser"));
    assert!(prompt.contains(r#""risk":"low""#));
    assert_eq!(engine.get_result("plan").await.as_deref(), Some(r#"{"plan": "split the parser", "risk": "low"}"#));
    assert!(engine.get_result("missing").await.is_none());
}

#[tokio::test]
async fn test_false_condition_skips_step() {
    let model = MockModel::new(&[("reviewer", Behavior::Reply(r#"{"approved": false}"#))]);
    let engine = engine(
        agents(&[("reviewer", "review"), ("ops", "deploy")]),
        model.clone(),
    );
    let workflow = Workflow::builder("gated")
        .step(WorkflowStep::new("review", "reviewer").output("approved"))
        .step(WorkflowStep::new("ship", "ops").when("approved", true).output("release"))
        .step(WorkflowStep::new("announce", "ops").input("release"))
        .build()
        .unwrap();

    let result = engine.execute(&workflow, RunContext::new()).await.unwrap();
    assert_eq!(result.status_of("ship"), Some(StepStatus::Skipped));
    assert_eq!(result.status_of("announce"), Some(StepStatus::Skipped));
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert!(model.calls_for("ops").is_empty());
}

#[tokio::test]
async fn test_reasoner_routes_to_best_agent() {
    let model = MockModel::new(&[]);
    let registry = agents(&[
        ("generalist", "general assistant"),
        ("bugfixer", "fix crash and bug reports"),
    ]);
    let reasoner = Arc::new(Reasoner::new(ReasonerConfig::default()));
    let engine = engine(registry, model.clone()).with_reasoner(reasoner.clone());
    let workflow = Workflow::builder("triage")
        .step(
            WorkflowStep::new("handle", "generalist")
                .prompt("fix the crash bug in the parser")
                .route_among(["bugfixer"]),
        )
        .build()
        .unwrap();

    let result = engine.execute(&workflow, RunContext::new()).await.unwrap();
    let step = result.step("handle").unwrap();
    assert_eq!(step.agent, "bugfixer");
    let route = step.route.as_ref().unwrap();
    assert!(route.confidence > 0.0);
    assert_eq!(route.alternatives, vec!["generalist".to_string()]);
    assert_eq!(model.calls_for("bugfixer").len(), 1);
    assert!(model.calls_for("generalist").is_empty());
    assert_eq!(reasoner.decision_history().len(), 1);
}

#[tokio::test]
async fn test_route_list_without_reasoner_uses_bound_agent() {
    let model = MockModel::new(&[]);
    let engine = engine(agents(&[("a", "x"), ("b", "y")]), model.clone());
    let workflow = Workflow::builder("wf")
        .step(WorkflowStep::new("s", "a").route_among(["b"]))
        .build()
        .unwrap();
    let result = engine.execute(&workflow, RunContext::new()).await.unwrap();
    assert_eq!(result.step("s").unwrap().agent, "a");
    assert!(result.step("s").unwrap().route.is_none());
}

// ---------------------------------------------------------------------------
// Plugins, learner, monitor and collaboration
// ---------------------------------------------------------------------------

struct EchoPlugin;

#[async_trait]
impl Plugin for EchoPlugin {
    fn name(&self) -> &str {
        "echo"
    }
    fn version(&self) -> &str {
        "0.1.0"
    }
    fn initialize(&self, _config: &PluginConfig) -> AgentflowResult<()> {
        Ok(())
    }
    fn shutdown(&self) -> AgentflowResult<()> {
        Ok(())
    }
    fn tools(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor::new("echo", "Repeat the input")]
    }
    async fn call_tool(&self, call: ToolCall) -> AgentflowResult<ToolResult> {
        Ok(ToolResult::success(&call.id, call.arguments.to_string()))
    }
}

#[tokio::test]
async fn test_enabled_plugin_tools_reach_the_model() {
    let plugins = Arc::new(PluginRegistry::new());
    plugins.register(Arc::new(EchoPlugin)).unwrap();

    let model = MockModel::new(&[]);
    let mut registry = AgentRegistry::new();
    registry.insert(Agent::new("tooled", "x", model_id("tooled")).with_tools(["echo"]));
    registry.insert(Agent::new("plain", "y", model_id("plain")));
    let engine = engine(registry, model.clone()).with_plugins(plugins);

    let workflow = Workflow::builder("tools")
        .step(WorkflowStep::new("one", "tooled"))
        .step(WorkflowStep::new("two", "plain"))
        .build()
        .unwrap();
    engine.execute(&workflow, RunContext::new()).await.unwrap();

    let counts = model.tool_counts.lock().unwrap();
    assert_eq!(counts[&model_id("tooled")], 1);
    assert_eq!(counts[&model_id("plain")], 0);
}

#[tokio::test]
async fn test_run_feeds_monitor_learner_and_team() {
    let model = MockModel::new(&[("tester", Behavior::Slow(5_000))]);
    let learner = Arc::new(Learner::new(LearnerConfig::default()));
    let team = Arc::new(TeamCoordinator::new());
    let engine = engine(bdt_agents(), model)
        .with_learner(learner.clone())
        .with_collaboration(team.clone());

    let result = engine
        .execute(&build_test_deploy(), RunContext::new())
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::PartialFailure);

    // One metric event per step.
    let events = engine.monitor().recent_events(10).await;
    assert_eq!(events.len(), 3);
    let total = engine.monitor().aggregate_metrics().await;
    assert_eq!((total.completed, total.timed_out, total.skipped), (1, 1, 1));

    // One pattern per executed step; the skipped step leaves none.
    let stats = learner.stats();
    assert_eq!(stats.success_patterns, 1);
    assert_eq!(stats.error_patterns, 1);
    assert_eq!(learner.success_rate_for("agent", &json!("builder")), Some(1.0));
    assert_eq!(learner.success_rate_for("agent", &json!("tester")), Some(0.0));

    // Downstream agents hear about upstream outcomes.
    let tester_inbox = team.inbox("tester");
    assert_eq!(tester_inbox.len(), 1);
    assert_eq!(tester_inbox[0].sender, "builder");
    assert_eq!(tester_inbox[0].content, "step 'build' completed");
    assert_eq!(team.inbox("deployer")[0].content, "step 'test' timed_out");

    let session = result.session.as_ref().unwrap();
    assert_eq!(session.outcome.as_deref(), Some("partial_failure"));
    assert_eq!(session.messages.len(), 2);
    assert!(team.sessions().is_empty());
}

#[tokio::test]
async fn test_repeated_runs_leave_collaboration_state_bounded() {
    let model = MockModel::new(&[]);
    let team = Arc::new(TeamCoordinator::with_inbox_capacity(16));
    let engine = engine(agents(&[("a", "x"), ("b", "y")]), model).with_collaboration(team.clone());
    let workflow = Workflow::builder("pair")
        .step(WorkflowStep::new("first", "a").output("draft"))
        .step(WorkflowStep::new("second", "b").input("draft"))
        .build()
        .unwrap();

    for _ in 0..200 {
        let result = engine.execute(&workflow, RunContext::new()).await.unwrap();
        assert_eq!(result.session.unwrap().messages.len(), 1);
    }

    assert!(team.sessions().is_empty());
    assert_eq!(team.team_stats().open_sessions, 0);
    assert_eq!(team.inbox("b").len(), 16);
    assert_eq!(team.take_inbox("b").len(), 16);
    assert!(team.inbox("b").is_empty());
}

#[tokio::test]
async fn test_repeated_runs_accumulate_pattern_frequency() {
    let model = MockModel::new(&[]);
    let learner = Arc::new(Learner::new(LearnerConfig::default()));
    let engine = engine(agents(&[("coder", "code")]), model).with_learner(learner.clone());
    let workflow = Workflow::builder("nightly")
        .step(WorkflowStep::new("build", "coder"))
        .build()
        .unwrap();

    engine.execute(&workflow, RunContext::new()).await.unwrap();
    engine.execute(&workflow, RunContext::new()).await.unwrap();

    let patterns = learner.patterns(None);
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].frequency, 2);
}
