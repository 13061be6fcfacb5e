use crate::types::StepStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const DEFAULT_EVENT_CAPACITY: usize = 1_000;

/// One step outcome, emitted by the engine when the step reaches a
/// terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    /// Run the step belonged to.
    pub run_id: Uuid,
    /// Workflow name.
    pub workflow: String,
    /// Step name.
    pub step: String,
    /// Agent that ran the step.
    pub agent: String,
    /// Terminal status.
    pub status: StepStatus,
    /// Attempts made, 0 if the step never ran.
    pub attempts: u32,
    /// Tool calls made by the final attempt.
    pub tool_calls: usize,
    /// Wall time across all attempts.
    pub duration_ms: u64,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Counters for one agent, or for all agents when aggregated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Steps that completed.
    pub completed: u64,
    /// Steps that failed.
    pub failed: u64,
    /// Steps that timed out.
    pub timed_out: u64,
    /// Steps that were skipped.
    pub skipped: u64,
    /// Steps cancelled by a workflow deadline.
    pub cancelled: u64,
    /// Attempts beyond the first.
    pub retries: u64,
    /// Tool calls across all steps.
    pub tool_calls: u64,
    /// Total step wall time.
    pub duration_ms: u64,
}

impl AgentMetrics {
    /// Steps that actually ran to a result.
    pub fn executed(&self) -> u64 {
        self.completed + self.failed + self.timed_out
    }

    fn add(&mut self, other: &AgentMetrics) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.timed_out += other.timed_out;
        self.skipped += other.skipped;
        self.cancelled += other.cancelled;
        self.retries += other.retries;
        self.tool_calls += other.tool_calls;
        self.duration_ms += other.duration_ms;
    }
}

/// Overall health derived from the error rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Error rate below 10%.
    Healthy,
    /// Error rate below 50%.
    Degraded,
    /// Error rate of 50% or more.
    Unhealthy,
}

/// Point-in-time health of everything the monitor has seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Health bucket.
    pub status: HealthStatus,
    /// Failed and timed-out steps over executed steps.
    pub error_rate: f64,
    /// Steps recorded, whatever their status.
    pub total_steps: u64,
}

#[derive(Default)]
struct MonitorState {
    agents: HashMap<String, AgentMetrics>,
    events: VecDeque<MetricEvent>,
}

/// Collects step metrics emitted by the execution engine. Read-only from
/// everyone else's point of view: it never influences scheduling.
pub struct Monitor {
    state: Arc<RwLock<MonitorState>>,
    capacity: usize,
}

impl Monitor {
    /// Monitor keeping the default number of recent events.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Keep at most `capacity` recent events. Per-agent counters are
    /// unaffected by the bound.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(MonitorState::default())),
            capacity,
        }
    }

    /// Record a step outcome.
    pub async fn record(&self, event: MetricEvent) {
        let mut state = self.state.write().await;
        let metrics = state.agents.entry(event.agent.clone()).or_default();
        match event.status {
            StepStatus::Completed => metrics.completed += 1,
            StepStatus::Failed => metrics.failed += 1,
            StepStatus::TimedOut => metrics.timed_out += 1,
            StepStatus::Skipped => metrics.skipped += 1,
            StepStatus::Cancelled => metrics.cancelled += 1,
            StepStatus::Pending | StepStatus::Running => {}
        }
        metrics.retries += u64::from(event.attempts.saturating_sub(1));
        metrics.tool_calls += event.tool_calls as u64;
        metrics.duration_ms += event.duration_ms;

        if self.capacity == 0 {
            return;
        }
        if state.events.len() >= self.capacity {
            state.events.pop_front();
        }
        state.events.push_back(event);
    }

    /// Metrics of a specific agent.
    pub async fn agent_metrics(&self, agent: &str) -> Option<AgentMetrics> {
        self.state.read().await.agents.get(agent).cloned()
    }

    /// Per-agent metrics, sorted by agent name.
    pub async fn snapshot(&self) -> Vec<(String, AgentMetrics)> {
        let state = self.state.read().await;
        let mut agents: Vec<(String, AgentMetrics)> = state
            .agents
            .iter()
            .map(|(name, m)| (name.clone(), m.clone()))
            .collect();
        agents.sort_by(|a, b| a.0.cmp(&b.0));
        agents
    }

    /// Aggregate metrics across all agents.
    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let state = self.state.read().await;
        let mut total = AgentMetrics::default();
        for metrics in state.agents.values() {
            total.add(metrics);
        }
        total
    }

    /// Up to `limit` most recent events, oldest first.
    pub async fn recent_events(&self, limit: usize) -> Vec<MetricEvent> {
        let state = self.state.read().await;
        let skip = state.events.len().saturating_sub(limit);
        state.events.iter().skip(skip).cloned().collect()
    }

    /// Health from the error rate: below 10% healthy, below 50% degraded.
    pub async fn health(&self) -> HealthSnapshot {
        let total = self.aggregate_metrics().await;
        let executed = total.executed();
        let error_rate = if executed == 0 {
            0.0
        } else {
            (total.failed + total.timed_out) as f64 / executed as f64
        };
        let status = if error_rate < 0.1 {
            HealthStatus::Healthy
        } else if error_rate < 0.5 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };
        HealthSnapshot {
            status,
            error_rate,
            total_steps: executed + total.skipped + total.cancelled,
        }
    }

    /// Serialize the current state as JSON, e.g. for a dashboard.
    pub async fn to_json(&self) -> serde_json::Value {
        let agents: serde_json::Map<String, serde_json::Value> = self
            .snapshot()
            .await
            .into_iter()
            .map(|(name, m)| (name, serde_json::to_value(m).unwrap_or_default()))
            .collect();
        let aggregate = self.aggregate_metrics().await;
        let health = self.health().await;
        serde_json::json!({
            "agents": agents,
            "aggregate": aggregate,
            "health": health,
        })
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn event(agent: &str, status: StepStatus, attempts: u32) -> MetricEvent {
        MetricEvent {
            run_id: Uuid::new_v4(),
            workflow: "wf".into(),
            step: format!("{agent}-step"),
            agent: agent.into(),
            status,
            attempts,
            tool_calls: 2,
            duration_ms: 100,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_initial_state() {
        let monitor = Monitor::new();
        assert!(monitor.snapshot().await.is_empty());
        let health = monitor.health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.total_steps, 0);
    }

    #[tokio::test]
    async fn test_record_metrics() {
        let monitor = Monitor::new();
        monitor.record(event("coder", StepStatus::Completed, 1)).await;
        monitor.record(event("coder", StepStatus::Failed, 3)).await;

        let metrics = monitor.agent_metrics("coder").await.unwrap();
        assert_eq!(metrics.completed, 1);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.retries, 2);
        assert_eq!(metrics.tool_calls, 4);
        assert_eq!(metrics.duration_ms, 200);
        assert!(monitor.agent_metrics("tester").await.is_none());
    }

    #[tokio::test]
    async fn test_aggregate_metrics() {
        let monitor = Monitor::new();
        monitor.record(event("coder", StepStatus::Completed, 1)).await;
        monitor.record(event("tester", StepStatus::TimedOut, 1)).await;
        monitor.record(event("ops", StepStatus::Skipped, 0)).await;

        let total = monitor.aggregate_metrics().await;
        assert_eq!(total.completed, 1);
        assert_eq!(total.timed_out, 1);
        assert_eq!(total.skipped, 1);
        assert_eq!(total.executed(), 2);
    }

    #[tokio::test]
    async fn test_health_thresholds() {
        let monitor = Monitor::new();
        for _ in 0..9 {
            monitor.record(event("coder", StepStatus::Completed, 1)).await;
        }
        monitor.record(event("coder", StepStatus::Failed, 1)).await;
        // 1 in 10 is exactly the degraded threshold.
        assert_eq!(monitor.health().await.status, HealthStatus::Degraded);

        let monitor = Monitor::new();
        monitor.record(event("coder", StepStatus::Failed, 1)).await;
        monitor.record(event("coder", StepStatus::Completed, 1)).await;
        let health = monitor.health().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!((health.error_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_recent_events_are_bounded() {
        let monitor = Monitor::with_capacity(3);
        for status in [
            StepStatus::Completed,
            StepStatus::Failed,
            StepStatus::Skipped,
            StepStatus::Cancelled,
        ] {
            monitor.record(event("coder", status, 1)).await;
        }
        let events = monitor.recent_events(10).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].status, StepStatus::Failed);
        assert_eq!(monitor.recent_events(1).await[0].status, StepStatus::Cancelled);
        // Counters still see all four.
        assert_eq!(monitor.aggregate_metrics().await.completed, 1);
    }

    #[tokio::test]
    async fn test_to_json() {
        let monitor = Monitor::new();
        monitor.record(event("coder", StepStatus::Completed, 1)).await;
        let json = monitor.to_json().await;
        assert_eq!(json["agents"]["coder"]["completed"], 1);
        assert_eq!(json["aggregate"]["completed"], 1);
        assert_eq!(json["health"]["status"], "healthy");
    }
}
