use crate::decision::DecisionEngine;
use crate::types::*;
use agentflow_core::{AgentflowError, AgentflowResult};
use agentflow_learner::{normalize, tokenize, Learner, PatternType};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

/// Reasoner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerConfig {
    /// Maximum decision records kept; the oldest are dropped first.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_history_limit() -> usize {
    500
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
        }
    }
}

const MULTI_STEP_WORDS: &[&str] = &["then", "after", "steps", "multiple", "pipeline", "sequence", "finally"];
const PARALLEL_WORDS: &[&str] = &["parallel", "concurrent", "concurrently", "simultaneous", "simultaneously"];
const ERROR_WORDS: &[&str] = &["error", "exception", "bug", "crash", "failure", "failing", "broken"];
const INTEGRATION_WORDS: &[&str] = &["integration", "integrate", "api", "webhook", "third", "external"];

/// Tokens that say nothing about which workflow fits.
const GENERIC_WORDS: &[&str] = &["workflow", "flow", "the", "and", "for", "with", "to", "of", "in"];

const SUBJECT_MAX_CHARS: usize = 100;

/// Task analysis and routing.
///
/// Stateless apart from the decision history, which sits behind a mutex so
/// one `Arc<Reasoner>` can serve concurrent workflow runs. An attached
/// [`Learner`] is only read.
pub struct Reasoner {
    config: ReasonerConfig,
    learner: Option<Arc<Learner>>,
    rules: DecisionEngine,
    history: Mutex<VecDeque<DecisionRecord>>,
}

impl Reasoner {
    /// Reasoner with no learner and no rules.
    pub fn new(config: ReasonerConfig) -> Self {
        Self {
            config,
            learner: None,
            rules: DecisionEngine::new(),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Read past success rates from `learner` to break routing ties.
    pub fn with_learner(mut self, learner: Arc<Learner>) -> Self {
        self.learner = Some(learner);
        self
    }

    /// Decision rules consulted by [`Reasoner::make_decision`].
    pub fn rules(&self) -> &DecisionEngine {
        &self.rules
    }

    /// Score a task from 1 to 10 and bucket it into an [`AgentStrategy`].
    pub fn analyze_task_complexity(&self, task: &str, context: &DecisionContext) -> TaskComplexity {
        let words: HashSet<String> = tokenize(task).into_iter().collect();
        let has_any = |list: &[&str]| list.iter().any(|w| words.contains(*w));

        let mut factors = Vec::new();
        let mut score: i32 = 1;
        let mut add = |factor: &str, points: i32| {
            factors.push(factor.to_string());
            score += points;
        };

        if task.chars().count() > 100 {
            add("long_description", 2);
        }
        if has_any(MULTI_STEP_WORDS) {
            add("multi_step", 2);
        }
        if has_any(PARALLEL_WORDS) {
            add("parallel_execution", 2);
        }
        if has_any(ERROR_WORDS) {
            add("error_handling", 1);
        }
        if has_any(INTEGRATION_WORDS) {
            add("integration_required", 2);
        }
        if context.get("priority").and_then(|v| v.as_str()) == Some("critical") {
            add("critical_priority", 2);
        }
        if context.get("requires_approval").and_then(|v| v.as_bool()) == Some(true) {
            add("requires_approval", 3);
        }

        if let Some(learner) = &self.learner {
            if !learner.find_similar(task, Some(PatternType::Error)).is_empty() {
                add("known_failures", 1);
            }
            if learner.get_recommendation(task).is_some() {
                add("known_solution", -1);
            }
        }

        let score = score.clamp(1, 10) as u8;
        let recommendation = match score {
            0..=3 => AgentStrategy::SingleAgent,
            4..=7 => AgentStrategy::MultiAgent,
            _ => AgentStrategy::EscalateToHuman,
        };
        debug!(score, ?factors, ?recommendation, "Task complexity analyzed");

        TaskComplexity {
            score,
            factors,
            recommendation,
        }
    }

    /// Execution mode for a task. An `execution_mode` entry in `context`
    /// overrides the score-based choice.
    pub fn recommend_execution_mode(&self, task: &str, context: &DecisionContext) -> ExecutionMode {
        if let Some(mode) = context
            .get("execution_mode")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
        {
            return mode;
        }

        match self.analyze_task_complexity(task, context).score {
            0..=3 => ExecutionMode::Sequential,
            7.. => ExecutionMode::Parallel,
            _ => ExecutionMode::Hybrid,
        }
    }

    /// Pick the candidate that best fits `task`.
    ///
    /// Candidates are ranked by token overlap with their name (weighted
    /// double, substring matches count for compound names) and description.
    /// Ties go to the better historical success rate, then to input order.
    /// Without any overlap the first candidate is returned with confidence
    /// 0. Only an empty candidate list is an error.
    pub fn route_task(
        &self,
        task: &str,
        candidates: &[WorkflowCandidate],
    ) -> AgentflowResult<RouteResult> {
        self.route_with_history_key(task, candidates, "workflow")
    }

    /// [`route_task`](Self::route_task) with success history looked up
    /// under `history_key` instead of `"workflow"`, e.g. `"agent"` when the
    /// candidates are agents.
    pub fn route_with_history_key(
        &self,
        task: &str,
        candidates: &[WorkflowCandidate],
        history_key: &str,
    ) -> AgentflowResult<RouteResult> {
        if candidates.is_empty() {
            return Err(AgentflowError::Routing(
                "no workflows available to route to".into(),
            ));
        }

        let task_tokens = significant_tokens(task);
        let normalized_task = normalize(task);

        let mut ranked: Vec<(usize, f64, f64, Vec<String>)> = candidates
            .iter()
            .enumerate()
            .map(|(index, candidate)| {
                let (confidence, matched) =
                    score_candidate(&task_tokens, &normalized_task, candidate);
                let history = self
                    .success_rate(history_key, &candidate.name)
                    .unwrap_or(0.5);
                (index, confidence, history, matched)
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal))
                .then_with(|| a.0.cmp(&b.0))
        });

        let (best_index, confidence, _, matched) = &ranked[0];
        let result = if *confidence > 0.0 {
            let workflow = candidates[*best_index].name.clone();
            RouteResult {
                reasoning: format!(
                    "routed to '{workflow}': task terms {} match (confidence {confidence:.2})",
                    matched
                        .iter()
                        .map(|t| format!("'{t}'"))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                workflow,
                confidence: *confidence,
                alternatives: ranked[1..]
                    .iter()
                    .map(|(i, ..)| candidates[*i].name.clone())
                    .collect(),
            }
        } else {
            let workflow = candidates[0].name.clone();
            RouteResult {
                reasoning: format!(
                    "no strong match for task; defaulting to first available workflow '{workflow}'"
                ),
                workflow,
                confidence: 0.0,
                alternatives: candidates[1..].iter().map(|c| c.name.clone()).collect(),
            }
        };

        info!(
            workflow = %result.workflow,
            confidence = result.confidence,
            alternatives = result.alternatives.len(),
            "Task routed"
        );
        self.push_history(DecisionRecord {
            kind: DecisionKind::Route,
            subject: truncate(task),
            choice: result.workflow.clone(),
            confidence: Some(result.confidence),
            reasoning: result.reasoning.clone(),
            timestamp: Utc::now(),
        });
        Ok(result)
    }

    /// Choose among `options`.
    ///
    /// The first decision rule that fires for one of the options wins.
    /// Otherwise each option is scored as the sum of `criteria` weight ×
    /// the option's score for that criterion, and the highest total wins
    /// (earliest option on ties).
    pub fn make_decision(
        &self,
        options: &[DecisionOption],
        criteria: &HashMap<String, f64>,
        context: &DecisionContext,
    ) -> AgentflowResult<Decision> {
        if options.is_empty() {
            return Err(AgentflowError::Routing("no options provided".into()));
        }

        let names: Vec<&str> = options.iter().map(|o| o.name.as_str()).collect();
        let alternatives = |selected: &str| {
            names
                .iter()
                .filter(|n| **n != selected)
                .map(|n| (*n).to_string())
                .collect::<Vec<_>>()
        };

        let decision = match self.rules.first_match(&names, context) {
            Some((rule, selected)) => Decision {
                reasoning: format!("rule '{rule}' selected '{selected}'"),
                alternatives: alternatives(&selected),
                rule: Some(rule),
                score: None,
                selected,
            },
            None => {
                let weighted = |option: &DecisionOption| -> f64 {
                    criteria
                        .iter()
                        .map(|(criterion, weight)| {
                            weight * option.scores.get(criterion).copied().unwrap_or(0.0)
                        })
                        .sum()
                };
                let mut best = &options[0];
                let mut best_score = weighted(best);
                for option in &options[1..] {
                    let score = weighted(option);
                    if score > best_score {
                        best = option;
                        best_score = score;
                    }
                }
                Decision {
                    selected: best.name.clone(),
                    reasoning: if criteria.is_empty() {
                        format!("no rule fired and no criteria given; selected '{}'", best.name)
                    } else {
                        format!(
                            "no rule fired; '{}' has the best weighted score ({best_score:.2})",
                            best.name
                        )
                    },
                    rule: None,
                    score: Some(best_score),
                    alternatives: alternatives(&best.name),
                }
            }
        };

        debug!(selected = %decision.selected, rule = ?decision.rule, "Decision made");
        self.push_history(DecisionRecord {
            kind: DecisionKind::Decision,
            subject: truncate(&names.join(" | ")),
            choice: decision.selected.clone(),
            confidence: decision.score,
            reasoning: decision.reasoning.clone(),
            timestamp: Utc::now(),
        });
        Ok(decision)
    }

    /// Past route and decision records, oldest first.
    pub fn decision_history(&self) -> Vec<DecisionRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// Forget all decision records.
    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    fn success_rate(&self, key: &str, name: &str) -> Option<f64> {
        self.learner
            .as_ref()
            .and_then(|l| l.success_rate_for(key, &serde_json::Value::from(name)))
    }

    fn push_history(&self, record: DecisionRecord) {
        if self.config.history_limit == 0 {
            return;
        }
        let mut history = self.history.lock();
        while history.len() >= self.config.history_limit {
            history.pop_front();
        }
        history.push_back(record);
    }
}

impl Default for Reasoner {
    fn default() -> Self {
        Self::new(ReasonerConfig::default())
    }
}

fn significant_tokens(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| !GENERIC_WORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Whether a task token and a name token refer to the same thing. Tokens of
/// three or more characters also match inside each other, so "bug" and "fix"
/// both match "bugfix".
fn tokens_match(task_token: &str, name_token: &str) -> bool {
    task_token == name_token
        || (task_token.len() >= 3
            && name_token.len() >= 3
            && (name_token.contains(task_token) || task_token.contains(name_token)))
}

/// Returns the candidate's confidence and the task tokens that matched.
fn score_candidate(
    task_tokens: &[String],
    normalized_task: &str,
    candidate: &WorkflowCandidate,
) -> (f64, Vec<String>) {
    if task_tokens.is_empty() {
        return (0.0, Vec::new());
    }

    let name_tokens = significant_tokens(&candidate.name);
    let description_tokens: HashSet<String> = candidate
        .description
        .as_deref()
        .map(significant_tokens)
        .unwrap_or_default()
        .into_iter()
        .collect();

    let mut matched = Vec::new();
    let mut points = 0.0;
    for token in task_tokens {
        if name_tokens.iter().any(|n| tokens_match(token, n)) {
            points += 2.0;
            matched.push(token.clone());
        } else if description_tokens.contains(token) {
            points += 1.0;
            matched.push(token.clone());
        }
    }

    let mut confidence = (points / (2.0 * task_tokens.len() as f64)).min(1.0);

    // The full candidate name spelled out in the task is a strong signal.
    let normalized_name = normalize(&candidate.name);
    if !normalized_name.is_empty() && normalized_task.contains(&normalized_name) {
        confidence = confidence.max(0.9);
    }
    (confidence, matched)
}

fn truncate(text: &str) -> String {
    text.chars().take(SUBJECT_MAX_CHARS).collect()
}
