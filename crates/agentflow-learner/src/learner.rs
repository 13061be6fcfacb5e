use crate::pattern::{LearnerStats, Pattern, PatternType, Recommendation, SimilarPattern};
use crate::similarity::{normalize, SimilarityStrategy, TokenJaccard};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info};

/// Tuning for the pattern store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerConfig {
    /// Minimum similarity for `find_similar` hits.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Minimum confidence for `get_recommendation` to return guidance.
    #[serde(default = "default_recommendation_threshold")]
    pub recommendation_threshold: f64,
    /// Capacity. Inserting past it evicts the least useful pattern.
    #[serde(default = "default_max_patterns")]
    pub max_patterns: usize,
    /// Maximum hits returned by `find_similar`.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_similarity_threshold() -> f64 {
    0.3
}

fn default_recommendation_threshold() -> f64 {
    0.5
}

fn default_max_patterns() -> usize {
    1_000
}

fn default_max_results() -> usize {
    10
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            recommendation_threshold: default_recommendation_threshold(),
            max_patterns: default_max_patterns(),
            max_results: default_max_results(),
        }
    }
}

/// Pattern store: a frequency-weighted set of past outcomes.
///
/// Recording an outcome equivalent to a stored one (same type, same
/// normalized description) bumps that pattern's frequency instead of adding
/// an entry. All access goes through one lock, so a single `Arc<Learner>`
/// can serve concurrent workflow runs.
pub struct Learner {
    config: LearnerConfig,
    strategy: Box<dyn SimilarityStrategy>,
    patterns: RwLock<Vec<Pattern>>,
}

impl Learner {
    /// Learner with token-overlap similarity.
    pub fn new(config: LearnerConfig) -> Self {
        Self::with_strategy(config, Box::new(TokenJaccard))
    }

    /// Learner with a custom similarity strategy.
    pub fn with_strategy(config: LearnerConfig, strategy: Box<dyn SimilarityStrategy>) -> Self {
        Self {
            config,
            strategy,
            patterns: RwLock::new(Vec::new()),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    /// Record a successful task and the approach that worked.
    pub fn learn_success(
        &self,
        task: &str,
        approach: &str,
        mut context: HashMap<String, serde_json::Value>,
    ) -> Pattern {
        context.insert("approach".into(), approach.into());
        self.record(PatternType::Success, task, context)
    }

    /// Record an error and how it was resolved.
    pub fn learn_error(
        &self,
        error: &str,
        resolution: &str,
        mut context: HashMap<String, serde_json::Value>,
    ) -> Pattern {
        context.insert("resolution".into(), resolution.into());
        self.record(PatternType::Error, error, context)
    }

    /// Record a general observation.
    pub fn learn(&self, description: &str, context: HashMap<String, serde_json::Value>) -> Pattern {
        self.record(PatternType::General, description, context)
    }

    fn record(
        &self,
        pattern_type: PatternType,
        description: &str,
        context: HashMap<String, serde_json::Value>,
    ) -> Pattern {
        let key = normalize(description);
        let mut patterns = self.patterns.write();

        if let Some(existing) = patterns
            .iter_mut()
            .find(|p| p.pattern_type == pattern_type && normalize(&p.description) == key)
        {
            existing.frequency = existing.frequency.saturating_add(1);
            existing.last_seen = Utc::now();
            existing.context.extend(context);
            debug!(
                pattern_type = %pattern_type,
                frequency = existing.frequency,
                "Pattern recurred"
            );
            return existing.clone();
        }

        if self.config.max_patterns > 0 && patterns.len() >= self.config.max_patterns {
            evict_one(&mut patterns);
        }

        let pattern = Pattern::new(pattern_type, description, context);
        info!(pattern_type = %pattern_type, id = %pattern.id, "Pattern learned");
        patterns.push(pattern.clone());
        pattern
    }

    /// Patterns whose description is similar to `query`, best first.
    ///
    /// Ordered by similarity, then frequency, both descending; at most
    /// `max_results` hits at or above `similarity_threshold`.
    pub fn find_similar(&self, query: &str, pattern_type: Option<PatternType>) -> Vec<SimilarPattern> {
        let patterns = self.patterns.read();
        let mut hits: Vec<SimilarPattern> = patterns
            .iter()
            .filter(|p| pattern_type.map_or(true, |t| p.pattern_type == t))
            .filter_map(|p| {
                let similarity = self.strategy.similarity(query, &p.description);
                (similarity >= self.config.similarity_threshold).then(|| SimilarPattern {
                    pattern: p.clone(),
                    similarity,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.pattern.frequency.cmp(&a.pattern.frequency))
        });
        hits.truncate(self.config.max_results);
        hits
    }

    /// The approach of the best matching success pattern, if confident enough.
    ///
    /// Confidence blends similarity (70%) with how often the pattern was
    /// seen (30%, saturating at ten observations). `None` means no guidance.
    pub fn get_recommendation(&self, task: &str) -> Option<Recommendation> {
        self.find_similar(task, Some(PatternType::Success))
            .into_iter()
            .filter_map(|hit| {
                let approach = hit.pattern.approach()?.to_string();
                let seen = (f64::from(hit.pattern.frequency) / 10.0).min(1.0);
                Some(Recommendation {
                    task: task.to_string(),
                    approach,
                    confidence: 0.7 * hit.similarity + 0.3 * seen,
                    frequency: hit.pattern.frequency,
                })
            })
            .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(Ordering::Equal))
            .filter(|r| r.confidence >= self.config.recommendation_threshold)
    }

    /// Frequency-weighted success ratio over patterns whose context has
    /// `key == value`. `None` when there is no success or error data.
    pub fn success_rate_for(&self, key: &str, value: &serde_json::Value) -> Option<f64> {
        let patterns = self.patterns.read();
        let (mut successes, mut total) = (0u64, 0u64);
        for p in patterns.iter().filter(|p| p.context.get(key) == Some(value)) {
            match p.pattern_type {
                PatternType::Success => {
                    successes += u64::from(p.frequency);
                    total += u64::from(p.frequency);
                }
                PatternType::Error => total += u64::from(p.frequency),
                PatternType::General => {}
            }
        }
        (total > 0).then(|| successes as f64 / total as f64)
    }

    /// Counts by pattern type and total observations.
    pub fn stats(&self) -> LearnerStats {
        let patterns = self.patterns.read();
        let count = |t: PatternType| patterns.iter().filter(|p| p.pattern_type == t).count();
        LearnerStats {
            total_patterns: patterns.len(),
            success_patterns: count(PatternType::Success),
            error_patterns: count(PatternType::Error),
            general_patterns: count(PatternType::General),
            total_observations: patterns.iter().map(|p| u64::from(p.frequency)).sum(),
        }
    }

    /// Snapshot of all patterns, optionally of one type.
    pub fn patterns(&self, pattern_type: Option<PatternType>) -> Vec<Pattern> {
        self.patterns
            .read()
            .iter()
            .filter(|p| pattern_type.map_or(true, |t| p.pattern_type == t))
            .cloned()
            .collect()
    }

    /// Replace the store's contents, e.g. from a persisted snapshot.
    /// Patterns beyond capacity are evicted with the usual policy.
    pub fn restore(&self, restored: Vec<Pattern>) {
        let mut patterns = self.patterns.write();
        *patterns = restored;
        if self.config.max_patterns > 0 {
            while patterns.len() > self.config.max_patterns {
                evict_one(&mut patterns);
            }
        }
        info!(count = patterns.len(), "Pattern store restored");
    }

    /// Drop patterns not seen within `age`. Returns how many were removed.
    pub fn prune_older_than(&self, age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - age;
        let mut patterns = self.patterns.write();
        let before = patterns.len();
        patterns.retain(|p| p.last_seen >= cutoff);
        let removed = before - patterns.len();
        if removed > 0 {
            info!(removed, "Pruned stale patterns");
        }
        removed
    }

    /// Number of stored patterns.
    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    /// Whether no pattern is stored.
    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }

    /// Forget every pattern.
    pub fn clear(&self) {
        self.patterns.write().clear();
    }
}

impl Default for Learner {
    fn default() -> Self {
        Self::new(LearnerConfig::default())
    }
}

/// Remove the lowest-frequency pattern; the least recently seen goes first among ties.
fn evict_one(patterns: &mut Vec<Pattern>) {
    let victim = patterns
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.frequency
                .cmp(&b.frequency)
                .then_with(|| a.last_seen.cmp(&b.last_seen))
        })
        .map(|(i, _)| i);

    if let Some(index) = victim {
        let evicted = patterns.remove(index);
        debug!(
            id = %evicted.id,
            frequency = evicted.frequency,
            "Pattern evicted"
        );
    }
}
