use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Kind of outcome a pattern records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Something worked.
    Success,
    /// Something failed.
    Error,
    /// A neutral observation.
    General,
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternType::Success => write!(f, "success"),
            PatternType::Error => write!(f, "error"),
            PatternType::General => write!(f, "general"),
        }
    }
}

/// A learned, frequency-weighted record of a past outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Stable id, kept across recurrences.
    pub id: Uuid,
    /// Kind of outcome.
    pub pattern_type: PatternType,
    /// Description as first recorded.
    pub description: String,
    /// Details merged from every recurrence.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// When the pattern was first seen.
    pub timestamp: DateTime<Utc>,
    /// When an equivalent pattern was last recorded.
    pub last_seen: DateTime<Utc>,
    /// How many times an equivalent pattern was recorded.
    pub frequency: u32,
}

impl Pattern {
    /// A first sighting: frequency 1, both timestamps now.
    pub fn new(
        pattern_type: PatternType,
        description: impl Into<String>,
        context: HashMap<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pattern_type,
            description: description.into(),
            context,
            timestamp: now,
            last_seen: now,
            frequency: 1,
        }
    }

    /// The recorded approach of a success pattern, if any.
    pub fn approach(&self) -> Option<&str> {
        self.context.get("approach").and_then(|v| v.as_str())
    }

    /// The recorded resolution of an error pattern, if any.
    pub fn resolution(&self) -> Option<&str> {
        self.context.get("resolution").and_then(|v| v.as_str())
    }
}

/// A pattern returned by a similarity lookup.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarPattern {
    /// The stored pattern.
    pub pattern: Pattern,
    /// Score from the similarity strategy, `0.0..=1.0`.
    pub similarity: f64,
}

/// Guidance derived from past successes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Description of the past task.
    pub task: String,
    /// The approach that worked.
    pub approach: String,
    /// Blend of similarity and frequency, `0.0..=1.0`.
    pub confidence: f64,
    /// How often the past task was seen.
    pub frequency: u32,
}

/// Summary counts over the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerStats {
    /// All stored patterns.
    pub total_patterns: usize,
    /// Success patterns.
    pub success_patterns: usize,
    /// Error patterns.
    pub error_patterns: usize,
    /// General patterns.
    pub general_patterns: usize,
    /// Sum of all frequencies.
    pub total_observations: u64,
}
