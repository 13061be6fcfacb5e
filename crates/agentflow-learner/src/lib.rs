//! Pattern store for Agentflow.
//!
//! The [`Learner`] keeps a bounded, frequency-weighted set of past outcomes
//! (successes, errors, general observations) and answers similarity
//! queries over them. Similarity is a pluggable [`SimilarityStrategy`].
//! Persistence is optional; see [`FilePatternStore`].

/// The pattern store.
pub mod learner;
/// Pattern data types.
pub mod pattern;
/// JSON snapshot persistence.
pub mod persistence;
/// Similarity strategies.
pub mod similarity;

pub use learner::{Learner, LearnerConfig};
pub use pattern::{LearnerStats, Pattern, PatternType, Recommendation, SimilarPattern};
pub use persistence::FilePatternStore;
pub use similarity::{normalize, tokenize, ExactMatch, SimilarityStrategy, TokenJaccard, TrigramSimilarity};
