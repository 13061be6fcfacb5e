//! Integration tests for the shared pattern store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use agentflow_learner::*;
use std::collections::HashMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Frequency-weighted set
// ---------------------------------------------------------------------------

#[test]
fn test_identical_success_is_one_pattern_with_frequency_two() {
    let learner = Learner::default();
    let context: HashMap<String, serde_json::Value> =
        [("workflow".to_string(), serde_json::json!("bugfix"))].into();

    learner.learn_success("fix null pointer in parser", "guard clause", context.clone());
    learner.learn_success("fix null pointer in parser", "guard clause", context);

    let patterns = learner.patterns(Some(PatternType::Success));
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].frequency, 2);
    assert_eq!(learner.stats().total_observations, 2);
}

#[tokio::test]
async fn test_concurrent_learning_never_duplicates() {
    let learner = Arc::new(Learner::default());
    let mut handles = Vec::new();
    for _ in 0..16 {
        let learner = learner.clone();
        handles.push(tokio::spawn(async move {
            learner.learn_error("connection reset", "retry", HashMap::new());
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(learner.len(), 1);
    assert_eq!(learner.patterns(None)[0].frequency, 16);
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

#[test]
fn test_strategy_is_swappable_without_changing_storage() {
    let exact = Learner::with_strategy(LearnerConfig::default(), Box::new(ExactMatch));
    let fuzzy = Learner::with_strategy(LearnerConfig::default(), Box::new(TrigramSimilarity));

    for learner in [&exact, &fuzzy] {
        learner.learn_success("optimize docker image", "multi-stage build", HashMap::new());
    }

    assert!(exact.find_similar("optimise docker image", None).is_empty());
    let hits = fuzzy.find_similar("optimise docker image", None);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].pattern.approach(), Some("multi-stage build"));

    // Equivalence for frequency counting stays normalized-exact either way.
    fuzzy.learn_success("Optimize Docker image!", "multi-stage build", HashMap::new());
    assert_eq!(fuzzy.len(), 1);
}

#[test]
fn test_recommendation_none_means_no_guidance() {
    let learner = Learner::default();
    learner.learn_error("flaky integration test", "quarantine", HashMap::new());
    // Error patterns never produce recommendations.
    assert!(learner.get_recommendation("flaky integration test").is_none());
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_snapshot_round_trip_preserves_frequencies() {
    let dir = tempfile::tempdir().unwrap();
    let store = FilePatternStore::new(dir.path().join("learner.json"));

    let learner = Learner::default();
    for _ in 0..3 {
        learner.learn("nightly build green", HashMap::new());
    }
    store.save(&learner).await.unwrap();

    let fresh = Learner::default();
    store.load(&fresh).await.unwrap();
    assert_eq!(fresh.patterns(None)[0].frequency, 3);
    assert_eq!(fresh.patterns(None)[0].pattern_type, PatternType::General);
}
