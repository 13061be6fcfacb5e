use std::collections::HashSet;

/// Scores how alike two descriptions are, in `0.0..=1.0`.
///
/// Implementations receive raw text and normalize it themselves.
pub trait SimilarityStrategy: Send + Sync {
    /// Strategy name, for logs.
    fn name(&self) -> &str;

    /// Similarity of `a` and `b`.
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Lowercase, replace punctuation with spaces, collapse whitespace.
pub fn normalize(text: &str) -> String {
    text.chars()
        .flat_map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().collect::<Vec<_>>()
            } else {
                vec![' ']
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Word tokens of length > 1, lowercased.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() > 1)
        .collect()
}

/// 1.0 when the normalized texts are equal, else 0.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl SimilarityStrategy for ExactMatch {
    fn name(&self) -> &str {
        "exact"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        if normalize(a) == normalize(b) {
            1.0
        } else {
            0.0
        }
    }
}

/// Jaccard index over word token sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenJaccard;

impl SimilarityStrategy for TokenJaccard {
    fn name(&self) -> &str {
        "token_jaccard"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        let a: HashSet<String> = tokenize(a).into_iter().collect();
        let b: HashSet<String> = tokenize(b).into_iter().collect();
        jaccard(&a, &b)
    }
}

/// Sørensen–Dice coefficient over character trigrams. Tolerates typos and
/// inflections that token matching misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrigramSimilarity;

impl TrigramSimilarity {
    fn trigrams(text: &str) -> HashSet<[char; 3]> {
        let padded: Vec<char> = format!("  {} ", normalize(text)).chars().collect();
        padded.windows(3).map(|w| [w[0], w[1], w[2]]).collect()
    }
}

impl SimilarityStrategy for TrigramSimilarity {
    fn name(&self) -> &str {
        "trigram"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        if normalize(a).is_empty() || normalize(b).is_empty() {
            return 0.0;
        }
        let a = Self::trigrams(a);
        let b = Self::trigrams(b);
        let shared = a.intersection(&b).count();
        (2 * shared) as f64 / (a.len() + b.len()) as f64
    }
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.union(b).count();
    shared as f64 / union as f64
}
