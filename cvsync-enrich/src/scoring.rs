//! Fuzzy scoring and match classification
//!
//! Scores compare loose-keys of two names. Classification of a ranked
//! candidate list is policy, not incidental: the thresholds live in
//! [`MatchPolicy`] and come from configuration.

use crate::normalize::loose_key;
use crate::types::{Candidate, MatchTier};
use serde::{Deserialize, Serialize};

/// Top score at or above which a match is exact
pub const DEFAULT_EXACT_THRESHOLD: f64 = 0.95;

/// Top score below which nothing matched
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.6;

/// A runner-up within this distance of the top score makes the match ambiguous
pub const DEFAULT_AMBIGUITY_MARGIN: f64 = 0.05;

/// Float slack applied to threshold comparisons (0.93 - 0.05 vs 0.88)
const SCORE_EPSILON: f64 = 1e-9;

/// String similarity metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// 2 * LCS / (|a| + |b|), close to difflib's SequenceMatcher ratio
    #[default]
    Lcs,
    /// Normalized Levenshtein (strsim)
    Levenshtein,
    /// Jaro-Winkler (strsim)
    JaroWinkler,
}

/// Classification thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchPolicy {
    pub exact_threshold: f64,
    pub fuzzy_threshold: f64,
    pub ambiguity_margin: f64,
    pub metric: SimilarityMetric,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            exact_threshold: DEFAULT_EXACT_THRESHOLD,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            ambiguity_margin: DEFAULT_AMBIGUITY_MARGIN,
            metric: SimilarityMetric::default(),
        }
    }
}

/// Result of classifying a ranked candidate list
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchDecision {
    /// Top candidate (index 0 of the ranked list) accepted
    Found { tier: MatchTier, score: f64 },
    /// Two or more candidates too close to call
    Ambiguous { score: f64 },
    /// No candidate good enough
    NotFound { best: Option<f64> },
}

impl MatchPolicy {
    /// Similarity of two names in [0, 1], computed over loose-keys
    pub fn score(&self, a: &str, b: &str) -> f64 {
        let a = loose_key(a);
        let b = loose_key(b);
        similarity(self.metric, &a, &b)
    }

    /// Classify scores sorted in descending order
    pub fn classify(&self, ranked_scores: &[f64]) -> MatchDecision {
        let Some(&top) = ranked_scores.first() else {
            return MatchDecision::NotFound { best: None };
        };

        if top + SCORE_EPSILON >= self.exact_threshold {
            return MatchDecision::Found {
                tier: MatchTier::Exact,
                score: top,
            };
        }

        if top + SCORE_EPSILON < self.fuzzy_threshold {
            return MatchDecision::NotFound { best: Some(top) };
        }

        let runner_up_too_close = ranked_scores
            .get(1)
            .is_some_and(|&second| second + SCORE_EPSILON >= top - self.ambiguity_margin);

        if runner_up_too_close {
            MatchDecision::Ambiguous { score: top }
        } else {
            MatchDecision::Found {
                tier: MatchTier::Fuzzy,
                score: top,
            }
        }
    }

    /// Sort candidates best-first (stable for equal scores) and classify
    pub fn rank_and_classify(&self, candidates: &mut [Candidate]) -> MatchDecision {
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        let scores: Vec<f64> = candidates.iter().map(|c| c.score).collect();
        self.classify(&scores)
    }
}

/// Similarity of two already-normalized strings
pub fn similarity(metric: SimilarityMetric, a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    match metric {
        SimilarityMetric::Lcs => lcs_ratio(a, b),
        SimilarityMetric::Levenshtein => strsim::normalized_levenshtein(a, b),
        SimilarityMetric::JaroWinkler => strsim::jaro_winkler(a, b),
    }
}

/// 2 * |LCS| / (|a| + |b|) over chars
fn lcs_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    // Single-row DP
    let mut row = vec![0usize; b.len() + 1];
    for ca in &a {
        let mut diag = 0;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb {
                diag + 1
            } else {
                above.max(row[j])
            };
            diag = above;
        }
    }

    2.0 * row[b.len()] as f64 / total as f64
}
