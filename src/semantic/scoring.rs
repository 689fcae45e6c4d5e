//! Hybrid relevance scoring.
//!
//! Combines three signals into one score in [0, 1]:
//!
//!   score = w_vector * (cosine + 1) / 2 + w_keyword * jaccard + w_category * match
//!
//! Default weights are 0.7 / 0.2 / 0.1. They are empirical, so they are
//! carried in [`ScoreWeights`] and loaded from config rather than fixed.

use serde::{Deserialize, Serialize};

use crate::semantic::lexical::{jaccard, KeywordSet};
use crate::semantic::preprocess::normalize_category;
use crate::semantic::types::ScoreComponents;

/// Default weight of the vector component.
pub const DEFAULT_VECTOR_WEIGHT: f32 = 0.7;
/// Default weight of the keyword component.
pub const DEFAULT_KEYWORD_WEIGHT: f32 = 0.2;
/// Default weight of the category component.
pub const DEFAULT_CATEGORY_WEIGHT: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_vector_weight")]
    pub vector: f32,
    #[serde(default = "default_keyword_weight")]
    pub keyword: f32,
    #[serde(default = "default_category_weight")]
    pub category: f32,
}

fn default_vector_weight() -> f32 {
    DEFAULT_VECTOR_WEIGHT
}

fn default_keyword_weight() -> f32 {
    DEFAULT_KEYWORD_WEIGHT
}

fn default_category_weight() -> f32 {
    DEFAULT_CATEGORY_WEIGHT
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            vector: DEFAULT_VECTOR_WEIGHT,
            keyword: DEFAULT_KEYWORD_WEIGHT,
            category: DEFAULT_CATEGORY_WEIGHT,
        }
    }
}

impl ScoreWeights {
    /// Weighted sum of the components, clamped to [0, 1].
    pub fn combine(&self, c: &ScoreComponents) -> f32 {
        let score = self.vector * c.vector + self.keyword * c.keyword + self.category * c.category;
        if score.is_nan() {
            return 0.0;
        }
        score.clamp(0.0, 1.0)
    }
}

/// One side of a comparison: everything the scorer looks at.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    pub vector: Option<&'a [f32]>,
    pub keywords: &'a KeywordSet,
    pub category: Option<&'a str>,
}

/// Compute the sub-scores for a query/candidate pair. Pure and infallible.
pub fn score_components(query: &ScoreInput<'_>, candidate: &ScoreInput<'_>) -> ScoreComponents {
    let vector = match (query.vector, candidate.vector) {
        (Some(q), Some(c)) => cosine_similarity(q, c)
            .map(|cos| ((cos + 1.0) / 2.0).clamp(0.0, 1.0))
            .unwrap_or(0.0),
        _ => 0.0,
    };

    ScoreComponents {
        vector,
        keyword: jaccard(query.keywords, candidate.keywords),
        category: category_match(query.category, candidate.category),
    }
}

/// Cosine similarity, or `None` when the vectors cannot be compared
/// (dimension mismatch, empty, or zero norm).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return None;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let cos = dot / (norm_a * norm_b);
    cos.is_finite().then(|| cos.clamp(-1.0, 1.0))
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn category_match(query: Option<&str>, candidate: Option<&str>) -> f32 {
    match (query, candidate) {
        (Some(q), Some(c)) => {
            let q = normalize_category(q);
            if !q.is_empty() && q == normalize_category(c) {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}
