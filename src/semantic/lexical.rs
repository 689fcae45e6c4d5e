//! Lexical (keyword) scoring for hybrid ranking.
//!
//! Text is reduced to a set of keywords and two sets are compared with
//! Jaccard similarity. Set semantics are deliberate: a word repeated in a
//! description does not count twice.

use std::collections::HashSet;

use once_cell::sync::Lazy;

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "being",
        "in", "on", "at", "to", "for", "of", "with", "by", "from", "as",
        "and", "or", "but", "not", "no", "so", "if", "then", "it", "its",
        "this", "that", "my", "i", "me", "we", "our", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Set of normalized keywords extracted from a piece of text.
pub type KeywordSet = HashSet<String>;

/// Tokenize text into its keyword set.
///
/// Splits on non-alphanumeric characters, lower-cases, drops 1-character
/// tokens and stop words, and collapses duplicates.
pub fn keywords(text: &str) -> KeywordSet {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|s| s.to_lowercase())
        .filter(|s| s.chars().count() > 1 && !STOP_WORDS.contains(s.as_str()))
        .collect()
}

/// Jaccard similarity between two keyword sets.
///
/// An empty query set scores 0, never 1: an empty query must not be rewarded
/// for "matching" an empty candidate.
pub fn jaccard(query: &KeywordSet, candidate: &KeywordSet) -> f32 {
    if query.is_empty() {
        return 0.0;
    }

    let intersection = query.intersection(candidate).count();
    let union = query.len() + candidate.len() - intersection;

    intersection as f32 / union as f32
}
