//! Hybrid semantic ranking of records against a query.
//!
//! Scores combine vector similarity, keyword overlap and a category match.
//! Vectors come from a pluggable embedding provider behind a bounded,
//! expiring cache.
//!
//! # Architecture
//!
//! - `preprocess`: Record text composition and cache-key normalization
//! - `lexical`: Keyword extraction and Jaccard overlap
//! - `scoring`: Cosine similarity and weighted score combination
//! - `cache`: LRU + TTL embedding cache
//! - `embeddings`: Provider trait, provider errors, local fastembed provider
//! - `gemini`: Remote Gemini provider
//! - `resolver`: Cache-first resolution with retries
//! - `service`: Per-call orchestration (`rank`, `rank_similar`)

mod cache;
pub mod embeddings;
mod gemini;
mod lexical;
mod preprocess;
mod resolver;
pub mod scoring;
mod service;
mod types;

pub use cache::{CacheStats, EmbeddingCache, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
#[cfg(feature = "local")]
pub use embeddings::LocalEmbedder;
pub use embeddings::{
    is_usable_vector, l2_normalize, EmbeddingProvider, ProviderError, ProviderErrorKind,
};
pub use gemini::GeminiEmbedder;
pub use lexical::{jaccard, keywords, KeywordSet};
pub use preprocess::{
    compose_record_text, embedding_input, join_record_fields, normalize_category, normalize_key,
    EMPTY_RECORD_TEXT,
};
pub use resolver::{EmbeddingResolver, ResolveError, RetryPolicy};
pub use scoring::{cosine_similarity, score_components, ScoreInput, ScoreWeights};
pub use service::{RankError, SearchOrchestrator};
pub use types::{
    CandidateRecord, Embedding, RankOptions, RankQuery, RankResponse, ScoreComponents,
    ScoredMatch,
};
