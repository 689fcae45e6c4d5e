//! Ranking service.
//!
//! Coordinates the other pieces for one `rank` call:
//! - resolves the query vector once (failure here fails the call)
//! - fans candidate resolution out under a semaphore and a single deadline
//! - scores every candidate, then filters, sorts and truncates
//!
//! Sorting only happens after every resolution has finished or been given
//! up on, so the output never depends on completion order.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::{ConfigError, EngineConfig};
use crate::semantic::cache::CacheStats;
use crate::semantic::embeddings::{is_usable_vector, EmbeddingProvider};
use crate::semantic::lexical::keywords;
use crate::semantic::preprocess::embedding_input;
use crate::semantic::resolver::{EmbeddingResolver, ResolveError};
use crate::semantic::scoring::{score_components, ScoreInput};
use crate::semantic::types::{
    CandidateRecord, Embedding, RankOptions, RankQuery, RankResponse, ScoredMatch,
};

/// Errors that can fail a whole rank call.
///
/// An empty `matches` list is a success, never one of these.
#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("query text is empty")]
    EmptyQuery,

    #[error("invalid candidate at position {index}: {reason}")]
    InvalidCandidate { index: usize, reason: String },

    #[error("duplicate candidate id: {0}")]
    DuplicateCandidate(String),

    #[error("invalid rank options: {0}")]
    InvalidOptions(String),

    #[error("query embedding unavailable: {0}")]
    EmbeddingUnavailable(#[source] ResolveError),
}

/// Effective per-call settings after applying config defaults.
#[derive(Debug, Clone, Copy)]
struct CallSettings {
    limit: usize,
    threshold: f32,
    timeout: Duration,
}

pub struct SearchOrchestrator {
    resolver: Arc<EmbeddingResolver>,
    config: EngineConfig,
}

impl SearchOrchestrator {
    /// Create an orchestrator owning a fresh resolver and cache.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let resolver = Arc::new(EmbeddingResolver::from_config(provider, &config));
        Ok(Self { resolver, config })
    }

    /// Create an orchestrator around an existing resolver, e.g. to share
    /// one cache between several orchestrators.
    pub fn with_resolver(
        resolver: Arc<EmbeddingResolver>,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { resolver, config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<EmbeddingResolver> {
        &self.resolver
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.resolver.cache().stats()
    }

    /// Rank `candidates` against `query`.
    pub async fn rank(
        &self,
        query: &RankQuery,
        candidates: &[CandidateRecord],
        options: RankOptions,
    ) -> Result<RankResponse, RankError> {
        let settings = self.settings(options, self.config.default_threshold)?;
        self.rank_refs(query, candidates.iter().collect(), settings).await
    }

    /// Rank `candidates` by similarity to an existing record.
    ///
    /// The record itself is skipped if it appears among the candidates, and
    /// the stricter `similar_threshold` applies unless the caller sets one.
    pub async fn rank_similar(
        &self,
        record: &CandidateRecord,
        candidates: &[CandidateRecord],
        options: RankOptions,
    ) -> Result<RankResponse, RankError> {
        let settings = self.settings(options, self.config.similar_threshold)?;
        let all: Vec<&CandidateRecord> = candidates.iter().collect();
        validate_candidates(&all)?;

        let query = RankQuery::from_record(record);
        let others = all.into_iter().filter(|c| c.id != record.id).collect();
        self.rank_refs(&query, others, settings).await
    }

    /// Embed a list of texts with the configured concurrency bound.
    pub async fn embed_texts(&self, texts: Vec<String>) -> Vec<Result<Embedding, ResolveError>> {
        self.resolver
            .clone()
            .resolve_batch(texts, self.config.max_concurrency)
            .await
    }

    fn settings(
        &self,
        options: RankOptions,
        default_threshold: f32,
    ) -> Result<CallSettings, RankError> {
        let limit = options.limit.unwrap_or(self.config.default_limit);
        if limit == 0 {
            return Err(RankError::InvalidOptions("limit must be greater than 0".into()));
        }

        let threshold = options.threshold.unwrap_or(default_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(RankError::InvalidOptions(format!(
                "threshold must be between 0.0 and 1.0, got {threshold}"
            )));
        }

        let timeout = options.timeout.unwrap_or_else(|| self.config.request_timeout());
        if timeout.is_zero() {
            return Err(RankError::InvalidOptions("timeout must be greater than 0".into()));
        }

        Ok(CallSettings {
            limit,
            threshold,
            timeout,
        })
    }

    #[tracing::instrument(name = "rank", skip_all, fields(candidates = candidates.len()))]
    async fn rank_refs(
        &self,
        query: &RankQuery,
        candidates: Vec<&CandidateRecord>,
        settings: CallSettings,
    ) -> Result<RankResponse, RankError> {
        let started = Instant::now();
        let deadline = started + settings.timeout;

        let query_text = query.text.trim();
        if query_text.is_empty() {
            return Err(RankError::EmptyQuery);
        }
        validate_candidates(&candidates)?;

        let query_vector = match supplied_query_vector(query, &candidates) {
            Some(v) => v,
            None => {
                let input = embedding_input(query_text);
                match tokio::time::timeout_at(deadline, self.resolver.resolve(&input)).await {
                    Ok(Ok(v)) => v,
                    Ok(Err(e)) => {
                        log::warn!("query embedding failed: {e}");
                        return Err(RankError::EmbeddingUnavailable(e));
                    }
                    Err(_) => {
                        log::warn!("query embedding missed the {:?} deadline", settings.timeout);
                        return Err(RankError::EmbeddingUnavailable(
                            ResolveError::DeadlineExceeded(settings.timeout),
                        ));
                    }
                }
            }
        };

        let texts: Vec<String> = candidates.iter().map(|c| c.text()).collect();
        let vectors = self
            .candidate_vectors(&query_vector, &candidates, &texts, deadline)
            .await;

        let query_keywords = keywords(query_text);
        let query_input = ScoreInput {
            vector: Some(&query_vector[..]),
            keywords: &query_keywords,
            category: query.category.as_deref(),
        };

        let mut unresolved = Vec::new();
        let mut matches: Vec<ScoredMatch> = Vec::with_capacity(candidates.len());

        for (candidate, vector) in candidates.iter().zip(&vectors) {
            let usable = vector
                .as_deref()
                .filter(|v| v.len() == query_vector.len());
            if usable.is_none() {
                unresolved.push(candidate.id.clone());
            }

            let candidate_keywords = keywords(&candidate.keyword_text());
            let components = score_components(
                &query_input,
                &ScoreInput {
                    vector: usable,
                    keywords: &candidate_keywords,
                    category: Some(candidate.category.as_str()),
                },
            );

            matches.push(ScoredMatch {
                candidate_id: candidate.id.clone(),
                score: self.config.weights.combine(&components),
                components,
            });
        }

        matches.retain(|m| m.score > settings.threshold);
        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });
        matches.truncate(settings.limit);

        unresolved.sort();
        let elapsed = started.elapsed();
        log::info!(
            "rank: candidates={} matches={} unresolved={} elapsed={}ms",
            candidates.len(),
            matches.len(),
            unresolved.len(),
            elapsed.as_millis()
        );

        Ok(RankResponse {
            matches,
            degraded: !unresolved.is_empty(),
            unresolved,
            elapsed,
        })
    }

    /// One vector slot per candidate; `None` where nothing usable arrived
    /// before the deadline.
    async fn candidate_vectors(
        &self,
        query_vector: &[f32],
        candidates: &[&CandidateRecord],
        texts: &[String],
        deadline: Instant,
    ) -> Vec<Option<Embedding>> {
        let mut vectors: Vec<Option<Embedding>> = vec![None; candidates.len()];
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut tasks = JoinSet::new();

        for (idx, candidate) in candidates.iter().enumerate() {
            if let Some(stored) = candidate.cached_vector.as_deref() {
                if stored.len() == query_vector.len() && is_usable_vector(stored) {
                    vectors[idx] = Some(Embedding::from(stored));
                    continue;
                }
                log::debug!(
                    "candidate {}: stored vector unusable (dimension {}, expected {}), \
                     re-resolving",
                    candidate.id,
                    stored.len(),
                    query_vector.len()
                );
            }

            let resolver = self.resolver.clone();
            let semaphore = semaphore.clone();
            let text = texts[idx].clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (idx, resolver.resolve(&text).await)
            });
        }

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((idx, Ok(vector))))) => vectors[idx] = Some(vector),
                Ok(Some(Ok((idx, Err(e))))) => {
                    log::warn!("candidate {}: embedding unavailable: {}", candidates[idx].id, e);
                }
                Ok(Some(Err(e))) => log::error!("candidate embedding task failed: {e}"),
                Ok(None) => break,
                Err(_) => {
                    log::warn!(
                        "rank deadline reached with {} candidate resolution(s) in flight",
                        tasks.len()
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        vectors
    }
}

/// The caller's precomputed query vector, if it can be compared at all.
///
/// Rejected when it is degenerate, or when candidates carry stored vectors
/// and none of them share its dimension (a vector from another model).
fn supplied_query_vector(query: &RankQuery, candidates: &[&CandidateRecord]) -> Option<Embedding> {
    let vector = query.vector.as_ref()?;
    if !is_usable_vector(vector) {
        log::debug!("supplied query vector is unusable, embedding the query text");
        return None;
    }

    let mut stored = candidates
        .iter()
        .filter_map(|c| c.cached_vector.as_deref())
        .filter(|v| is_usable_vector(v))
        .peekable();
    if stored.peek().is_some() && !stored.any(|v| v.len() == vector.len()) {
        log::debug!(
            "supplied query vector has dimension {} unlike every stored candidate vector, \
             embedding the query text",
            vector.len()
        );
        return None;
    }

    Some(vector.clone())
}

fn validate_candidates(candidates: &[&CandidateRecord]) -> Result<(), RankError> {
    let mut seen = HashSet::with_capacity(candidates.len());
    for (index, candidate) in candidates.iter().enumerate() {
        if candidate.id.trim().is_empty() {
            return Err(RankError::InvalidCandidate {
                index,
                reason: "id is empty".to_string(),
            });
        }
        if !seen.insert(candidate.id.as_str()) {
            return Err(RankError::DuplicateCandidate(candidate.id.clone()));
        }
    }
    Ok(())
}
