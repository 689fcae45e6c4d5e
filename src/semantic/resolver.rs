//! Cache-first embedding resolution.
//!
//! `resolve(text)` normalizes the text into a cache key, returns the cached
//! vector when there is one, and otherwise calls the provider (retrying
//! transient failures) and caches the result. Failures are never cached.

use std::sync::Arc;
use std::time::Duration;

use rand::random;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::EngineConfig;
use crate::semantic::cache::EmbeddingCache;
use crate::semantic::embeddings::{is_usable_vector, EmbeddingProvider, ProviderError};
use crate::semantic::preprocess::normalize_key;
use crate::semantic::types::Embedding;

/// Largest exponent used for backoff growth.
const MAX_BACKOFF_EXPONENT: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("cannot embed empty text")]
    EmptyText,

    #[error("embedding unavailable after {attempts} attempt(s): {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("no embedding within the {0:?} deadline")]
    DeadlineExceeded(Duration),
}

/// Retry schedule for transient provider failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self::from_config(&config)
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: config.backoff_base(),
            backoff_jitter: config.backoff_jitter(),
        }
    }

    /// Delay before retry number `attempt` (1-based): exponential plus jitter.
    /// Saturates at `Duration::MAX`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let jitter_ms = self.backoff_jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(random::<u64>() % jitter_ms)
        } else {
            Duration::ZERO
        };
        self.backoff_base
            .checked_mul(2u32.pow(exp))
            .unwrap_or(Duration::MAX)
            .saturating_add(jitter)
    }
}

pub struct EmbeddingResolver {
    provider: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
    provider_timeout: Duration,
    retry: RetryPolicy,
}

impl EmbeddingResolver {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: EmbeddingCache,
        provider_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            cache,
            provider_timeout,
            retry,
        }
    }

    /// Build a resolver with its own cache sized from `config`.
    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &EngineConfig) -> Self {
        Self::new(
            provider,
            EmbeddingCache::new(config.cache_capacity, config.cache_ttl()),
            config.provider_timeout(),
            RetryPolicy::from_config(config),
        )
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Get the vector for `text`, from cache or from the provider.
    pub async fn resolve(&self, text: &str) -> Result<Embedding, ResolveError> {
        let key = normalize_key(text);
        if key.is_empty() {
            return Err(ResolveError::EmptyText);
        }

        if let Some(vector) = self.cache.get(&key) {
            return Ok(vector);
        }

        // no lock is held here; concurrent misses on the same key may both
        // reach the provider and the later put simply replaces the earlier
        let vector = self.fetch(text.trim()).await?;
        self.cache.put(key, vector.clone());
        Ok(vector)
    }

    /// Resolve many texts with at most `max_concurrency` provider calls in
    /// flight. Output order matches input order; one failure never fails
    /// the batch.
    pub async fn resolve_batch(
        self: Arc<Self>,
        texts: Vec<String>,
        max_concurrency: usize,
    ) -> Vec<Result<Embedding, ResolveError>> {
        let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (idx, text) in texts.into_iter().enumerate() {
            let resolver = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (idx, resolver.resolve(&text).await)
            });
        }

        let mut results: Vec<Option<Result<Embedding, ResolveError>>> = Vec::new();
        results.resize_with(tasks.len(), || None);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => results[idx] = Some(result),
                Err(e) => log::error!("batch embedding task failed: {e}"),
            }
        }

        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| {
                    Err(ResolveError::Unavailable {
                        attempts: 0,
                        source: ProviderError::rejected("embedding task aborted"),
                    })
                })
            })
            .collect()
    }

    async fn fetch(&self, text: &str) -> Result<Embedding, ResolveError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let result = match tokio::time::timeout(
                self.provider_timeout,
                self.provider.embed(text, self.provider_timeout),
            )
            .await
            {
                Ok(result) => result.and_then(check_vector),
                Err(_) => Err(ProviderError::timeout(format!(
                    "no response within {:?}",
                    self.provider_timeout
                ))),
            };

            match result {
                Ok(vector) => return Ok(vector),
                Err(e) if e.kind.is_transient() && attempt <= self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    log::info!(
                        "provider={} retrying (attempt {}/{}) after error: {}, backoff {}ms",
                        self.provider_name(),
                        attempt,
                        self.retry.max_retries,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    log::warn!(
                        "provider={} giving up after {} attempt(s): {}",
                        self.provider_name(),
                        attempt,
                        e
                    );
                    return Err(ResolveError::Unavailable {
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}

fn check_vector(vector: Embedding) -> Result<Embedding, ProviderError> {
    if !is_usable_vector(&vector) {
        return Err(ProviderError::rejected(
            "provider returned an empty, zero or non-finite vector",
        ));
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::embeddings::ProviderErrorKind;
    use crate::tests::mock::MockProvider;

    fn resolver(provider: Arc<MockProvider>, max_retries: u32) -> EmbeddingResolver {
        EmbeddingResolver::new(
            provider,
            EmbeddingCache::new(100, Duration::from_secs(3600)),
            Duration::from_secs(1),
            RetryPolicy {
                max_retries,
                backoff_base: Duration::from_millis(100),
                backoff_jitter: Duration::from_millis(10),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_provider() {
        let provider = Arc::new(MockProvider::new().with_vector("black bag", vec![1.0, 0.0]));
        let resolver = resolver(provider.clone(), 0);

        let a = resolver.resolve("black bag").await.unwrap();
        let b = resolver.resolve("black bag").await.unwrap();

        assert_eq!(a, b);
        assert_eq!(provider.calls("black bag"), 1);
        assert_eq!(resolver.cache().stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_normalized_texts_share_entry() {
        let provider = Arc::new(MockProvider::new().with_vector("black bag", vec![1.0, 0.0]));
        let resolver = resolver(provider.clone(), 0);

        resolver.resolve("Black Bag").await.unwrap();
        resolver.resolve("black   bag").await.unwrap();
        resolver.resolve("  BLACK\tBAG ").await.unwrap();

        assert_eq!(provider.total_calls(), 1);
        assert_eq!(resolver.cache().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_receives_trimmed_original_text() {
        let provider = Arc::new(MockProvider::new().with_default_vector(vec![1.0]));
        let resolver = resolver(provider.clone(), 0);

        resolver.resolve("  Red Umbrella ").await.unwrap();
        assert_eq!(provider.received(), vec!["Red Umbrella".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_text_rejected() {
        let provider = Arc::new(MockProvider::new());
        let resolver = resolver(provider.clone(), 0);

        assert!(matches!(resolver.resolve("   ").await, Err(ResolveError::EmptyText)));
        assert_eq!(provider.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_not_cached() {
        let provider = Arc::new(
            MockProvider::new()
                .with_vector("wallet", vec![0.0, 1.0])
                .failing_times("wallet", ProviderErrorKind::Quota, 1),
        );
        let resolver = resolver(provider.clone(), 3);

        let err = resolver.resolve("wallet").await.unwrap_err();
        assert!(matches!(err, ResolveError::Unavailable { attempts: 1, .. }));
        assert!(resolver.cache().is_empty());

        // next call goes back to the provider and succeeds
        assert!(resolver.resolve("wallet").await.is_ok());
        assert_eq!(provider.calls("wallet"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retried() {
        let provider = Arc::new(
            MockProvider::new()
                .with_vector("phone", vec![1.0, 1.0])
                .failing_times("phone", ProviderErrorKind::Network, 2),
        );
        let resolver = resolver(provider.clone(), 2);

        assert!(resolver.resolve("phone").await.is_ok());
        assert_eq!(provider.calls("phone"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let provider =
            Arc::new(MockProvider::new().always_failing("phone", ProviderErrorKind::Timeout));
        let resolver = resolver(provider.clone(), 2);

        let err = resolver.resolve("phone").await.unwrap_err();
        match err {
            ResolveError::Unavailable { attempts, source } => {
                assert_eq!(attempts, 3);
                assert_eq!(source.kind, ProviderErrorKind::Timeout);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(provider.calls("phone"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_not_retried() {
        let provider =
            Arc::new(MockProvider::new().always_failing("phone", ProviderErrorKind::Quota));
        let resolver = resolver(provider.clone(), 5);

        assert!(resolver.resolve("phone").await.is_err());
        assert_eq!(provider.calls("phone"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let provider = Arc::new(
            MockProvider::new()
                .with_vector("keys", vec![1.0])
                .with_delay("keys", Duration::from_secs(5)),
        );
        let resolver = resolver(provider.clone(), 0);

        let err = resolver.resolve("keys").await.unwrap_err();
        match err {
            ResolveError::Unavailable { source, .. } => {
                assert_eq!(source.kind, ProviderErrorKind::Timeout)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_finite_vector_rejected() {
        let provider = Arc::new(MockProvider::new().with_vector("bad", vec![f32::NAN, 1.0]));
        let resolver = resolver(provider.clone(), 3);

        let err = resolver.resolve("bad").await.unwrap_err();
        assert!(matches!(err, ResolveError::Unavailable { attempts: 1, .. }));
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_vector_rejected() {
        let provider = Arc::new(MockProvider::new().with_vector("blank", vec![0.0, 0.0]));
        let resolver = resolver(provider.clone(), 3);

        let err = resolver.resolve("blank").await.unwrap_err();
        assert!(matches!(err, ResolveError::Unavailable { attempts: 1, .. }));
        assert!(resolver.cache().is_empty());
        assert_eq!(resolver.provider_name(), "mock");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_recomputed() {
        let provider = Arc::new(MockProvider::new().with_vector("scarf", vec![1.0]));
        let resolver = EmbeddingResolver::new(
            provider.clone(),
            EmbeddingCache::new(10, Duration::from_secs(60)),
            Duration::from_secs(1),
            RetryPolicy::default(),
        );

        resolver.resolve("scarf").await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        resolver.resolve("scarf").await.unwrap();

        assert_eq!(provider.calls("scarf"), 2);
        assert_eq!(resolver.cache().stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_batch_keeps_order_and_isolates_failures() {
        let provider = Arc::new(
            MockProvider::new()
                .with_vector("a", vec![1.0, 0.0])
                .with_vector("c", vec![0.0, 1.0])
                .always_failing("b", ProviderErrorKind::Quota),
        );
        let resolver = Arc::new(resolver(provider.clone(), 0));

        let results = resolver
            .resolve_batch(vec!["a".into(), "b".into(), "c".into()], 2)
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap()[..], [1.0, 0.0]);
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap()[..], [0.0, 1.0]);
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
            backoff_jitter: Duration::ZERO,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(50), Duration::from_millis(3200));
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_millis(u64::MAX),
            backoff_jitter: Duration::from_millis(100),
        };
        assert!(policy.backoff(1) >= Duration::from_millis(u64::MAX));
        assert_eq!(policy.backoff(6), Duration::MAX);
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        let policy = RetryPolicy {
            max_retries: 1,
            backoff_base: Duration::from_millis(100),
            backoff_jitter: Duration::from_millis(50),
        };
        for _ in 0..100 {
            let d = policy.backoff(1);
            assert!(d >= Duration::from_millis(100) && d < Duration::from_millis(150));
        }
    }
}
