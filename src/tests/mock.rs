//! Scripted embedding provider for tests.
//!
//! Texts are matched by their normalized form, so "Black Bag" and
//! "black bag" script the same response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::semantic::{
    normalize_key, Embedding, EmbeddingProvider, ProviderError, ProviderErrorKind,
};

#[derive(Default)]
pub struct MockProvider {
    vectors: HashMap<String, Vec<f32>>,
    default_vector: Option<Vec<f32>>,
    delays: HashMap<String, Duration>,
    /// text -> (kind, remaining failures; None = forever)
    failures: Mutex<HashMap<String, (ProviderErrorKind, Option<usize>)>>,
    received: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Decrements the in-flight counter however `embed` exits.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(normalize_key(text), vector);
        self
    }

    /// Vector returned for any text without a scripted one.
    pub fn with_default_vector(mut self, vector: Vec<f32>) -> Self {
        self.default_vector = Some(vector);
        self
    }

    pub fn with_delay(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(normalize_key(text), delay);
        self
    }

    pub fn failing_times(self, text: &str, kind: ProviderErrorKind, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(normalize_key(text), (kind, Some(times)));
        self
    }

    pub fn always_failing(self, text: &str, kind: ProviderErrorKind) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(normalize_key(text), (kind, None));
        self
    }

    /// Number of provider calls made for `text` (normalized match).
    pub fn calls(&self, text: &str) -> usize {
        let key = normalize_key(text);
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|t| normalize_key(t) == key)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    /// Highest number of overlapping `embed` calls seen so far.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Raw texts the provider was asked to embed, in call order.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    fn scripted_failure(&self, key: &str) -> Option<ProviderErrorKind> {
        let mut failures = self.failures.lock().unwrap();
        let (kind, remaining) = failures.get_mut(key)?;
        match remaining {
            None => Some(*kind),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(*kind)
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn embed(&self, text: &str, _timeout: Duration) -> Result<Embedding, ProviderError> {
        let key = normalize_key(text);
        self.received.lock().unwrap().push(text.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if let Some(delay) = self.delays.get(&key) {
            tokio::time::sleep(*delay).await;
        }

        if let Some(kind) = self.scripted_failure(&key) {
            return Err(ProviderError::new(kind, format!("scripted failure for {key:?}")));
        }

        self.vectors
            .get(&key)
            .or(self.default_vector.as_ref())
            .map(|v| Embedding::from(v.as_slice()))
            .ok_or_else(|| ProviderError::rejected(format!("no scripted vector for {key:?}")))
    }
}
