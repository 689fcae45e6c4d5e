//! Embedding cache with LRU eviction and lazy TTL expiry.
//!
//! Keys are normalized texts (see [`crate::semantic::normalize_key`]).
//! All state sits behind one mutex, so a lookup plus its recency update, or
//! an insert plus its eviction, is atomic with respect to every other call.
//! The lock is only ever held for in-memory map work.
//!
//! Expired entries are dropped when they are looked up; there is no sweeper.
//! Timestamps come from `tokio::time::Instant` so tests can drive the clock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::semantic::types::Embedding;

/// Default number of cached embeddings.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Default entry time-to-live (1 hour).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

struct CacheEntry {
    vector: Embedding,
    inserted_at: Instant,
    last_access: Instant,
    /// Position in the recency order; larger is more recent
    tick: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// tick -> key, oldest first
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl CacheState {
    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry)
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

pub struct EmbeddingCache {
    state: Mutex<CacheState>,
    capacity: usize,
    ttl: Duration,
}

impl EmbeddingCache {
    /// Create a cache holding at most `capacity` entries (at least 1), each
    /// valid for `ttl` after insertion.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::with_capacity(capacity.min(4096)),
                ..Default::default()
            }),
            capacity,
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Every mutation leaves the maps consistent before it can panic,
        // so a poisoned lock still guards valid state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a vector, refreshing its recency on hit.
    ///
    /// An entry older than the TTL counts as a miss and is evicted.
    pub fn get(&self, key: &str) -> Option<Embedding> {
        let now = Instant::now();
        let mut state = self.lock();

        let expired = match state.entries.get(key) {
            None => {
                state.misses += 1;
                return None;
            }
            Some(entry) => now.duration_since(entry.inserted_at) > self.ttl,
        };

        if expired {
            state.remove(key);
            state.expirations += 1;
            state.misses += 1;
            log::debug!("embedding cache entry expired: {key:?}");
            return None;
        }

        let tick = state.bump();
        state.hits += 1;
        let entry = state.entries.get_mut(key)?;
        let old_tick = std::mem::replace(&mut entry.tick, tick);
        entry.last_access = now;
        let vector = entry.vector.clone();

        if let Some(k) = state.recency.remove(&old_tick) {
            state.recency.insert(tick, k);
        }

        Some(vector)
    }

    /// Insert or replace a vector.
    ///
    /// Inserting a new key into a full cache first evicts the least recently
    /// accessed entry. Replacing an existing key resets its age and recency.
    pub fn put(&self, key: String, vector: Embedding) {
        let now = Instant::now();
        let mut state = self.lock();

        if state.remove(&key).is_none() && state.entries.len() >= self.capacity {
            if let Some((_, oldest)) = state.recency.pop_first() {
                state.entries.remove(&oldest);
                state.evictions += 1;
                log::debug!("embedding cache evicted least recently used: {oldest:?}");
            }
        }

        let tick = state.bump();
        state.recency.insert(tick, key.clone());
        state.entries.insert(
            key,
            CacheEntry {
                vector,
                inserted_at: now,
                last_access: now,
                tick,
            },
        );
    }

    /// Whether a live-or-stale entry exists. Does not touch recency or counters.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Time since the entry was last read or written, if present.
    pub fn idle_time(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.lock()
            .entries
            .get(key)
            .map(|e| now.duration_since(e.last_access))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.recency.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            capacity: self.capacity,
            ttl_secs: self.ttl.as_secs(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
        }
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }
}
