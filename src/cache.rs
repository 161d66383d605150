//! In-memory, size-bounded LRU cache of successful extractions with
//! per-entry TTL.
//!
//! Expired entries are dropped lazily when read. On insert at capacity the
//! least-recently-used entry is evicted first. One lock guards everything;
//! cache operations are cheap next to the network calls they save.

use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Default time-to-live for cached results (1 hour).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Default maximum number of cached results.
pub const DEFAULT_CACHE_MAX_SIZE: usize = 10_000;

#[derive(Debug, Clone)]
struct CacheRecord<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
    hits: u64,
}

impl<V> CacheRecord<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

#[derive(Debug)]
struct CacheState<V> {
    // Front is least recently used.
    entries: IndexMap<String, CacheRecord<V>>,
    hits: u64,
    misses: u64,
}

/// Read-only cache snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 before any lookup.
    pub hit_rate: f64,
}

/// Shared result cache. Wrap in `Arc` and share across tasks.
#[derive(Debug)]
pub struct ResultCache<V> {
    enabled: bool,
    max_size: usize,
    default_ttl: Duration,
    state: Mutex<CacheState<V>>,
}

impl<V: Clone> ResultCache<V> {
    /// Creates an enabled cache holding at most `max_size` entries (at least one).
    #[must_use]
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            enabled: true,
            max_size: max_size.max(1),
            default_ttl,
            state: Mutex::new(CacheState {
                entries: IndexMap::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// A cache that stores nothing and always misses.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(1, DEFAULT_CACHE_TTL)
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the cached value, or `None` on a miss or an expired entry.
    ///
    /// A hit becomes the most recently used entry.
    pub async fn get(&self, key: &str) -> Option<V> {
        if !self.enabled {
            return None;
        }
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let Some((_, mut record)) = state.entries.shift_remove_entry(key) else {
            state.misses += 1;
            return None;
        };
        if record.is_expired(now) {
            debug!(key, "cache entry expired");
            state.misses += 1;
            return None;
        }

        record.hits += 1;
        let value = record.value.clone();
        state.entries.insert(key.to_string(), record);
        state.hits += 1;
        Some(value)
    }

    /// Stores `value` under `key` for `ttl` (or the default TTL).
    ///
    /// Overwriting an existing key refreshes its TTL and recency. Inserting a
    /// new key at capacity evicts the least-recently-used entry first.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        if !self.enabled {
            return;
        }
        let key = key.into();
        let record = CacheRecord {
            value,
            created_at: Instant::now(),
            ttl: ttl.unwrap_or(self.default_ttl),
            hits: 0,
        };

        let mut state = self.state.lock().await;
        if state.entries.shift_remove(&key).is_none() && state.entries.len() >= self.max_size {
            if let Some((evicted, _)) = state.entries.shift_remove_index(0) {
                debug!(evicted = %evicted, "evicted least recently used cache entry");
            }
        }
        state.entries.insert(key, record);
    }

    /// Removes `key`; returns whether it was present.
    pub async fn delete(&self, key: &str) -> bool {
        self.state.lock().await.entries.shift_remove(key).is_some()
    }

    /// Drops every entry. Hit and miss counters are kept.
    pub async fn clear(&self) {
        self.state.lock().await.entries.clear();
    }

    /// Number of stored entries, expired ones included until read.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// How many times `key` has been served since it was stored.
    pub async fn entry_hits(&self, key: &str) -> Option<u64> {
        self.state
            .lock()
            .await
            .entries
            .get(key)
            .map(|record| record.hits)
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        let lookups = state.hits + state.misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            state.hits as f64 / lookups as f64
        };
        CacheStats {
            enabled: self.enabled,
            size: state.entries.len(),
            max_size: self.max_size,
            hits: state.hits,
            misses: state.misses,
            hit_rate,
        }
    }
}
