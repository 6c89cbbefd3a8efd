//! Caching layer over the external probes
//!
//! Entries carry an explicit expiry and a generation number. Each key has
//! its own async slot, so concurrent lookups for the same entity wait for a
//! single probe call instead of racing.

pub mod market;
pub mod safety;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub use market::MarketSnapshotCache;
pub use safety::SafetyCache;

/// Cached value with expiry metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub cached_at: DateTime<Utc>,
    /// `None` never expires
    pub ttl: Option<Duration>,
    pub generation: u64,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => now - self.cached_at >= ttl,
            None => false,
        }
    }
}

/// Cache statistics for monitoring
#[derive(Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

type Slot<T> = Arc<Mutex<Option<CacheEntry<T>>>>;

/// Per-key TTL cache with single-flight refresh
pub struct TtlCache<T> {
    slots: DashMap<String, Slot<T>>,
    capacity: usize,
    generation: AtomicU64,
    stats: CacheStats,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: DashMap::new(),
            capacity: capacity.max(1),
            generation: AtomicU64::new(0),
            stats: CacheStats::default(),
        }
    }

    fn slot(&self, key: &str) -> Slot<T> {
        if let Some(slot) = self.slots.get(key) {
            return slot.value().clone();
        }

        // Evict if over capacity (simple eviction of ~10%)
        if self.slots.len() >= self.capacity {
            let to_remove = (self.capacity / 10).max(1);
            let keys: Vec<String> = self
                .slots
                .iter()
                .take(to_remove)
                .map(|r| r.key().clone())
                .collect();
            for k in keys {
                self.slots.remove(&k);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.slots.entry(key.to_string()).or_default().value().clone()
    }

    /// Return the live entry for `key`, or run `compute` and store its value with the TTL it returns
    pub async fn get_or_insert_with<F, Fut>(&self, key: &str, now: DateTime<Utc>, compute: F) -> CacheEntry<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (T, Option<Duration>)>,
    {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;

        if let Some(entry) = guard.as_ref() {
            if !entry.is_expired(now) {
                self.stats.record_hit();
                return entry.clone();
            }
        }
        self.stats.record_miss();

        let (value, ttl) = compute().await;
        let entry = CacheEntry {
            value,
            cached_at: now,
            ttl,
            generation: self.generation.fetch_add(1, Ordering::Relaxed) + 1,
        };
        *guard = Some(entry.clone());
        entry
    }

    /// Current entry without refreshing, expired or not
    pub async fn peek(&self, key: &str) -> Option<CacheEntry<T>> {
        let slot = self.slots.get(key).map(|s| s.value().clone())?;
        let guard = slot.lock().await;
        guard.clone()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
