//! 结果缓存
//!
//! 以 (task_type, identifier) 为键的TTL缓存。缓存只是建议性的：缺失只会导致重新采集，
//! 不影响正确性。查询从不阻塞在I/O上。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use collector_core::config::CacheConfig;
use collector_core::models::{JobKey, ProgressiveResult};
use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

/// A cached record and the instant it was stored
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: JobKey,
    pub result: ProgressiveResult,
    pub stored_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.stored_at) > ttl
    }
}

/// Hit/miss counters since startup plus the current entry count
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// TTL cache of finished records keyed by [`JobKey`].
///
/// Expired entries are dropped lazily on lookup and in bulk by
/// [`clear_expired`](Self::clear_expired). A disabled cache stores nothing and
/// misses every lookup.
#[derive(Debug)]
pub struct ResultCache {
    entries: DashMap<JobKey, CacheEntry>,
    ttl: Duration,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            enabled: true,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            ..Self::new(config.ttl())
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Any unexpired record for `key`, regardless of depth
    pub fn get(&self, key: &JobKey) -> Option<ProgressiveResult> {
        self.get_covering(key, 0)
    }

    /// Hit only when the cached record reached at least `min_completion` percent
    pub fn get_covering(&self, key: &JobKey, min_completion: u8) -> Option<ProgressiveResult> {
        if !self.enabled {
            return None;
        }
        let now = Instant::now();
        let found = match self.entries.get(key) {
            Some(entry) if entry.is_expired(now, self.ttl) => {
                drop(entry);
                self.entries.remove_if(key, |_, e| e.is_expired(now, self.ttl));
                None
            }
            Some(entry) if entry.result.completion_percentage >= min_completion => {
                Some(entry.result.clone())
            }
            _ => None,
        };

        match found {
            Some(result) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!("collector_cache_hits_total").increment(1);
                debug!(key = %key, "Cache hit");
                Some(result)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!("collector_cache_misses_total").increment(1);
                None
            }
        }
    }

    /// Stores or replaces the record for `key`, restarting its TTL
    pub fn put(&self, key: JobKey, result: ProgressiveResult) {
        if !self.enabled {
            return;
        }
        let entry = CacheEntry {
            key: key.clone(),
            result,
            stored_at: Instant::now(),
        };
        self.entries.insert(key, entry);
    }

    /// Removes the record for `key`; true if one was present
    pub fn invalidate(&self, key: &JobKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drops expired entries; returns how many were removed
    pub fn clear_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now, self.ttl));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Cleared expired cache entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            entries: self.entries.len(),
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}
