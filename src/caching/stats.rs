//! Hit-rate accounting and gateway statistics.

use super::stores::CacheStoreStats;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free hit/request counter. Never reset.
#[derive(Debug, Default)]
pub struct HitRateCounter {
    total_requests: AtomicU64,
    hits: AtomicU64,
}

impl HitRateCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record(&self, hit: bool) {
        if hit {
            self.record_hit();
        } else {
            self.record_miss();
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.total_requests().saturating_sub(self.hits())
    }

    /// `hits / total_requests`, `0.0` before the first request
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total cache hits, negative markers included
    pub hits: u64,

    /// Total cache misses
    pub misses: u64,

    /// Cache hit ratio
    pub hit_ratio: f64,

    /// Factory invocations against the origin
    pub origin_loads: u64,

    /// Keys with a load in flight right now
    pub in_flight: usize,

    /// Store-level statistics
    pub store: CacheStoreStats,

    /// Statistics collection start time
    pub start_time: chrono::DateTime<chrono::Utc>,
}
