//! # Cache Stores Module
//!
//! The storage mechanism under the gateway: bounded, TTL-aware, byte-valued,
//! with no knowledge of what the bytes mean.

pub mod memory;

pub use memory::{InMemoryCache, InMemoryCacheConfig};

use super::CacheResult;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Cache entry with metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached value
    pub value: Bytes,

    /// Absolute expiration
    pub expires_at: Instant,

    /// Contribution to the store's soft size limit
    pub size_units: usize,
}

impl CacheEntry {
    /// Create a new cache entry
    pub fn new(key: &str, value: Bytes, ttl: Duration) -> Self {
        let size_units = key.len() + value.len();
        Self {
            value,
            expires_at: Instant::now() + ttl,
            size_units,
        }
    }

    /// Check if the entry is expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Get time until expiration
    pub fn ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Trait for cache store implementations
///
/// Key enumeration and expiry lookup are part of the contract: stores keep an
/// explicit key index so callers never need to inspect their internals.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a live value from the cache
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>>;

    /// Set a value in the cache with TTL
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()>;

    /// Delete a value from the cache
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Check if a live key exists in the cache
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Remove every key starting with `prefix`, returning how many were removed
    async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<usize>;

    /// Live keys starting with `prefix`, in lexicographic order
    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>>;

    /// Remaining lifetime of a live key
    async fn time_to_live(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Evict roughly `fraction` of the entries, least valuable first
    async fn compact(&self, fraction: f64) -> CacheResult<usize>;

    /// Clear all entries from the cache
    async fn clear(&self) -> CacheResult<()>;

    /// Get cache statistics
    async fn stats(&self) -> CacheResult<CacheStoreStats>;

    /// Perform health check
    async fn health_check(&self) -> CacheResult<bool>;
}

/// Cache store statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStoreStats {
    /// Number of entries
    pub entries: usize,

    /// Summed size units of all entries
    pub size_units: usize,

    /// Number of entries evicted by compaction
    pub evictions: u64,

    /// Number of expired entries cleaned up
    pub expired_cleanups: u64,

    /// Number of compaction runs
    pub compactions: u64,
}
