//! # In-Memory Cache Store
//!
//! A bounded in-process store with per-entry absolute expiration, a soft size
//! limit enforced through compaction, and an ordered key index that backs
//! prefix operations and expiry introspection.
//!
//! Reads go straight to a `DashMap`. Every mutation takes the index lock first
//! and updates the map and the index together, so the two never disagree about
//! which keys exist.

use super::{CacheEntry, CacheStore, CacheStoreStats};
use crate::caching::CacheResult;
use crate::core::config::StoreSettings;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Compaction rounds attempted after a single oversized write
const MAX_COMPACTION_ROUNDS: usize = 4;

/// In-memory cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryCacheConfig {
    /// Maximum number of entries
    pub max_entries: usize,

    /// Soft limit on the summed size units
    pub max_size_units: usize,

    /// Fraction evicted per compaction round
    pub compaction_fraction: f64,

    /// Cleanup interval for expired entries
    pub cleanup_interval: Duration,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self::from(&StoreSettings::default())
    }
}

impl From<&StoreSettings> for InMemoryCacheConfig {
    fn from(settings: &StoreSettings) -> Self {
        Self {
            max_entries: settings.max_entries,
            max_size_units: settings.max_size_units,
            compaction_fraction: settings.compaction_fraction,
            cleanup_interval: settings.cleanup_interval,
        }
    }
}

/// In-memory cache implementation
pub struct InMemoryCache {
    config: InMemoryCacheConfig,

    /// Cache entries storage
    entries: DashMap<String, CacheEntry>,

    /// Ordered key -> expiry index; also the write lock
    index: Mutex<BTreeMap<String, Instant>>,

    size_units: AtomicUsize,
    evictions: AtomicU64,
    expired_cleanups: AtomicU64,
    compactions: AtomicU64,
}

impl InMemoryCache {
    /// Create a new in-memory cache
    pub fn new(config: InMemoryCacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            index: Mutex::new(BTreeMap::new()),
            size_units: AtomicUsize::new(0),
            evictions: AtomicU64::new(0),
            expired_cleanups: AtomicU64::new(0),
            compactions: AtomicU64::new(0),
        }
    }

    /// Spawn the periodic sweeper for expired entries.
    ///
    /// The task only holds a weak reference and stops once the store is dropped.
    pub fn start_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        let cleanup_interval = self.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = interval(cleanup_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.purge_expired();
            }
            debug!("In-memory cache cleanup task stopped");
        })
    }

    /// Remove every expired entry now
    pub fn purge_expired(&self) -> usize {
        let mut index = self.index.lock();
        let now = Instant::now();
        let expired: Vec<String> = index
            .iter()
            .filter(|(_, expires_at)| now >= **expires_at)
            .map(|(key, _)| key.clone())
            .collect();

        let mut freed = 0;
        for key in &expired {
            index.remove(key);
            if let Some((_, entry)) = self.entries.remove(key) {
                freed += entry.size_units;
            }
        }
        drop(index);

        if !expired.is_empty() {
            self.size_units.fetch_sub(freed, Ordering::Relaxed);
            self.expired_cleanups
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            debug!(count = expired.len(), freed, "Cleaned up expired cache entries");
        }
        expired.len()
    }

    fn over_limit(&self) -> bool {
        self.entries.len() > self.config.max_entries
            || self.size_units.load(Ordering::Relaxed) > self.config.max_size_units
    }

    /// Remove `key` if its entry is expired, keeping the index in step
    fn remove_if_expired(&self, key: &str) {
        let mut index = self.index.lock();
        if let Some((_, entry)) = self.entries.remove_if(key, |_, entry| entry.is_expired()) {
            index.remove(key);
            self.size_units.fetch_sub(entry.size_units, Ordering::Relaxed);
            self.expired_cleanups.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn remove_locked(&self, index: &mut BTreeMap<String, Instant>, key: &str) -> bool {
        index.remove(key);
        match self.entries.remove(key) {
            Some((_, entry)) => {
                self.size_units.fetch_sub(entry.size_units, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    fn prefixed_keys(index: &BTreeMap<String, Instant>, prefix: &str) -> Vec<(String, Instant)> {
        index
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, expires_at)| (key.clone(), *expires_at))
            .collect()
    }

    fn compact_now(&self, fraction: f64) -> usize {
        let mut index = self.index.lock();
        let total = index.len();
        if total == 0 {
            return 0;
        }
        let target = ((total as f64) * fraction.clamp(0.0, 1.0)).ceil().max(1.0) as usize;
        let now = Instant::now();

        // expired first, then soonest to expire
        let mut candidates: Vec<(String, Instant)> =
            index.iter().map(|(k, e)| (k.clone(), *e)).collect();
        candidates.sort_by_key(|(_, expires_at)| *expires_at);

        let mut expired = 0u64;
        let mut evicted = 0u64;
        for (key, expires_at) in candidates {
            let is_expired = now >= expires_at;
            if !is_expired && (expired + evicted) as usize >= target {
                break;
            }
            if self.remove_locked(&mut index, &key) {
                if is_expired {
                    expired += 1;
                } else {
                    evicted += 1;
                }
            }
        }
        drop(index);

        self.expired_cleanups.fetch_add(expired, Ordering::Relaxed);
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        self.compactions.fetch_add(1, Ordering::Relaxed);

        let removed = (expired + evicted) as usize;
        info!(removed, expired, evicted, "Compacted in-memory cache");
        removed
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.remove_if_expired(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()> {
        let entry = CacheEntry::new(key, value, ttl);
        let entry_size = entry.size_units;
        let expires_at = entry.expires_at;

        {
            let mut index = self.index.lock();
            match self.entries.insert(key.to_string(), entry) {
                Some(old_entry) => {
                    self.size_units.fetch_add(entry_size, Ordering::Relaxed);
                    self.size_units
                        .fetch_sub(old_entry.size_units, Ordering::Relaxed);
                }
                None => {
                    self.size_units.fetch_add(entry_size, Ordering::Relaxed);
                }
            }
            index.insert(key.to_string(), expires_at);
        }

        let mut rounds = 0;
        while self.over_limit() && rounds < MAX_COMPACTION_ROUNDS {
            self.compact_now(self.config.compaction_fraction);
            rounds += 1;
        }
        if rounds == MAX_COMPACTION_ROUNDS && self.over_limit() {
            warn!(
                entries = self.entries.len(),
                size_units = self.size_units.load(Ordering::Relaxed),
                "Cache still over its soft limit after compaction"
            );
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut index = self.index.lock();
        Ok(self.remove_locked(&mut index, key))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self
            .entries
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false))
    }

    async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<usize> {
        let mut index = self.index.lock();
        let keys = Self::prefixed_keys(&index, prefix);
        for (key, _) in &keys {
            self.remove_locked(&mut index, key);
        }
        debug!(prefix, removed = keys.len(), "Removed cache keys by prefix");
        Ok(keys.len())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let index = self.index.lock();
        let now = Instant::now();
        Ok(Self::prefixed_keys(&index, prefix)
            .into_iter()
            .filter(|(_, expires_at)| now < *expires_at)
            .map(|(key, _)| key)
            .collect())
    }

    async fn time_to_live(&self, key: &str) -> CacheResult<Option<Duration>> {
        let index = self.index.lock();
        let now = Instant::now();
        Ok(index
            .get(key)
            .filter(|expires_at| now < **expires_at)
            .map(|expires_at| expires_at.duration_since(now)))
    }

    async fn compact(&self, fraction: f64) -> CacheResult<usize> {
        Ok(self.compact_now(fraction))
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut index = self.index.lock();
        let entry_count = index.len();
        self.entries.clear();
        index.clear();
        self.size_units.store(0, Ordering::Relaxed);
        info!("Cleared {} entries from in-memory cache", entry_count);
        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStoreStats> {
        Ok(CacheStoreStats {
            entries: self.entries.len(),
            size_units: self.size_units.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_cleanups: self.expired_cleanups.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
        })
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let test_key = "__health_check__";
        let test_value = Bytes::from_static(b"health_check_value");

        self.set(test_key, test_value.clone(), Duration::from_secs(1))
            .await?;
        let retrieved = self.get(test_key).await?;
        self.delete(test_key).await?;

        Ok(retrieved == Some(test_value))
    }
}
