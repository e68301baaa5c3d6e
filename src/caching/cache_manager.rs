//! # Cache Manager
//!
//! The shared state behind the domain cache services: the gateway (L2), the key
//! namespacer, the live TTL policy and refresh cadence, and the L1 hot maps.
//! One manager is created by the host and handed to every service, so the hot
//! maps survive as long as the process does and can be inspected or cleared in
//! one place.

use super::gateway::{CacheGateway, GatewayOptions};
use super::key_generator::KeyNamespacer;
use super::stats::HitRateCounter;
use super::stores::{CacheStore, InMemoryCache, InMemoryCacheConfig};
use super::CacheResult;
use crate::core::config::{CacheSettings, RefreshSettings, TtlPolicy};
use crate::core::types::{Product, User};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

/// An L1 hot map with its own hit accounting.
///
/// Entries are not time-limited; they leave only through explicit invalidation.
#[derive(Debug)]
pub struct HotMap<V> {
    entries: DashMap<i64, V>,
    counter: HitRateCounter,
}

impl<V> Default for HotMap<V> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            counter: HitRateCounter::new(),
        }
    }
}

impl<V: Clone> HotMap<V> {
    pub fn get(&self, id: i64) -> Option<V> {
        let value = self.entries.get(&id).map(|entry| entry.value().clone());
        self.counter.record(value.is_some());
        value
    }

    /// Returns the entry it replaced
    pub fn insert(&self, id: i64, value: V) -> Option<V> {
        self.entries.insert(id, value)
    }

    pub fn remove(&self, id: i64) -> Option<V> {
        self.entries.remove(&id).map(|(_, value)| value)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn hit_rate(&self) -> f64 {
        self.counter.hit_rate()
    }

    pub fn counter(&self) -> &HitRateCounter {
        &self.counter
    }
}

/// Gateway, namespacer, live policy and L1 maps shared by the domain services
pub struct CacheManager {
    gateway: Arc<CacheGateway>,

    keys: KeyNamespacer,

    ttl: RwLock<TtlPolicy>,

    refresh: RwLock<RefreshSettings>,

    products: HotMap<Product>,

    users: HotMap<User>,
}

impl CacheManager {
    /// Create a manager over an in-memory store sized by `settings`
    ///
    /// When called inside a Tokio runtime the store's expiry sweeper is started
    /// too; it stops on its own once the store is dropped.
    pub fn from_settings(settings: &CacheSettings) -> CacheResult<Self> {
        settings.validate()?;
        let store = Arc::new(InMemoryCache::new(InMemoryCacheConfig::from(&settings.store)));
        if tokio::runtime::Handle::try_current().is_ok() {
            store.start_cleanup();
        }
        Self::with_store(store, settings)
    }

    /// Create a manager over an existing store
    pub fn with_store(store: Arc<dyn CacheStore>, settings: &CacheSettings) -> CacheResult<Self> {
        settings.validate()?;
        let keys = KeyNamespacer::new(settings.key_prefix.clone())?;
        let gateway = Arc::new(CacheGateway::new(store, GatewayOptions::from(settings)));

        info!(
            prefix = %settings.key_prefix,
            max_entries = settings.store.max_entries,
            "Cache manager initialized"
        );

        Ok(Self {
            gateway,
            keys,
            ttl: RwLock::new(settings.ttl.clone()),
            refresh: RwLock::new(settings.refresh.clone()),
            products: HotMap::default(),
            users: HotMap::default(),
        })
    }

    pub fn gateway(&self) -> &Arc<CacheGateway> {
        &self.gateway
    }

    pub fn keys(&self) -> &KeyNamespacer {
        &self.keys
    }

    /// Snapshot of the live TTL policy
    pub fn ttl(&self) -> TtlPolicy {
        self.ttl.read().clone()
    }

    /// Snapshot of the live refresh settings
    pub fn refresh_settings(&self) -> RefreshSettings {
        self.refresh.read().clone()
    }

    pub fn products(&self) -> &HotMap<Product> {
        &self.products
    }

    pub fn users(&self) -> &HotMap<User> {
        &self.users
    }

    /// Apply a new cache policy at runtime.
    ///
    /// TTLs, the negative-result TTL and the refresh cadence take effect for
    /// entries written from now on. The key prefix and store bounds are fixed
    /// for the manager's lifetime; changes to them are logged and ignored.
    /// Returns whether anything changed.
    pub fn apply_settings(&self, settings: &CacheSettings) -> CacheResult<bool> {
        settings.validate()?;

        if settings.key_prefix != self.keys.prefix() {
            warn!(
                current = self.keys.prefix(),
                requested = %settings.key_prefix,
                "Key prefix cannot change at runtime"
            );
        }

        let mut changed = false;
        {
            let mut ttl = self.ttl.write();
            if *ttl != settings.ttl {
                *ttl = settings.ttl.clone();
                self.gateway.set_null_result_ttl(settings.ttl.null_result);
                changed = true;
            }
        }
        {
            let mut refresh = self.refresh.write();
            if *refresh != settings.refresh {
                *refresh = settings.refresh.clone();
                changed = true;
            }
        }

        if changed {
            info!(
                null_result_ttl = ?settings.ttl.null_result,
                refresh_interval = ?settings.refresh.interval,
                "Applied cache policy"
            );
        }
        Ok(changed)
    }

    /// Drop every L1 entry
    pub fn clear_hot_maps(&self) {
        self.products.clear();
        self.users.clear();
    }
}
