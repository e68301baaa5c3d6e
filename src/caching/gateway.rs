//! # Cache Gateway
//!
//! The generic read-through engine every domain cache goes through. Values are
//! serialized as a tagged [`Lookup`] so a confirmed absence can be cached next
//! to real values without ever being mistaken for one.
//!
//! Miss handling is single-flight per key: the first caller becomes the leader,
//! takes the key's lock, re-checks the store and runs the factory once; every
//! caller that arrives meanwhile receives the leader's outcome, error included.
//! Nothing is cached when the factory fails.

use super::key_generator::{validate_key_chars, CacheKey};
use super::single_flight::{FlightRole, KeyedLocks, SingleFlight};
use super::stats::{CacheStats, HitRateCounter};
use super::stores::CacheStore;
use super::{CacheError, CacheResult, Lookup};
use crate::core::config::CacheSettings;
use crate::core::error::OriginResult;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Shared outcome of one flight: the serialized lookup, or the failure
type FlightOutcome = CacheResult<Bytes>;

/// Gateway tuning
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayOptions {
    /// Keys longer than this are rejected
    pub max_key_length: usize,

    /// Lifetime of negative markers
    pub null_result_ttl: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

impl From<&CacheSettings> for GatewayOptions {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            max_key_length: settings.max_key_length,
            null_result_ttl: settings.ttl.null_result,
        }
    }
}

/// Read-through cache over a [`CacheStore`]
pub struct CacheGateway {
    store: Arc<dyn CacheStore>,

    max_key_length: usize,

    null_result_ttl: RwLock<Duration>,

    counter: HitRateCounter,

    origin_loads: AtomicU64,

    flights: SingleFlight<FlightOutcome>,

    locks: KeyedLocks,

    start_time: chrono::DateTime<chrono::Utc>,
}

impl CacheGateway {
    pub fn new(store: Arc<dyn CacheStore>, options: GatewayOptions) -> Self {
        Self {
            store,
            max_key_length: options.max_key_length,
            null_result_ttl: RwLock::new(options.null_result_ttl),
            counter: HitRateCounter::new(),
            origin_loads: AtomicU64::new(0),
            flights: SingleFlight::new(),
            locks: KeyedLocks::new(),
            start_time: chrono::Utc::now(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Return the cached lookup for `key`, loading it through `factory` on a miss.
    ///
    /// `factory` returns `Ok(None)` when the origin confirms the absence; that is
    /// cached as a negative marker for the null-result TTL instead of `ttl`.
    pub async fn get_or_create<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        factory: F,
    ) -> CacheResult<Lookup<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = OriginResult<Option<T>>>,
    {
        self.validate_key(key)?;

        if let Some(lookup) = self.read::<T>(key).await? {
            self.record_lookup(Some(&lookup));
            return Ok(lookup);
        }
        self.record_lookup::<T>(None);

        let (outcome, role) = self
            .flights
            .run(key.as_str(), || self.load_and_store(key, ttl, factory))
            .await;
        if role == FlightRole::Follower {
            debug!(key = %key, "Joined in-flight load");
        }

        decode(key, &outcome?)
    }

    /// Run the miss path for `key` without recording a lookup.
    ///
    /// For keys a batch read already reported missing; shares the flight and
    /// the re-check under the key lock with [`CacheGateway::get_or_create`].
    pub async fn load_missing<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        factory: F,
    ) -> CacheResult<Lookup<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = OriginResult<Option<T>>>,
    {
        self.validate_key(key)?;
        let (outcome, _) = self
            .flights
            .run(key.as_str(), || self.load_and_store(key, ttl, factory))
            .await;
        decode(key, &outcome?)
    }

    /// Like [`CacheGateway::get`], but not counted in the hit rate
    pub async fn peek<T: DeserializeOwned>(&self, key: &CacheKey) -> CacheResult<Option<Lookup<T>>> {
        self.validate_key(key)?;
        self.read::<T>(key).await
    }

    /// Cached lookup for `key` without loading; `None` when there is no entry
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> CacheResult<Option<Lookup<T>>> {
        self.validate_key(key)?;
        let lookup = self.read::<T>(key).await?;
        self.record_lookup(lookup.as_ref());
        Ok(lookup)
    }

    /// Cached real values for `keys`; absent keys and negative markers are omitted
    pub async fn get_all<T: DeserializeOwned>(
        &self,
        keys: &[CacheKey],
    ) -> CacheResult<HashMap<CacheKey, T>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(Lookup::Found(value)) = self.get::<T>(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) -> CacheResult<()> {
        self.validate_key(key)?;
        let bytes = encode(&Lookup::Found(value))?;
        self.store.set(key.as_str(), bytes, ttl).await
    }

    /// Store an explicit negative marker for `key`
    pub async fn set_not_found(&self, key: &CacheKey) -> CacheResult<()> {
        self.validate_key(key)?;
        let bytes = encode(&Lookup::<()>::NotFound)?;
        self.store
            .set(key.as_str(), bytes, self.null_result_ttl())
            .await
    }

    pub async fn remove(&self, key: &CacheKey) -> CacheResult<bool> {
        self.validate_key(key)?;
        self.store.delete(key.as_str()).await
    }

    /// Remove every key in `keys`, returning how many existed
    pub async fn remove_all(&self, keys: &[CacheKey]) -> CacheResult<usize> {
        let mut removed = 0;
        for key in keys {
            if self.remove(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove every key starting with `prefix`
    pub async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<usize> {
        validate_key_chars(prefix.trim_end_matches(':'))?;
        let removed = self.store.remove_by_prefix(prefix).await?;
        debug!(prefix, removed, "Removed cache entries by prefix");
        Ok(removed)
    }

    pub async fn exists(&self, key: &CacheKey) -> CacheResult<bool> {
        self.validate_key(key)?;
        self.store.exists(key.as_str()).await
    }

    /// Live keys starting with `prefix`
    pub async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        self.store.keys_with_prefix(prefix).await
    }

    /// Recompute `key` unconditionally and overwrite the entry.
    ///
    /// Runs under the key's lock, so it never interleaves with a miss load of the
    /// same key. When the factory fails the previous entry stays in place.
    pub async fn refresh<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        factory: F,
    ) -> CacheResult<Lookup<T>>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = OriginResult<Option<T>>>,
    {
        self.validate_key(key)?;
        let _guard = self.locks.lock(key.as_str()).await;

        self.origin_loads.fetch_add(1, Ordering::Relaxed);
        let lookup = Lookup::from(factory().await?);
        let ttl = if lookup.is_found() {
            ttl
        } else {
            self.null_result_ttl()
        };
        self.store.set(key.as_str(), encode(&lookup)?, ttl).await?;

        debug!(key = %key, found = lookup.is_found(), "Refreshed cache entry");
        Ok(lookup)
    }

    /// Remaining lifetime of every live key in `keys`
    pub async fn expirations(&self, keys: &[CacheKey]) -> CacheResult<HashMap<CacheKey, Duration>> {
        let mut expirations = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(ttl) = self.store.time_to_live(key.as_str()).await? {
                expirations.insert(key.clone(), ttl);
            }
        }
        Ok(expirations)
    }

    pub fn hit_rate(&self) -> f64 {
        self.counter.hit_rate()
    }

    pub fn counter(&self) -> &HitRateCounter {
        &self.counter
    }

    pub async fn stats(&self) -> CacheResult<CacheStats> {
        Ok(CacheStats {
            hits: self.counter.hits(),
            misses: self.counter.misses(),
            hit_ratio: self.counter.hit_rate(),
            origin_loads: self.origin_loads.load(Ordering::Relaxed),
            in_flight: self.flights.in_flight(),
            store: self.store.stats().await?,
            start_time: self.start_time,
        })
    }

    pub fn null_result_ttl(&self) -> Duration {
        *self.null_result_ttl.read()
    }

    /// Applies to markers written from now on
    pub fn set_null_result_ttl(&self, ttl: Duration) {
        *self.null_result_ttl.write() = ttl;
    }

    pub async fn clear(&self) -> CacheResult<()> {
        self.store.clear().await
    }

    pub async fn health_check(&self) -> CacheResult<bool> {
        self.store.health_check().await
    }

    /// Leader side of a miss: lock, re-check, load, store
    async fn load_and_store<T, F, Fut>(&self, key: &CacheKey, ttl: Duration, factory: F) -> FlightOutcome
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = OriginResult<Option<T>>>,
    {
        let _guard = self.locks.lock(key.as_str()).await;

        // a refresh may have filled the key while we waited for the lock
        if let Some(bytes) = self.store.get(key.as_str()).await? {
            return Ok(bytes);
        }

        self.origin_loads.fetch_add(1, Ordering::Relaxed);
        let lookup = Lookup::from(factory().await?);
        let ttl = if lookup.is_found() {
            ttl
        } else {
            self.null_result_ttl()
        };
        let bytes = encode(&lookup)?;

        if let Err(e) = self.store.set(key.as_str(), bytes.clone(), ttl).await {
            warn!(key = %key, error = %e, "Failed to store loaded value");
        }
        Ok(bytes)
    }

    /// Decoded store entry; undecodable entries are evicted
    async fn read<T: DeserializeOwned>(&self, key: &CacheKey) -> CacheResult<Option<Lookup<T>>> {
        let Some(bytes) = self.store.get(key.as_str()).await? else {
            return Ok(None);
        };
        match decode(key, &bytes) {
            Ok(lookup) => Ok(Some(lookup)),
            Err(e) => {
                warn!(key = %key, error = %e, "Evicting undecodable cache entry");
                self.store.delete(key.as_str()).await?;
                Err(e)
            }
        }
    }

    fn record_lookup<T>(&self, lookup: Option<&Lookup<T>>) {
        let outcome = match lookup {
            Some(Lookup::Found(_)) => "hit",
            Some(Lookup::NotFound) => "negative_hit",
            None => "miss",
        };
        self.counter.record(lookup.is_some());
        metrics::counter!("campus_cache_lookups_total", "outcome" => outcome).increment(1);
    }

    fn validate_key(&self, key: &CacheKey) -> CacheResult<()> {
        if key.as_str().len() > self.max_key_length {
            return Err(CacheError::invalid_key(
                key.as_str(),
                format!(
                    "key length {} exceeds maximum {}",
                    key.as_str().len(),
                    self.max_key_length
                ),
            ));
        }
        Ok(())
    }
}

fn encode<T: Serialize>(lookup: &Lookup<T>) -> CacheResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(lookup)?))
}

fn decode<T: DeserializeOwned>(key: &CacheKey, bytes: &[u8]) -> CacheResult<Lookup<T>> {
    serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization {
        message: format!("{}: {}", key, e),
    })
}
