//! # Caching System Module
//!
//! The read-through caching layer in front of the marketplace's origin store.
//!
//! ## Features
//! - Get-or-create with per-key single-flight (one origin fetch per missing key)
//! - Negative caching of confirmed absences with their own, shorter TTL
//! - Batch reads, targeted and prefix invalidation
//! - Forced refresh that bypasses the check-first path
//! - Hit-rate counters and expiry introspection through a tracked key index
//!
//! ## Architecture
//! 1. **Key Namespacer**: deterministic `<prefix>:<domain>:<id>[:suffix]` keys
//! 2. **Cache Stores**: bounded, TTL-aware byte store with a key index
//! 3. **Single Flight**: per-key coordination cells and locks
//! 4. **Cache Gateway**: the generic read-through engine
//! 5. **Cache Manager**: gateway + namespacer + live TTL policy + L1 hot maps,
//!    shared by the domain services
//!
//! ## Usage Example
//! ```rust,no_run
//! use std::time::Duration;
//! use campus_cache::caching::{CacheManager, CacheDomain, Lookup};
//! use campus_cache::core::config::CacheSettings;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = CacheManager::from_settings(&CacheSettings::default())?;
//! let key = manager.keys().key(CacheDomain::Config, "motd");
//!
//! let motd: Lookup<String> = manager
//!     .gateway()
//!     .get_or_create(&key, Duration::from_secs(60), || async {
//!         Ok(Some("welcome back".to_string()))
//!     })
//!     .await?;
//! assert!(motd.is_found());
//! # Ok(())
//! # }
//! ```

pub mod cache_manager;
pub mod gateway;
pub mod key_generator;
pub mod single_flight;
pub mod stats;
pub mod stores;

pub use cache_manager::{CacheManager, HotMap};
pub use gateway::{CacheGateway, GatewayOptions};
pub use key_generator::{CacheDomain, CacheKey, KeyNamespacer, ParsedKey};
pub use single_flight::{FlightRole, KeyedLocks, SingleFlight};
pub use stats::{CacheStats, HitRateCounter};
pub use stores::{CacheEntry, CacheStore, CacheStoreStats, InMemoryCache, InMemoryCacheConfig};

use crate::core::error::{ConfigError, OriginError};
use serde::{Deserialize, Serialize};

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
///
/// `Clone` so that one failed flight can be handed to every joined caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    #[error("Invalid cache key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Cache store error: {message}")]
    Store { message: String },

    #[error(transparent)]
    Origin(#[from] OriginError),

    #[error("Cache configuration error: {message}")]
    Configuration { message: String },

    #[error("Cache not available")]
    Unavailable,
}

impl CacheError {
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// The origin failure behind this error, if any
    pub fn origin_error(&self) -> Option<&OriginError> {
        match self {
            Self::Origin(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<ConfigError> for CacheError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

/// Outcome of a cached lookup.
///
/// A stored `NotFound` is the negative marker: the origin confirmed the absence
/// and the cache remembers it for the null-result TTL. It is a different thing
/// from "no entry", which the gateway reports as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn as_ref(&self) -> Lookup<&T> {
        match self {
            Lookup::Found(value) => Lookup::Found(value),
            Lookup::NotFound => Lookup::NotFound,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::NotFound => Lookup::NotFound,
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Lookup::Found(value),
            None => Lookup::NotFound,
        }
    }
}
