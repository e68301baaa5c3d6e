//! # campus-cache - Caching Layer for the Campus Marketplace
//!
//! The application-level cache that sits between the marketplace's business
//! services and its relational store. It keeps read-heavy data (the category
//! tree, product listings, user records, configuration) warm while protecting
//! the origin from stampedes and repeated misses.
//!
//! ## Layers
//! - **Gateway**: generic read-through engine with per-key single-flight,
//!   negative caching, batch reads, prefix invalidation and forced refresh
//! - **Domain services**: typed caches with per-domain TTLs and L1 hot maps
//! - **Refresh orchestrator**: cancellable background loop that rebuilds hot
//!   aggregates ahead of their expiry
//!
//! The origin store itself is out of scope; hosts implement the traits in
//! [`origin`] and hand them to the services.

/// Configuration, error taxonomy and the marketplace entities
pub mod core;

/// Key namespacing, stores, single-flight coordination and the cache gateway
pub mod caching;

/// Typed domain caches built on the gateway
pub mod services;

/// Background refresh of the hot aggregates
pub mod refresh;

/// Interfaces of the systems the cache sits in front of
pub mod origin;

/// Structured logging setup
pub mod observability;

pub use caching::{
    CacheError, CacheGateway, CacheKey, CacheManager, CacheResult, KeyNamespacer, Lookup,
};
pub use core::config::{AppConfig, CacheSettings, ConfigManager, TtlPolicy};
pub use core::error::{ConfigError, OriginError, OriginResult};
pub use refresh::{CycleReport, OrchestratorState, RefreshOrchestrator, RefreshStep};
pub use services::{CategoryCache, ConfigCache, ProductCache, UserCache};
