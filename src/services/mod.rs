//! # Domain Cache Services
//!
//! Typed caches for the marketplace's read-heavy data, layered over the shared
//! [`CacheManager`](crate::caching::CacheManager):
//!
//! - [`CategoryCache`]: the category tree, rebuilt as one unit
//! - [`ProductCache`]: products, category listings and the active set
//! - [`UserCache`]: users, security and permission records, student checks
//! - [`ConfigCache`]: configuration snapshots and system settings
//!
//! Reads never fail because of the cache: when the gateway reports an error
//! the service reads the origin directly and returns that result uncached, so
//! only origin failures reach callers.

pub mod category_cache;
pub mod config_cache;
pub mod product_cache;
pub mod user_cache;

pub use category_cache::CategoryCache;
pub use config_cache::ConfigCache;
pub use product_cache::ProductCache;
pub use user_cache::{UserCache, UserCacheStats};

use crate::caching::{CacheKey, CacheResult, Lookup};
use crate::core::error::OriginResult;
use std::future::Future;
use tracing::warn;

/// Turn a gateway result into a service result, reading the origin directly
/// when the gateway failed.
pub(crate) async fn or_origin<T, F, Fut>(
    key: &CacheKey,
    cached: CacheResult<Lookup<T>>,
    direct: F,
) -> OriginResult<Option<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = OriginResult<Option<T>>>,
{
    match cached {
        Ok(lookup) => Ok(lookup.into_option()),
        Err(e) => {
            warn!(key = %key, error = %e, "Cache read failed, falling back to origin");
            metrics::counter!("campus_cache_origin_fallbacks_total").increment(1);
            direct().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::CacheError;
    use crate::core::error::OriginError;

    fn key() -> CacheKey {
        CacheKey::try_from("campus:product:1").unwrap()
    }

    #[tokio::test]
    async fn test_cached_result_is_used() {
        let result = or_origin(&key(), Ok(Lookup::Found(1)), || async {
            Err(OriginError::unavailable("should not be called"))
        })
        .await;
        assert_eq!(result, Ok(Some(1)));
    }

    #[tokio::test]
    async fn test_gateway_failure_reads_origin() {
        let result = or_origin(&key(), Err(CacheError::Unavailable), || async { Ok(Some(2)) }).await;
        assert_eq!(result, Ok(Some(2)));

        let result: OriginResult<Option<u32>> = or_origin(
            &key(),
            Err(CacheError::Origin(OriginError::unavailable("first"))),
            || async { Err(OriginError::unavailable("second")) },
        )
        .await;
        assert_eq!(result, Err(OriginError::unavailable("second")));
    }
}
