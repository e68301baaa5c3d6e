//! Configuration snapshot cache.
//!
//! Keeps the auth settings, the cache policy and individual system settings
//! warm. A refreshed cache policy is applied to the live [`CacheManager`], so
//! TTL and cadence changes take effect without a restart.

use super::or_origin;
use crate::caching::{CacheDomain, CacheKey, CacheManager, CacheResult};
use crate::core::config::{AuthSettings, CacheSettings, ConfigChangeEvent};
use crate::core::error::OriginResult;
use crate::origin::ConfigurationSource;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ConfigCache {
    manager: Arc<CacheManager>,
    source: Arc<dyn ConfigurationSource>,
}

impl ConfigCache {
    pub fn new(manager: Arc<CacheManager>, source: Arc<dyn ConfigurationSource>) -> Self {
        Self { manager, source }
    }

    pub fn auth_key(&self) -> CacheKey {
        self.manager.keys().key(CacheDomain::Config, "auth")
    }

    pub fn cache_policy_key(&self) -> CacheKey {
        self.manager.keys().key(CacheDomain::Config, "cache_policy")
    }

    pub fn setting_key(&self, name: &str) -> CacheKey {
        self.manager
            .keys()
            .key_with_suffix(CacheDomain::Config, "setting", &[name])
    }

    pub async fn get_auth_settings(&self) -> OriginResult<Option<AuthSettings>> {
        let key = self.auth_key();
        let ttl = self.manager.ttl().config;
        let cached = self
            .manager
            .gateway()
            .get_or_create(&key, ttl, || self.source.auth_settings())
            .await;
        or_origin(&key, cached, || self.source.auth_settings()).await
    }

    pub async fn get_cache_policy(&self) -> OriginResult<Option<CacheSettings>> {
        let key = self.cache_policy_key();
        let ttl = self.manager.ttl().config;
        let cached = self
            .manager
            .gateway()
            .get_or_create(&key, ttl, || self.source.cache_settings())
            .await;
        or_origin(&key, cached, || self.source.cache_settings()).await
    }

    /// A system setting by name; unknown names are negative-cached
    pub async fn get_setting(&self, name: &str) -> OriginResult<Option<String>> {
        let key = self.setting_key(name);
        let ttl = self.manager.ttl().config;
        let cached = self
            .manager
            .gateway()
            .get_or_create(&key, ttl, || self.source.setting(name))
            .await;
        or_origin(&key, cached, || self.source.setting(name)).await
    }

    pub async fn invalidate_setting(&self, name: &str) -> CacheResult<bool> {
        self.manager.gateway().remove(&self.setting_key(name)).await
    }

    /// Drop every configuration entry
    pub async fn invalidate_all(&self) -> CacheResult<usize> {
        let prefix = self.manager.keys().domain_prefix(CacheDomain::Config);
        self.manager.gateway().remove_by_prefix(&prefix).await
    }

    /// Re-read the snapshots from the source and overwrite the cached copies.
    ///
    /// A changed cache policy is applied to the manager. Returns whether the
    /// live policy changed.
    pub async fn refresh_snapshots(&self) -> CacheResult<bool> {
        let ttl = self.manager.ttl().config;
        let gateway = self.manager.gateway();

        gateway
            .refresh(&self.auth_key(), ttl, || self.source.auth_settings())
            .await?;
        let policy = gateway
            .refresh(&self.cache_policy_key(), ttl, || self.source.cache_settings())
            .await?
            .into_option();

        let changed = match policy {
            Some(policy) => self.manager.apply_settings(&policy)?,
            None => false,
        };
        debug!(policy_changed = changed, "Configuration snapshots refreshed");
        Ok(changed)
    }

    /// Follow configuration change broadcasts until `token` is cancelled:
    /// every change drops the cached snapshots and settings, then reloads them.
    pub fn follow_changes(
        self: Arc<Self>,
        mut changes: broadcast::Receiver<ConfigChangeEvent>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = changes.recv() => event,
                };

                match event {
                    Ok(event) => {
                        info!(
                            path = ?event.file_path,
                            "Configuration changed, reloading cached snapshots"
                        );
                        if let Err(e) = self.invalidate_all().await {
                            warn!(error = %e, "Failed to drop cached configuration");
                        }
                        if let Err(e) = self.refresh_snapshots().await {
                            error!(error = %e, "Failed to reload configuration snapshots");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed configuration changes, reloading");
                        if let Err(e) = self.refresh_snapshots().await {
                            error!(error = %e, "Failed to reload configuration snapshots");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Stopped following configuration changes");
        })
    }
}
