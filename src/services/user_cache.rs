//! User cache.
//!
//! Profiles go through the L1 hot map; security and permission records only
//! live in L2 with their own, shorter TTLs. Username lookups are a separate
//! index key so repeated logins with an unknown name are negative-cached.

use super::or_origin;
use crate::caching::{CacheDomain, CacheKey, CacheManager, CacheResult, Lookup};
use crate::core::error::OriginResult;
use crate::core::types::{Page, User, UserPermissions, UserSecurity};
use crate::origin::UserOrigin;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// L1 statistics, sampled by the refresh orchestrator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserCacheStats {
    pub l1_entries: usize,
    pub l1_requests: u64,
    pub l1_hits: u64,
    pub l1_hit_rate: f64,
}

pub struct UserCache {
    manager: Arc<CacheManager>,
    origin: Arc<dyn UserOrigin>,
}

impl UserCache {
    pub fn new(manager: Arc<CacheManager>, origin: Arc<dyn UserOrigin>) -> Self {
        Self { manager, origin }
    }

    pub fn user_key(&self, id: i64) -> CacheKey {
        self.manager.keys().key(CacheDomain::User, id)
    }

    pub fn security_key(&self, id: i64) -> CacheKey {
        self.manager
            .keys()
            .key_with_suffix(CacheDomain::User, id, &["security"])
    }

    pub fn permissions_key(&self, id: i64) -> CacheKey {
        self.manager
            .keys()
            .key_with_suffix(CacheDomain::User, id, &["permissions"])
    }

    pub fn username_key(&self, username: &str) -> CacheKey {
        self.manager
            .keys()
            .key_with_suffix(CacheDomain::User, "name", &[username])
    }

    pub fn users_page_key(&self, page: u32, page_size: u32) -> CacheKey {
        self.manager.keys().key_with_suffix(
            CacheDomain::User,
            "list",
            &["page", &page.to_string(), "size", &page_size.to_string()],
        )
    }

    pub fn student_key(&self, student_id: &str, name: &str) -> CacheKey {
        self.manager
            .keys()
            .key_with_suffix(CacheDomain::Student, student_id, &[name])
    }

    pub async fn get_user(&self, id: i64) -> OriginResult<Option<User>> {
        if let Some(user) = self.manager.users().get(id) {
            return Ok(Some(user));
        }

        let key = self.user_key(id);
        let ttl = self.manager.ttl().user;
        let cached = self
            .manager
            .gateway()
            .get_or_create(&key, ttl, || self.origin.user_by_id(id))
            .await;
        let user = or_origin(&key, cached, || self.origin.user_by_id(id)).await?;

        if let Some(user) = &user {
            self.manager.users().insert(id, user.clone());
        }
        Ok(user)
    }

    /// Lookup by login name; unknown names are negative-cached
    pub async fn get_user_by_username(&self, username: &str) -> OriginResult<Option<User>> {
        let key = self.username_key(username);
        let ttl = self.manager.ttl().user;
        let cached = self
            .manager
            .gateway()
            .get_or_create(&key, ttl, || self.origin.user_by_username(username))
            .await;
        let user = or_origin(&key, cached, || self.origin.user_by_username(username)).await?;

        if let Some(user) = &user {
            self.manager.users().insert(user.id, user.clone());
        }
        Ok(user)
    }

    /// Credentials and lockout state; never kept in L1
    pub async fn get_user_security(&self, user_id: i64) -> OriginResult<Option<UserSecurity>> {
        let key = self.security_key(user_id);
        let ttl = self.manager.ttl().user_security;
        let cached = self
            .manager
            .gateway()
            .get_or_create(&key, ttl, || self.origin.user_security(user_id))
            .await;
        or_origin(&key, cached, || self.origin.user_security(user_id)).await
    }

    pub async fn get_user_permissions(&self, user_id: i64) -> OriginResult<Option<UserPermissions>> {
        let key = self.permissions_key(user_id);
        let ttl = self.manager.ttl().user_permissions;
        let cached = self
            .manager
            .gateway()
            .get_or_create(&key, ttl, || self.origin.user_permissions(user_id))
            .await;
        or_origin(&key, cached, || self.origin.user_permissions(user_id)).await
    }

    /// Write through to L1, the primary key and the username index.
    ///
    /// On a rename the index entry of the previous username is dropped.
    pub async fn set_user(&self, user: &User) -> CacheResult<()> {
        let gateway = self.manager.gateway();
        let user_key = self.user_key(user.id);

        let previous = match self.manager.users().insert(user.id, user.clone()) {
            Some(previous) => Some(previous.username),
            None => self.cached_username(&user_key).await,
        };
        if let Some(previous) = previous.filter(|name| *name != user.username) {
            gateway.remove(&self.username_key(&previous)).await?;
            debug!(user_id = user.id, "Dropped username index of renamed user");
        }

        let ttl = self.manager.ttl().user;
        gateway.set(&user_key, user, ttl).await?;
        gateway
            .set(&self.username_key(&user.username), user, ttl)
            .await
    }

    pub async fn set_user_security(&self, security: &UserSecurity) -> CacheResult<()> {
        let ttl = self.manager.ttl().user_security;
        self.manager
            .gateway()
            .set(&self.security_key(security.user_id), security, ttl)
            .await
    }

    /// Drop the user's profile, security record, permissions and username index.
    ///
    /// The username is taken from the cached profile; if neither L1 nor L2 has
    /// it, a stale username entry expires with its TTL.
    pub async fn invalidate_user(&self, id: i64) -> CacheResult<()> {
        let gateway = self.manager.gateway();
        let user_key = self.user_key(id);

        let username = match self.manager.users().remove(id) {
            Some(user) => Some(user.username),
            None => self.cached_username(&user_key).await,
        };

        let mut keys = vec![user_key, self.security_key(id), self.permissions_key(id)];
        if let Some(username) = username {
            keys.push(self.username_key(&username));
        }
        gateway.remove_all(&keys).await?;

        debug!(user_id = id, "User invalidated");
        Ok(())
    }

    /// Username of the profile cached under `user_key`, if any
    async fn cached_username(&self, user_key: &CacheKey) -> Option<String> {
        match self.manager.gateway().peek::<User>(user_key).await {
            Ok(Some(Lookup::Found(user))) => Some(user.username),
            _ => None,
        }
    }

    pub async fn invalidate_user_security(&self, user_id: i64) -> CacheResult<bool> {
        self.manager
            .gateway()
            .remove(&self.security_key(user_id))
            .await
    }

    pub async fn get_users_page(&self, page: u32, page_size: u32) -> OriginResult<Page<User>> {
        let key = self.users_page_key(page, page_size);
        let ttl = self.manager.ttl().user_list;
        let load = || async move { self.origin.users_page(page, page_size).await.map(Some) };

        let cached = self.manager.gateway().get_or_create(&key, ttl, load).await;
        Ok(or_origin(&key, cached, load)
            .await?
            .unwrap_or_else(|| Page::empty(page, page_size)))
    }

    pub async fn invalidate_user_lists(&self) -> CacheResult<usize> {
        let prefix = self
            .manager
            .keys()
            .collection_prefix(CacheDomain::User, &["list"]);
        self.manager.gateway().remove_by_prefix(&prefix).await
    }

    /// Whether the roster has this student; both answers are cached
    pub async fn validate_student_identity(&self, student_id: &str, name: &str) -> OriginResult<bool> {
        let (student_id, name) = (student_id.trim(), name.trim());
        if student_id.is_empty() || name.is_empty() {
            return Ok(false);
        }

        let key = self.student_key(student_id, name);
        let ttl = self.manager.ttl().student_validation;
        let load = || async move {
            self.origin
                .validate_student(student_id, name)
                .await
                .map(Some)
        };

        let cached = self.manager.gateway().get_or_create(&key, ttl, load).await;
        Ok(or_origin(&key, cached, load).await?.unwrap_or(false))
    }

    pub async fn invalidate_student_identity(&self, student_id: &str, name: &str) -> CacheResult<bool> {
        let key = self.student_key(student_id.trim(), name.trim());
        self.manager.gateway().remove(&key).await
    }

    pub fn stats(&self) -> UserCacheStats {
        let l1 = self.manager.users();
        UserCacheStats {
            l1_entries: l1.len(),
            l1_requests: l1.counter().total_requests(),
            l1_hits: l1.counter().hits(),
            l1_hit_rate: l1.hit_rate(),
        }
    }
}
