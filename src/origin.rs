//! # Origin Collaborators
//!
//! Interfaces of the systems the cache sits in front of. The relational store
//! and its query layer live outside this crate; business services hand in
//! implementations of these traits.
//!
//! Every lookup distinguishes three outcomes:
//! - `Ok(Some(value))`: the row exists
//! - `Ok(None)`: the origin confirmed there is no such row (cacheable)
//! - `Err(OriginError)`: the origin failed (never cached)

use async_trait::async_trait;

use crate::core::config::{AuthSettings, CacheSettings};
use crate::core::error::OriginResult;
use crate::core::types::{Category, Page, Product, User, UserPermissions, UserSecurity};

#[async_trait]
pub trait CategoryOrigin: Send + Sync {
    /// Every category row, in no particular order
    async fn all_categories(&self) -> OriginResult<Vec<Category>>;
}

#[async_trait]
pub trait ProductOrigin: Send + Sync {
    async fn product_by_id(&self, id: i64) -> OriginResult<Option<Product>>;

    /// Active listings of one category, newest first
    async fn products_by_category(
        &self,
        category_id: i64,
        page: u32,
        page_size: u32,
    ) -> OriginResult<Page<Product>>;

    /// Currently active listings, at most `limit`
    async fn active_products(&self, limit: usize) -> OriginResult<Vec<Product>>;
}

#[async_trait]
pub trait UserOrigin: Send + Sync {
    async fn user_by_id(&self, id: i64) -> OriginResult<Option<User>>;

    async fn user_by_username(&self, username: &str) -> OriginResult<Option<User>>;

    async fn user_security(&self, user_id: i64) -> OriginResult<Option<UserSecurity>>;

    async fn user_permissions(&self, user_id: i64) -> OriginResult<Option<UserPermissions>>;

    async fn users_page(&self, page: u32, page_size: u32) -> OriginResult<Page<User>>;

    /// Whether the campus roster has a student with this id and name
    async fn validate_student(&self, student_id: &str, name: &str) -> OriginResult<bool>;
}

/// Source of the configuration snapshots the config cache keeps warm.
#[async_trait]
pub trait ConfigurationSource: Send + Sync {
    async fn auth_settings(&self) -> OriginResult<Option<AuthSettings>>;

    async fn cache_settings(&self) -> OriginResult<Option<CacheSettings>>;

    /// A single system setting by name
    async fn setting(&self, name: &str) -> OriginResult<Option<String>>;
}
