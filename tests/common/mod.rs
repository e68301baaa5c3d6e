//! Shared fixtures: an in-memory origin with call counters and switchable
//! failures, and a helper that wires the domain caches around it.

#![allow(dead_code)]

use async_trait::async_trait;
use campus_cache::caching::{CacheManager, InMemoryCache, InMemoryCacheConfig};
use campus_cache::core::config::{AuthSettings, CacheSettings};
use campus_cache::core::error::{OriginError, OriginResult};
use campus_cache::core::types::{
    Category, Page, Product, ProductStatus, User, UserPermissions, UserRole, UserSecurity,
};
use campus_cache::origin::{CategoryOrigin, ConfigurationSource, ProductOrigin, UserOrigin};
use campus_cache::services::{CategoryCache, ConfigCache, ProductCache, UserCache};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Origin double backing every collaborator trait
#[derive(Default)]
pub struct FakeOrigin {
    pub categories: Mutex<Vec<Category>>,
    pub products: Mutex<HashMap<i64, Product>>,
    pub users: Mutex<HashMap<i64, User>>,
    pub security: Mutex<HashMap<i64, UserSecurity>>,
    pub permissions: Mutex<HashMap<i64, UserPermissions>>,
    pub students: Mutex<HashSet<(String, String)>>,
    pub cache_policy: Mutex<Option<CacheSettings>>,
    pub settings: Mutex<HashMap<String, String>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failing: AtomicBool,
    failing_methods: Mutex<HashSet<&'static str>>,
    delay: Mutex<Duration>,
}

impl FakeOrigin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of calls made to one origin method
    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().get(method).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only calls to `method`
    pub fn fail_on(&self, method: &'static str) {
        self.failing_methods.lock().insert(method);
    }

    /// Make every call take `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn add_product(&self, product: Product) {
        self.products.lock().insert(product.id, product);
    }

    pub fn add_user(&self, user: User) {
        self.users.lock().insert(user.id, user);
    }

    async fn enter(&self, method: &'static str) -> OriginResult<()> {
        *self.calls.lock().entry(method).or_insert(0) += 1;
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) || self.failing_methods.lock().contains(method) {
            return Err(OriginError::unavailable("database is down"));
        }
        Ok(())
    }
}

#[async_trait]
impl CategoryOrigin for FakeOrigin {
    async fn all_categories(&self) -> OriginResult<Vec<Category>> {
        self.enter("all_categories").await?;
        Ok(self.categories.lock().clone())
    }
}

#[async_trait]
impl ProductOrigin for FakeOrigin {
    async fn product_by_id(&self, id: i64) -> OriginResult<Option<Product>> {
        self.enter("product_by_id").await?;
        Ok(self.products.lock().get(&id).cloned())
    }

    async fn products_by_category(
        &self,
        category_id: i64,
        page: u32,
        page_size: u32,
    ) -> OriginResult<Page<Product>> {
        self.enter("products_by_category").await?;
        let mut matching: Vec<Product> = self
            .products
            .lock()
            .values()
            .filter(|p| p.category_id == category_id && p.is_active())
            .cloned()
            .collect();
        matching.sort_by_key(|p| std::cmp::Reverse(p.id));

        let skip = (page.saturating_sub(1) * page_size) as usize;
        Ok(Page {
            total: matching.len() as u64,
            items: matching.into_iter().skip(skip).take(page_size as usize).collect(),
            page,
            page_size,
        })
    }

    async fn active_products(&self, limit: usize) -> OriginResult<Vec<Product>> {
        self.enter("active_products").await?;
        let mut active: Vec<Product> = self
            .products
            .lock()
            .values()
            .filter(|p| p.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|p| p.id);
        active.truncate(limit);
        Ok(active)
    }
}

#[async_trait]
impl UserOrigin for FakeOrigin {
    async fn user_by_id(&self, id: i64) -> OriginResult<Option<User>> {
        self.enter("user_by_id").await?;
        Ok(self.users.lock().get(&id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> OriginResult<Option<User>> {
        self.enter("user_by_username").await?;
        Ok(self
            .users
            .lock()
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn user_security(&self, user_id: i64) -> OriginResult<Option<UserSecurity>> {
        self.enter("user_security").await?;
        Ok(self.security.lock().get(&user_id).cloned())
    }

    async fn user_permissions(&self, user_id: i64) -> OriginResult<Option<UserPermissions>> {
        self.enter("user_permissions").await?;
        Ok(self.permissions.lock().get(&user_id).cloned())
    }

    async fn users_page(&self, page: u32, page_size: u32) -> OriginResult<Page<User>> {
        self.enter("users_page").await?;
        let mut users: Vec<User> = self.users.lock().values().cloned().collect();
        users.sort_by_key(|u| u.id);
        let skip = (page.saturating_sub(1) * page_size) as usize;
        Ok(Page {
            total: users.len() as u64,
            items: users.into_iter().skip(skip).take(page_size as usize).collect(),
            page,
            page_size,
        })
    }

    async fn validate_student(&self, student_id: &str, name: &str) -> OriginResult<bool> {
        self.enter("validate_student").await?;
        Ok(self
            .students
            .lock()
            .contains(&(student_id.to_string(), name.to_string())))
    }
}

#[async_trait]
impl ConfigurationSource for FakeOrigin {
    async fn auth_settings(&self) -> OriginResult<Option<AuthSettings>> {
        self.enter("auth_settings").await?;
        Ok(Some(AuthSettings::default()))
    }

    async fn cache_settings(&self) -> OriginResult<Option<CacheSettings>> {
        self.enter("cache_settings").await?;
        Ok(self.cache_policy.lock().clone())
    }

    async fn setting(&self, name: &str) -> OriginResult<Option<String>> {
        self.enter("setting").await?;
        Ok(self.settings.lock().get(name).cloned())
    }
}

/// The domain caches wired around one origin and one manager
pub struct Fixture {
    pub origin: Arc<FakeOrigin>,
    pub manager: Arc<CacheManager>,
    pub categories: Arc<CategoryCache>,
    pub products: Arc<ProductCache>,
    pub users: Arc<UserCache>,
    pub config: Arc<ConfigCache>,
}

pub fn fixture() -> Fixture {
    fixture_with(CacheSettings::default())
}

pub fn fixture_with(settings: CacheSettings) -> Fixture {
    let origin = FakeOrigin::new();
    let store = Arc::new(InMemoryCache::new(InMemoryCacheConfig::from(&settings.store)));
    let manager = Arc::new(CacheManager::with_store(store, &settings).unwrap());

    Fixture {
        categories: Arc::new(CategoryCache::new(manager.clone(), origin.clone())),
        products: Arc::new(ProductCache::new(manager.clone(), origin.clone())),
        users: Arc::new(UserCache::new(manager.clone(), origin.clone())),
        config: Arc::new(ConfigCache::new(manager.clone(), origin.clone())),
        origin,
        manager,
    }
}

pub fn product(id: i64, category_id: i64, title: &str, price_cents: i64) -> Product {
    Product {
        id,
        category_id,
        seller_id: 1,
        title: title.to_string(),
        price_cents,
        status: ProductStatus::Active,
        updated_at: Utc::now(),
    }
}

pub fn user(id: i64, username: &str) -> User {
    User {
        id,
        username: username.to_string(),
        display_name: format!("User {}", id),
        student_id: Some(format!("2024{:04}", id)),
        role: UserRole::Student,
    }
}

pub fn category(id: i64, parent_id: Option<i64>, sort_order: i32) -> Category {
    Category {
        id,
        parent_id,
        name: format!("category-{}", id),
        sort_order,
    }
}
