//! Product cache.
//!
//! Single products go through the L1 hot map, then the gateway. Category
//! listings and the active set are cached under their own keys with their own
//! TTLs and are not touched by single-product invalidation; callers drop them
//! explicitly with [`ProductCache::invalidate_products_by_category`] or
//! [`ProductCache::invalidate_product_lists`].

use super::or_origin;
use crate::caching::{CacheDomain, CacheKey, CacheManager, CacheResult};
use crate::core::error::OriginResult;
use crate::core::types::{Page, Product};
use crate::origin::ProductOrigin;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ProductCache {
    manager: Arc<CacheManager>,
    origin: Arc<dyn ProductOrigin>,
}

impl ProductCache {
    pub fn new(manager: Arc<CacheManager>, origin: Arc<dyn ProductOrigin>) -> Self {
        Self { manager, origin }
    }

    pub fn product_key(&self, id: i64) -> CacheKey {
        self.manager.keys().key(CacheDomain::Product, id)
    }

    pub fn list_key(&self, category_id: i64, page: u32, page_size: u32) -> CacheKey {
        self.manager.keys().key_with_suffix(
            CacheDomain::Product,
            "list",
            &[
                "category",
                &category_id.to_string(),
                "page",
                &page.to_string(),
                "size",
                &page_size.to_string(),
            ],
        )
    }

    pub fn active_key(&self) -> CacheKey {
        self.manager.keys().key(CacheDomain::Product, "active")
    }

    pub async fn get_product(&self, id: i64) -> OriginResult<Option<Product>> {
        if let Some(product) = self.manager.products().get(id) {
            return Ok(Some(product));
        }

        let key = self.product_key(id);
        let ttl = self.manager.ttl().product;
        let cached = self
            .manager
            .gateway()
            .get_or_create(&key, ttl, || self.origin.product_by_id(id))
            .await;
        let product = or_origin(&key, cached, || self.origin.product_by_id(id)).await?;

        if let Some(product) = &product {
            self.manager.products().insert(id, product.clone());
        }
        Ok(product)
    }

    /// Answered from the cache, including cached absences
    pub async fn product_exists(&self, id: i64) -> OriginResult<bool> {
        Ok(self.get_product(id).await?.is_some())
    }

    /// Batch read: L1, then one batch lookup in the gateway, then individual
    /// loads for whatever is left. Unknown ids are omitted.
    pub async fn get_products(&self, ids: &[i64]) -> OriginResult<HashMap<i64, Product>> {
        let mut found = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        for &id in ids.iter().collect::<BTreeSet<_>>() {
            match self.manager.products().get(id) {
                Some(product) => {
                    found.insert(id, product);
                }
                None => missing.push(id),
            }
        }
        if missing.is_empty() {
            return Ok(found);
        }

        let keys: Vec<CacheKey> = missing.iter().map(|&id| self.product_key(id)).collect();
        let cached: HashMap<CacheKey, Product> = match self.manager.gateway().get_all(&keys).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "Batch product lookup failed");
                HashMap::new()
            }
        };

        for (id, key) in missing.into_iter().zip(keys) {
            let product = match cached.get(&key) {
                Some(product) => {
                    self.manager.products().insert(id, product.clone());
                    Some(product.clone())
                }
                None => self.load_product(id, &key).await?,
            };
            if let Some(product) = product {
                found.insert(id, product);
            }
        }
        Ok(found)
    }

    /// Miss path of a batch read: L1 and L2 were already consulted and counted
    async fn load_product(&self, id: i64, key: &CacheKey) -> OriginResult<Option<Product>> {
        let ttl = self.manager.ttl().product;
        let cached = self
            .manager
            .gateway()
            .load_missing(key, ttl, || self.origin.product_by_id(id))
            .await;
        let product = or_origin(key, cached, || self.origin.product_by_id(id)).await?;

        if let Some(product) = &product {
            self.manager.products().insert(id, product.clone());
        }
        Ok(product)
    }

    /// Write through to L1 and L2
    pub async fn set_product(&self, product: &Product) -> CacheResult<()> {
        self.manager.products().insert(product.id, product.clone());
        let ttl = self.manager.ttl().product;
        self.manager
            .gateway()
            .set(&self.product_key(product.id), product, ttl)
            .await
    }

    /// Drop one product from L1 and L2; listings are left alone
    pub async fn invalidate_product(&self, id: i64) -> CacheResult<()> {
        self.manager.products().remove(id);
        self.manager.gateway().remove(&self.product_key(id)).await?;
        debug!(product_id = id, "Product invalidated");
        Ok(())
    }

    /// One page of a category's active listings
    pub async fn get_products_by_category(
        &self,
        category_id: i64,
        page: u32,
        page_size: u32,
    ) -> OriginResult<Page<Product>> {
        let key = self.list_key(category_id, page, page_size);
        let ttl = self.manager.ttl().product_list;
        let load = || async move {
            self.origin
                .products_by_category(category_id, page, page_size)
                .await
                .map(Some)
        };

        let cached = self.manager.gateway().get_or_create(&key, ttl, load).await;
        Ok(or_origin(&key, cached, load)
            .await?
            .unwrap_or_else(|| Page::empty(page, page_size)))
    }

    /// Drop every cached page of one category
    pub async fn invalidate_products_by_category(&self, category_id: i64) -> CacheResult<usize> {
        let prefix = self.manager.keys().collection_prefix(
            CacheDomain::Product,
            &["list", "category", &category_id.to_string()],
        );
        self.manager.gateway().remove_by_prefix(&prefix).await
    }

    /// Drop every cached listing page
    pub async fn invalidate_product_lists(&self) -> CacheResult<usize> {
        let prefix = self
            .manager
            .keys()
            .collection_prefix(CacheDomain::Product, &["list"]);
        self.manager.gateway().remove_by_prefix(&prefix).await
    }

    pub async fn get_active_products(&self) -> OriginResult<Vec<Product>> {
        let key = self.active_key();
        let ttl = self.manager.ttl().active_products;
        let limit = self.manager.refresh_settings().active_products_limit;
        let load = || async move { self.origin.active_products(limit).await.map(Some) };

        let cached = self.manager.gateway().get_or_create(&key, ttl, load).await;
        Ok(or_origin(&key, cached, load).await?.unwrap_or_default())
    }

    /// Rebuild the active set, write every active product through, and re-warm
    /// the first pages of each category that has active products.
    /// Returns the number of active products.
    pub async fn refresh_active_products(&self) -> CacheResult<usize> {
        let ttl = self.manager.ttl();
        let settings = self.manager.refresh_settings();
        let gateway = self.manager.gateway();
        let limit = settings.active_products_limit;

        let active = gateway
            .refresh(&self.active_key(), ttl.active_products, || async move {
                self.origin.active_products(limit).await.map(Some)
            })
            .await?
            .into_option()
            .unwrap_or_default();

        for product in &active {
            self.set_product(product).await?;
        }

        let categories: BTreeSet<i64> = active.iter().map(|p| p.category_id).collect();
        let page_size = settings.list_page_size;
        for &category_id in &categories {
            for page in 1..=settings.warm_list_pages {
                gateway
                    .refresh(
                        &self.list_key(category_id, page, page_size),
                        ttl.product_list,
                        || async move {
                            self.origin
                                .products_by_category(category_id, page, page_size)
                                .await
                                .map(Some)
                        },
                    )
                    .await?;
            }
        }

        info!(
            products = active.len(),
            categories = categories.len(),
            "Active products refreshed"
        );
        Ok(active.len())
    }

    /// Drop every product entry from L1 and L2
    pub async fn invalidate_all(&self) -> CacheResult<usize> {
        self.manager.products().clear();
        let prefix = self.manager.keys().domain_prefix(CacheDomain::Product);
        self.manager.gateway().remove_by_prefix(&prefix).await
    }
}
