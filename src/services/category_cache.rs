//! Category tree cache.
//!
//! The whole forest lives under one key and is always rebuilt as a unit from
//! the full set of rows, so readers see either the previous tree or the new
//! one, never a partial rebuild. Misses and forced refreshes share the key's
//! lock in the gateway.

use super::or_origin;
use crate::caching::{CacheDomain, CacheKey, CacheManager, CacheResult};
use crate::core::error::OriginResult;
use crate::core::types::{find_in_forest, Category, CategoryNode};
use crate::origin::CategoryOrigin;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct CategoryCache {
    manager: Arc<CacheManager>,
    origin: Arc<dyn CategoryOrigin>,
}

impl CategoryCache {
    pub fn new(manager: Arc<CacheManager>, origin: Arc<dyn CategoryOrigin>) -> Self {
        Self { manager, origin }
    }

    pub fn tree_key(&self) -> CacheKey {
        self.manager.keys().key(CacheDomain::Category, "tree")
    }

    /// Root categories with their children, ordered by `sort_order` then id
    pub async fn get_category_tree(&self) -> OriginResult<Vec<CategoryNode>> {
        let key = self.tree_key();
        let ttl = self.manager.ttl().category_tree;
        let cached = self
            .manager
            .gateway()
            .get_or_create(&key, ttl, || self.load_tree())
            .await;

        Ok(or_origin(&key, cached, || self.load_tree())
            .await?
            .unwrap_or_default())
    }

    /// One category with its subtree
    pub async fn get_category(&self, id: i64) -> OriginResult<Option<CategoryNode>> {
        let tree = self.get_category_tree().await?;
        Ok(find_in_forest(&tree, id).cloned())
    }

    /// Direct children of a category; empty for unknown ids
    pub async fn get_subcategories(&self, id: i64) -> OriginResult<Vec<Category>> {
        let tree = self.get_category_tree().await?;
        Ok(find_in_forest(&tree, id)
            .map(|node| node.children.iter().map(|c| c.category.clone()).collect())
            .unwrap_or_default())
    }

    /// The category itself followed by every category below it, in pre-order;
    /// empty for unknown ids
    pub async fn get_descendant_ids(&self, id: i64) -> OriginResult<Vec<i64>> {
        let tree = self.get_category_tree().await?;
        Ok(find_in_forest(&tree, id)
            .map(CategoryNode::subtree_ids)
            .unwrap_or_default())
    }

    /// Rebuild the tree from the origin and overwrite the cached copy.
    /// Returns the number of categories in the new tree.
    pub async fn refresh_category_tree(&self) -> CacheResult<usize> {
        let key = self.tree_key();
        let ttl = self.manager.ttl().category_tree;
        let tree = self
            .manager
            .gateway()
            .refresh(&key, ttl, || self.load_tree())
            .await?
            .into_option()
            .unwrap_or_default();

        let count: usize = tree.iter().map(|root| root.subtree_ids().len()).sum();
        debug!(categories = count, "Category tree refreshed");
        Ok(count)
    }

    pub async fn invalidate_category_tree(&self) -> CacheResult<bool> {
        self.manager.gateway().remove(&self.tree_key()).await
    }

    async fn load_tree(&self) -> OriginResult<Option<Vec<CategoryNode>>> {
        let rows = self.origin.all_categories().await?;
        Ok(Some(build_tree(rows)))
    }
}

/// Assemble a forest from flat rows.
///
/// Rows whose parent does not exist become roots. Rows that cannot be reached
/// from any root (parent cycles) are dropped. Duplicate ids keep the first row.
pub fn build_tree(rows: Vec<Category>) -> Vec<CategoryNode> {
    let mut seen = HashSet::new();
    let rows: Vec<Category> = rows.into_iter().filter(|row| seen.insert(row.id)).collect();
    let total = rows.len();

    let mut roots = Vec::new();
    let mut children: HashMap<i64, Vec<Category>> = HashMap::new();
    for row in rows {
        match row.parent_id {
            None => roots.push(row),
            Some(parent) if !seen.contains(&parent) => {
                warn!(id = row.id, parent, "Category parent missing, promoting to root");
                roots.push(row);
            }
            Some(parent) => children.entry(parent).or_default().push(row),
        }
    }

    sort_categories(&mut roots);
    let mut placed = HashSet::new();
    let forest: Vec<CategoryNode> = roots
        .into_iter()
        .map(|root| attach(root, &mut children, &mut placed))
        .collect();

    if placed.len() < total {
        warn!(
            dropped = total - placed.len(),
            "Dropped categories unreachable from any root"
        );
    }
    forest
}

fn attach(
    category: Category,
    children: &mut HashMap<i64, Vec<Category>>,
    placed: &mut HashSet<i64>,
) -> CategoryNode {
    placed.insert(category.id);
    let mut kids = children.remove(&category.id).unwrap_or_default();
    sort_categories(&mut kids);
    let mut nodes = Vec::with_capacity(kids.len());
    for kid in kids {
        nodes.push(attach(kid, children, placed));
    }
    CategoryNode {
        category,
        children: nodes,
    }
}

fn sort_categories(categories: &mut [Category]) {
    categories.sort_by_key(|c| (c.sort_order, c.id));
}
