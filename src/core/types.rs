//! # Core Types Module
//!
//! Marketplace entities that flow through the caching layer. They are owned by
//! the origin store; the cache only keeps serialized copies of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A row of the category table. Categories form a forest via `parent_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    pub sort_order: i32,
}

/// A category with its children resolved, as served to the storefront.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub category: Category,
    pub children: Vec<CategoryNode>,
}

impl CategoryNode {
    /// Depth-first search for `id` in this subtree
    pub fn find(&self, id: i64) -> Option<&CategoryNode> {
        if self.category.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Ids of this node and every node below it, in pre-order
    pub fn subtree_ids(&self) -> Vec<i64> {
        let mut ids = vec![self.category.id];
        for child in &self.children {
            ids.extend(child.subtree_ids());
        }
        ids
    }
}

/// Find a node anywhere in a forest of category trees.
pub fn find_in_forest(forest: &[CategoryNode], id: i64) -> Option<&CategoryNode> {
    forest.iter().find_map(|root| root.find(id))
}

/// Listing state of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Active,
    Reserved,
    Sold,
    Withdrawn,
}

/// A marketplace listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub category_id: i64,
    pub seller_id: i64,
    pub title: String,
    /// Price in the smallest currency unit
    pub price_cents: i64,
    pub status: ProductStatus,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn is_active(&self) -> bool {
        self.status == ProductStatus::Active
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based page number
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn empty(page: u32, page_size: u32) -> Self {
        Self {
            items: Vec::new(),
            page,
            page_size,
            total: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Student,
    Staff,
    Admin,
}

/// Public profile of a marketplace user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// Login name, usually the campus e-mail address
    pub username: String,
    pub display_name: String,
    pub student_id: Option<String>,
    pub role: UserRole,
}

/// Login-sensitive state of a user. Cached separately with a short TTL.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSecurity {
    pub user_id: i64,
    pub password_hash: String,
    pub failed_login_count: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl UserSecurity {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

impl fmt::Debug for UserSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSecurity")
            .field("user_id", &self.user_id)
            .field("password_hash", &"[REDACTED]")
            .field("failed_login_count", &self.failed_login_count)
            .field("locked_until", &self.locked_until)
            .finish()
    }
}

/// Effective permission set of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermissions {
    pub user_id: i64,
    pub permissions: HashSet<String>,
}

impl UserPermissions {
    pub fn has(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}
