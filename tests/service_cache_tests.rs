//! # Domain Cache Service Tests
//!
//! Read-through behavior of the category, product, user and config caches
//! against a counting in-memory origin.

mod common;

use campus_cache::caching::{CacheDomain, Lookup};
use campus_cache::core::config::CacheSettings;
use campus_cache::core::types::{UserPermissions, UserSecurity};
use common::{category, fixture, fixture_with, product, user};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_product_read_through() {
    let fx = fixture();
    fx.origin.add_product(product(42, 3, "Calculus Textbook", 2500));

    let first = fx.products.get_product(42).await.unwrap().unwrap();
    assert_eq!(first.title, "Calculus Textbook");
    assert_eq!(fx.origin.calls("product_by_id"), 1);

    // L1 answers now; drop it to prove L2 holds the same value
    fx.manager.products().clear();
    let second = fx.products.get_product(42).await.unwrap().unwrap();
    assert_eq!(second, first);
    assert_eq!(fx.origin.calls("product_by_id"), 1);

    let gateway = fx.manager.gateway();
    assert_eq!(gateway.counter().misses(), 1);
    assert_eq!(gateway.counter().hits(), 1);
}

#[tokio::test]
async fn test_product_invalidation_after_price_change() {
    let fx = fixture();
    fx.origin.add_product(product(42, 3, "Calculus Textbook", 2500));
    assert_eq!(
        fx.products.get_product(42).await.unwrap().unwrap().price_cents,
        2500
    );

    fx.origin.add_product(product(42, 3, "Calculus Textbook", 1800));
    fx.products.invalidate_product(42).await.unwrap();
    fx.products.invalidate_product(42).await.unwrap();

    let fresh = fx.products.get_product(42).await.unwrap().unwrap();
    assert_eq!(fresh.price_cents, 1800);
    assert_eq!(fx.origin.calls("product_by_id"), 2);
}

#[tokio::test]
async fn test_unknown_product_is_negative_cached() {
    let fx = fixture();

    assert!(!fx.products.product_exists(404).await.unwrap());
    assert!(fx.products.get_product(404).await.unwrap().is_none());
    assert_eq!(fx.origin.calls("product_by_id"), 1);
    assert!(!fx.manager.products().contains(404));
}

#[tokio::test]
async fn test_batch_read_uses_every_level() {
    let fx = fixture();
    for id in 1..=4 {
        fx.origin.add_product(product(id, 1, &format!("item {}", id), 100 * id));
    }

    // 1 in L1, 2 in L2 only, 3 and 4 only in the origin
    fx.products.get_product(1).await.unwrap();
    fx.products
        .set_product(&product(2, 1, "item 2", 200))
        .await
        .unwrap();
    fx.manager.products().remove(2);
    let calls_before = fx.origin.calls("product_by_id");

    let found = fx.products.get_products(&[1, 2, 3, 4, 4, 99]).await.unwrap();
    assert_eq!(found.len(), 4);
    assert_eq!(found[&2].title, "item 2");
    // 3, 4 and the unknown 99 were loaded individually
    assert_eq!(fx.origin.calls("product_by_id") - calls_before, 3);
    assert!(fx.manager.products().contains(3));
}

#[tokio::test]
async fn test_category_lists_are_cached_and_invalidated_by_prefix() {
    let fx = fixture();
    for id in 1..=5 {
        fx.origin.add_product(product(id, 3, "in three", 100));
    }
    fx.origin.add_product(product(6, 31, "in thirty-one", 100));

    let page = fx.products.get_products_by_category(3, 1, 2).await.unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, 5);
    fx.products.get_products_by_category(3, 2, 2).await.unwrap();
    fx.products.get_products_by_category(31, 1, 2).await.unwrap();
    fx.products.get_products_by_category(3, 1, 2).await.unwrap();
    assert_eq!(fx.origin.calls("products_by_category"), 3);

    assert_eq!(fx.products.invalidate_products_by_category(3).await.unwrap(), 2);
    let gateway = fx.manager.gateway();
    assert!(gateway.exists(&fx.products.list_key(31, 1, 2)).await.unwrap());

    // single-product invalidation leaves listings alone
    fx.products.invalidate_product(6).await.unwrap();
    assert!(gateway.exists(&fx.products.list_key(31, 1, 2)).await.unwrap());

    assert_eq!(fx.products.invalidate_product_lists().await.unwrap(), 1);
}

#[tokio::test]
async fn test_refresh_active_products_warms_lists_and_products() {
    let mut settings = CacheSettings::default();
    settings.refresh.warm_list_pages = 2;
    settings.refresh.list_page_size = 10;
    let fx = fixture_with(settings);
    fx.origin.add_product(product(1, 3, "desk lamp", 900));
    fx.origin.add_product(product(2, 4, "bike", 5000));

    assert_eq!(fx.products.refresh_active_products().await.unwrap(), 2);
    assert_eq!(fx.origin.calls("active_products"), 1);
    // two categories, two pages each
    assert_eq!(fx.origin.calls("products_by_category"), 4);

    let calls = fx.origin.total_calls();
    assert_eq!(fx.products.get_active_products().await.unwrap().len(), 2);
    fx.manager.products().clear();
    fx.products.get_product(2).await.unwrap().unwrap();
    fx.products.get_products_by_category(3, 2, 10).await.unwrap();
    assert_eq!(fx.origin.total_calls(), calls);
}

#[tokio::test]
async fn test_product_invalidate_all() {
    let fx = fixture();
    fx.origin.add_product(product(1, 3, "desk lamp", 900));
    fx.products.get_product(1).await.unwrap();
    fx.products.get_active_products().await.unwrap();

    assert_eq!(fx.products.invalidate_all().await.unwrap(), 2);
    assert!(fx.manager.products().is_empty());
}

#[tokio::test]
async fn test_gateway_failure_falls_back_to_origin() {
    let mut settings = CacheSettings::default();
    settings.max_key_length = 64;
    let fx = fixture_with(settings);
    let username = format!("{}@example.edu", "a".repeat(50));
    fx.origin.add_user(user(1, &username));

    // the username key is too long for the gateway, the origin still answers
    let found = fx.users.get_user_by_username(&username).await.unwrap();
    assert_eq!(found.unwrap().id, 1);
    assert_eq!(fx.origin.calls("user_by_username"), 1);
}

#[tokio::test]
async fn test_origin_failure_reaches_caller_and_is_not_cached() {
    let fx = fixture();
    fx.origin.add_product(product(7, 1, "kettle", 1200));
    fx.origin.set_failing(true);

    assert!(fx.products.get_product(7).await.is_err());
    // one call through the gateway, one direct fallback
    assert_eq!(fx.origin.calls("product_by_id"), 2);

    fx.origin.set_failing(false);
    assert!(fx.products.get_product(7).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_ghost_username_negative_cached_for_five_minutes() {
    let fx = fixture();
    assert_eq!(fx.manager.ttl().null_result, Duration::from_secs(300));

    assert!(fx
        .users
        .get_user_by_username("ghost@example.edu")
        .await
        .unwrap()
        .is_none());
    assert_eq!(fx.origin.calls("user_by_username"), 1);

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(fx
        .users
        .get_user_by_username("ghost@example.edu")
        .await
        .unwrap()
        .is_none());
    assert_eq!(fx.origin.calls("user_by_username"), 1);

    tokio::time::advance(Duration::from_secs(300)).await;
    fx.users
        .get_user_by_username("ghost@example.edu")
        .await
        .unwrap();
    assert_eq!(fx.origin.calls("user_by_username"), 2);
}

#[tokio::test]
async fn test_user_invalidation_clears_every_related_key() {
    let fx = fixture();
    fx.origin.add_user(user(5, "eve@example.edu"));
    fx.origin.security.lock().insert(
        5,
        UserSecurity {
            user_id: 5,
            password_hash: "$argon2id$v=19$hash".to_string(),
            failed_login_count: 0,
            locked_until: None,
        },
    );
    fx.origin.permissions.lock().insert(
        5,
        UserPermissions {
            user_id: 5,
            permissions: HashSet::from(["product:create".to_string()]),
        },
    );

    fx.users.get_user(5).await.unwrap().unwrap();
    fx.users.get_user_by_username("eve@example.edu").await.unwrap().unwrap();
    fx.users.get_user_security(5).await.unwrap().unwrap();
    assert!(fx
        .users
        .get_user_permissions(5)
        .await
        .unwrap()
        .unwrap()
        .has("product:create"));

    let gateway = fx.manager.gateway();
    let keys = [
        fx.users.user_key(5),
        fx.users.username_key("eve@example.edu"),
        fx.users.security_key(5),
        fx.users.permissions_key(5),
    ];
    for key in &keys {
        assert!(gateway.exists(key).await.unwrap(), "{} not cached", key);
    }

    fx.users.invalidate_user(5).await.unwrap();
    fx.users.invalidate_user(5).await.unwrap();
    for key in &keys {
        assert!(!gateway.exists(key).await.unwrap(), "{} still cached", key);
    }
    assert!(!fx.manager.users().contains(5));
}

#[tokio::test]
async fn test_security_records_never_enter_l1() {
    let fx = fixture();
    fx.origin.security.lock().insert(
        9,
        UserSecurity {
            user_id: 9,
            password_hash: "secret".to_string(),
            failed_login_count: 2,
            locked_until: None,
        },
    );

    fx.users.get_user_security(9).await.unwrap().unwrap();
    assert!(fx.manager.users().is_empty());

    fx.users.invalidate_user_security(9).await.unwrap();
    fx.users.get_user_security(9).await.unwrap();
    assert_eq!(fx.origin.calls("user_security"), 2);
}

#[tokio::test]
async fn test_set_user_writes_through() {
    let fx = fixture();
    fx.users.set_user(&user(3, "carol@example.edu")).await.unwrap();

    assert_eq!(fx.users.get_user(3).await.unwrap().unwrap().username, "carol@example.edu");
    fx.manager.users().clear();
    fx.users.get_user_by_username("carol@example.edu").await.unwrap().unwrap();
    assert_eq!(fx.origin.total_calls(), 0);

    let stats = fx.users.stats();
    assert_eq!(stats.l1_entries, 1);
    assert_eq!(stats.l1_hits, 1);
}

#[tokio::test]
async fn test_user_pages_cached_until_invalidated() {
    let fx = fixture();
    for id in 1..=3 {
        fx.origin.add_user(user(id, &format!("user{}@example.edu", id)));
    }

    assert_eq!(fx.users.get_users_page(1, 2).await.unwrap().items.len(), 2);
    assert_eq!(fx.users.get_users_page(2, 2).await.unwrap().items.len(), 1);
    fx.users.get_users_page(1, 2).await.unwrap();
    assert_eq!(fx.origin.calls("users_page"), 2);

    assert_eq!(fx.users.invalidate_user_lists().await.unwrap(), 2);
    fx.users.get_users_page(1, 2).await.unwrap();
    assert_eq!(fx.origin.calls("users_page"), 3);
}

#[tokio::test]
async fn test_student_identity_is_memoized() {
    let fx = fixture();
    fx.origin
        .students
        .lock()
        .insert(("20240001".to_string(), "Li Hua".to_string()));

    assert!(fx.users.validate_student_identity("20240001", "Li Hua").await.unwrap());
    assert!(fx.users.validate_student_identity(" 20240001 ", "Li Hua").await.unwrap());
    assert!(!fx.users.validate_student_identity("20240001", "Wang Wei").await.unwrap());
    assert!(!fx.users.validate_student_identity("20240001", "Wang Wei").await.unwrap());
    assert_eq!(fx.origin.calls("validate_student"), 2);

    assert!(!fx.users.validate_student_identity("", "Li Hua").await.unwrap());
    assert_eq!(fx.origin.calls("validate_student"), 2);

    assert!(fx
        .users
        .invalidate_student_identity("20240001", "Li Hua")
        .await
        .unwrap());
    fx.users.validate_student_identity("20240001", "Li Hua").await.unwrap();
    assert_eq!(fx.origin.calls("validate_student"), 3);
}

#[tokio::test]
async fn test_category_queries_share_one_tree_load() {
    let fx = fixture();
    *fx.origin.categories.lock() = vec![
        category(1, None, 0),
        category(2, Some(1), 1),
        category(3, Some(1), 0),
        category(4, Some(3), 0),
        category(5, None, 1),
    ];

    let tree = fx.categories.get_category_tree().await.unwrap();
    assert_eq!(tree.len(), 2);
    assert_eq!(fx.categories.get_descendant_ids(1).await.unwrap(), vec![1, 3, 4, 2]);
    let children: Vec<i64> = fx
        .categories
        .get_subcategories(1)
        .await
        .unwrap()
        .iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(children, vec![3, 2]);
    assert_eq!(
        fx.categories.get_category(4).await.unwrap().unwrap().category.id,
        4
    );
    assert!(fx.categories.get_category(42).await.unwrap().is_none());
    assert_eq!(fx.origin.calls("all_categories"), 1);

    assert!(fx.categories.invalidate_category_tree().await.unwrap());
    fx.categories.get_category_tree().await.unwrap();
    assert_eq!(fx.origin.calls("all_categories"), 2);
}

#[tokio::test]
async fn test_tree_refresh_during_concurrent_reads() {
    let fx = fixture();
    *fx.origin.categories.lock() = vec![category(1, None, 0), category(2, Some(1), 0)];
    fx.categories.get_category_tree().await.unwrap();

    // the rebuilt tree has a new branch
    *fx.origin.categories.lock() = vec![
        category(1, None, 0),
        category(2, Some(1), 0),
        category(3, Some(1), 1),
    ];
    fx.categories.invalidate_category_tree().await.unwrap();
    fx.origin.set_delay(Duration::from_millis(50));

    let readers: Vec<_> = (0..10)
        .map(|_| {
            let categories = Arc::clone(&fx.categories);
            tokio::spawn(async move { categories.get_category_tree().await })
        })
        .collect();
    let refresher = {
        let categories = Arc::clone(&fx.categories);
        tokio::spawn(async move { categories.refresh_category_tree().await })
    };

    assert_eq!(refresher.await.unwrap().unwrap(), 3);
    for reader in readers {
        let tree = reader.await.unwrap().unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].subtree_ids(), vec![1, 2, 3]);
    }
    // the readers share one load; the forced refresh may or may not need its own
    let loads = fx.origin.calls("all_categories") - 1;
    assert!((1..=2).contains(&loads), "{} tree loads", loads);
}

#[tokio::test]
async fn test_config_snapshots_and_settings() {
    let fx = fixture();
    fx.origin
        .settings
        .lock()
        .insert("site_name".to_string(), "Campus Market".to_string());

    assert!(fx.config.get_auth_settings().await.unwrap().is_some());
    assert_eq!(
        fx.config.get_setting("site_name").await.unwrap().as_deref(),
        Some("Campus Market")
    );
    assert!(fx.config.get_setting("missing").await.unwrap().is_none());
    fx.config.get_setting("missing").await.unwrap();
    assert_eq!(fx.origin.calls("setting"), 2);

    fx.origin
        .settings
        .lock()
        .insert("site_name".to_string(), "Campus Bazaar".to_string());
    assert!(fx.config.invalidate_setting("site_name").await.unwrap());
    assert_eq!(
        fx.config.get_setting("site_name").await.unwrap().as_deref(),
        Some("Campus Bazaar")
    );

    assert_eq!(fx.config.invalidate_all().await.unwrap(), 3);
}

#[tokio::test]
async fn test_refresh_snapshots_applies_cache_policy() {
    let fx = fixture();
    let mut policy = CacheSettings::default();
    policy.ttl.null_result = Duration::from_secs(45);
    policy.refresh.interval = Duration::from_secs(90);
    *fx.origin.cache_policy.lock() = Some(policy.clone());

    assert!(fx.config.refresh_snapshots().await.unwrap());
    assert_eq!(fx.manager.gateway().null_result_ttl(), Duration::from_secs(45));
    assert_eq!(fx.manager.refresh_settings().interval, Duration::from_secs(90));
    assert_eq!(
        fx.config.get_cache_policy().await.unwrap(),
        Some(policy)
    );

    // unchanged policy on the next pass
    assert!(!fx.config.refresh_snapshots().await.unwrap());

    let key = fx.config.cache_policy_key();
    assert!(matches!(
        fx.manager.gateway().get::<CacheSettings>(&key).await.unwrap(),
        Some(Lookup::Found(_))
    ));
    assert!(key.starts_with(&fx.manager.keys().domain_prefix(CacheDomain::Config)));
}

#[tokio::test]
async fn test_rename_drops_previous_username_index() {
    let fx = fixture();
    fx.origin.add_user(user(1, "old@example.edu"));
    fx.users.get_user_by_username("old@example.edu").await.unwrap().unwrap();

    let renamed = user(1, "new@example.edu");
    fx.origin.add_user(renamed.clone());
    fx.users.set_user(&renamed).await.unwrap();
    fx.users.invalidate_user(1).await.unwrap();

    assert!(fx
        .users
        .get_user_by_username("old@example.edu")
        .await
        .unwrap()
        .is_none());
    assert_eq!(fx.origin.calls("user_by_username"), 2);
}

#[tokio::test]
async fn test_rename_without_l1_entry_drops_previous_username_index() {
    let fx = fixture();
    fx.users.set_user(&user(2, "bob@example.edu")).await.unwrap();
    fx.manager.users().clear();

    fx.users.set_user(&user(2, "robert@example.edu")).await.unwrap();

    let gateway = fx.manager.gateway();
    assert!(!gateway
        .exists(&fx.users.username_key("bob@example.edu"))
        .await
        .unwrap());
    assert!(gateway
        .exists(&fx.users.username_key("robert@example.edu"))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_batch_read_counts_each_lookup_once() {
    let fx = fixture();
    fx.origin.add_product(product(1, 3, "desk lamp", 900));
    let gateway = fx.manager.gateway();
    let l1 = fx.manager.products();

    fx.products.get_products(&[1]).await.unwrap();
    assert_eq!(gateway.counter().total_requests(), 1);
    assert_eq!(gateway.counter().misses(), 1);
    assert_eq!(l1.counter().total_requests(), 1);
    assert_eq!(l1.counter().hits(), 0);

    fx.products.get_products(&[1]).await.unwrap();
    assert_eq!(gateway.counter().total_requests(), 1);
    assert_eq!(l1.counter().total_requests(), 2);
    assert_eq!(l1.counter().hits(), 1);

    l1.clear();
    fx.products.get_products(&[1]).await.unwrap();
    assert_eq!(gateway.counter().total_requests(), 2);
    assert_eq!(gateway.counter().hits(), 1);
    assert!((gateway.hit_rate() - 0.5).abs() < f64::EPSILON);
    assert_eq!(fx.origin.calls("product_by_id"), 1);
}

#[tokio::test]
async fn test_invalidation_is_not_counted_as_lookup() {
    let fx = fixture();
    fx.users.set_user(&user(5, "eve@example.edu")).await.unwrap();
    fx.manager.users().clear();
    let gateway = fx.manager.gateway();
    let before = gateway.counter().total_requests();

    fx.users.invalidate_user(5).await.unwrap();

    assert_eq!(gateway.counter().total_requests(), before);
    assert!(!gateway
        .exists(&fx.users.username_key("eve@example.edu"))
        .await
        .unwrap());
}
