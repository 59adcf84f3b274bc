//! Subdomain cache unit tests

use std::time::Duration;

use shipyard::cache::subdomain::SubdomainCache;

#[tokio::test(start_paused = true)]
async fn test_subdomain_cache_insert_and_get() {
    let cache = SubdomainCache::new(Duration::from_secs(60));
    cache.insert("shop", "https://shop.fly.dev");

    assert_eq!(cache.get("shop").as_deref(), Some("https://shop.fly.dev"));
    assert!(cache.get("blog").is_none());
    assert_eq!(cache.ttl(), Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_subdomain_cache_expiry_without_eviction() {
    let cache = SubdomainCache::new(Duration::from_secs(60));
    cache.insert("shop", "https://shop.fly.dev");

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(cache.get("shop").is_some());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(cache.get("shop").is_none());
    // reads leave expired entries for the sweeper
    assert_eq!(cache.len(), 1);

    assert_eq!(cache.sweep(), 1);
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_subdomain_cache_reinsert_refreshes_expiry() {
    let cache = SubdomainCache::new(Duration::from_secs(10));
    cache.insert("shop", "https://old.fly.dev");

    tokio::time::advance(Duration::from_secs(8)).await;
    cache.insert("shop", "https://new.fly.dev");

    tokio::time::advance(Duration::from_secs(8)).await;
    assert_eq!(cache.get("shop").as_deref(), Some("https://new.fly.dev"));
    assert_eq!(cache.sweep(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_subdomain_cache_remove_and_clear() {
    let cache = SubdomainCache::new(Duration::from_secs(60));
    cache.insert("shop", "https://shop.fly.dev");
    cache.insert("blog", "https://blog.vercel.app");

    let removed = cache.remove("shop").unwrap();
    assert_eq!(removed.backend_url, "https://shop.fly.dev");
    assert_eq!(cache.len(), 1);

    cache.clear();
    assert!(cache.is_empty());
}
