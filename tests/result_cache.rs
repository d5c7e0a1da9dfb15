//! Integration tests for the result cache through its public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use postpulse::api::GatewayError;
use postpulse::cache::{CacheKey, CacheState, ResultCache, DEFAULT_CAPACITY, DEFAULT_TTL};
use proptest::prelude::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_tasks_share_one_fetch() {
    let cache: ResultCache<u64> = ResultCache::new(DEFAULT_TTL, DEFAULT_CAPACITY);
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::list("analyses");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get(&key, move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, GatewayError>(42)
                    }
                })
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().value, Some(42));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_lru_eviction_keeps_recent_keys() {
    let cache: ResultCache<&'static str> = ResultCache::new(DEFAULT_TTL, 2);
    cache.put(&CacheKey::item("analyses", 1), "one");
    cache.put(&CacheKey::item("analyses", 2), "two");
    cache.put(&CacheKey::item("analyses", 3), "three");

    assert_eq!(cache.len(), 2);
    assert!(cache.peek(&CacheKey::item("analyses", 1)).is_none());
    assert_eq!(
        cache.peek(&CacheKey::item("analyses", 3)).unwrap().state,
        CacheState::Fresh
    );
}

#[tokio::test]
async fn test_clear_empties_everything() {
    let cache: ResultCache<&'static str> = ResultCache::new(DEFAULT_TTL, DEFAULT_CAPACITY);
    cache.put(&CacheKey::named("user", "me"), "me");
    cache.put(&CacheKey::list("analyses"), "list");
    cache.clear();
    assert!(cache.is_empty());
}

proptest! {
    #[test]
    fn prop_key_matches_its_own_collection(collection in "[a-z]{1,12}", id in any::<i64>()) {
        let item = CacheKey::item(&collection, id);
        let list = CacheKey::list(&collection);
        prop_assert!(item.matches_prefix(&collection));
        prop_assert!(list.matches_prefix(&collection));
        prop_assert!(item.matches_prefix(item.as_str()));
    }

    #[test]
    fn prop_longer_collection_name_never_matches(collection in "[a-z]{1,12}", suffix in "[a-z]{1,4}") {
        let other = CacheKey::list(&format!("{collection}{suffix}"));
        prop_assert!(!other.matches_prefix(&collection));
    }
}
