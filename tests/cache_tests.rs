//! Integration tests for the cache store and its snapshots.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use serde_json::{json, Value};

use slice_cache::cache::store::new_shared_store;
use slice_cache::{CacheStore, ConfigurationError, MergeOutcome, Record};

fn items(count: usize) -> Vec<Record> {
    (0..count)
        .map(|id| {
            json!({"id": id, "label": format!("item {id}")})
                .as_object()
                .cloned()
                .unwrap()
        })
        .collect()
}

#[test]
fn test_partial_then_final_lifecycle() {
    let store = CacheStore::new();

    // Partial on an empty key is applied.
    assert_eq!(store.merge("posts", items(500), true), MergeOutcome::Applied);
    assert_eq!(store.get().get("posts").unwrap().len(), 500);

    // A second partial never replaces existing records.
    assert_eq!(store.merge("posts", items(3), true), MergeOutcome::Dropped);
    assert_eq!(store.get().get("posts").unwrap().len(), 500);

    // The final always replaces.
    assert_eq!(store.merge("posts", items(1200), false), MergeOutcome::Applied);
    assert_eq!(store.get().get("posts").unwrap().len(), 1200);

    // Late partial after the final is dropped as well.
    assert_eq!(store.merge("posts", items(500), true), MergeOutcome::Dropped);
    assert_eq!(store.get().get("posts").unwrap().len(), 1200);
}

#[test]
fn test_final_may_shrink_an_entry() {
    let store = CacheStore::new();
    store.merge("tags", items(10), false);
    store.merge("tags", Vec::new(), false);

    let state = store.get();
    assert!(state.contains_key("tags"));
    assert!(!state.has_records("tags"));

    // An empty entry does not block a partial.
    assert_eq!(store.merge("tags", items(2), true), MergeOutcome::Applied);
}

#[test]
fn test_keys_are_independent() {
    let store = CacheStore::new();
    store.merge("users", items(3), false);
    assert_eq!(store.merge("roles", items(2), true), MergeOutcome::Applied);

    let state = store.get();
    assert_eq!(state.len(), 2);
    assert_eq!(state.record_count(), 5);
}

#[test]
fn test_previous_snapshots_are_untouched() {
    let store = CacheStore::new();
    store.merge("users", items(3), false);
    let before = store.get();

    store.merge("users", items(8), false);
    store.merge("roles", items(1), false);

    assert_eq!(before.get("users").unwrap().len(), 3);
    assert!(!before.contains_key("roles"));
    assert!(!before.ptr_eq(&store.get()));
}

#[test]
fn test_observers_see_every_accepted_state_in_order() {
    let store = CacheStore::new();
    let seen: Arc<Mutex<Vec<usize>>> = Arc::default();

    let sink = seen.clone();
    let subscription = store.subscribe(move |state| {
        sink.lock().push(state.get("posts").map_or(0, <[_]>::len));
    });

    store.merge("posts", items(500), true);
    store.merge("posts", items(400), true); // dropped, not observed
    store.merge("posts", items(1200), false);

    assert_eq!(*seen.lock(), vec![500, 1200]);

    subscription.unsubscribe();
    store.merge("posts", items(1), false);
    assert_eq!(seen.lock().len(), 2);
    assert_eq!(store.observer_count(), 0);
}

#[test]
fn test_dropping_subscription_unsubscribes() {
    let store = CacheStore::new();
    {
        let _a = store.subscribe(|_| {});
        let _b = store.subscribe(|_| {});
        assert_eq!(store.observer_count(), 2);
    }
    assert_eq!(store.observer_count(), 0);
}

#[test]
fn test_concurrent_merges_are_serialized() {
    let store = new_shared_store();
    let notifications: Arc<Mutex<Vec<usize>>> = Arc::default();

    let sink = notifications.clone();
    let _subscription = store.subscribe(move |state| {
        sink.lock().push(state.len());
    });

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let store = store.clone();
            thread::spawn(move || {
                for round in 0..50 {
                    store.merge(&format!("key-{worker}-{round}"), items(1), false);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Every merge added one key; notifications arrive in acceptance order.
    let seen = notifications.lock().clone();
    assert_eq!(seen.len(), 400);
    assert_eq!(seen, (1..=400).collect::<Vec<_>>());
    assert_eq!(store.get().len(), 400);
}

#[tokio::test]
async fn test_watch_receives_latest_state() {
    let store = CacheStore::new();
    let mut rx = store.watch();

    store.merge("users", items(2), false);
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().record_count(), 2);
}

#[test]
fn test_lookup_by_string_form() {
    let store = CacheStore::new();
    store.merge("users", items(5), false);
    let state = store.get();

    let label = state.lookup("users", "id", "3", "label").unwrap();
    assert_eq!(label, Some(&Value::String("item 3".to_string())));

    assert_eq!(state.lookup("users", "id", "99", "label").unwrap(), None);
    assert_eq!(state.lookup("missing", "id", "1", "label").unwrap(), None);
}

#[test]
fn test_lookup_requires_value_and_name() {
    let state = CacheStore::new().get();
    assert_eq!(
        state.find_record("users", "id", "").unwrap_err(),
        ConfigurationError::MissingParameter("value")
    );
    assert_eq!(
        state.find_record("", "id", "1").unwrap_err(),
        ConfigurationError::MissingParameter("name")
    );
}
