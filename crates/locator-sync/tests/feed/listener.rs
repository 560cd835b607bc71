//! Tests for `ChangeFeedListener` against the in-memory store.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use locator_sync::{
    error::{FeedError, LocatorError},
    feed::{ChangeFeedListener, ChangeKind, FeedDelivery, RawChange},
    store::{MemoryStore, RemoteStore},
    types::Collection,
};

// ============================================================================
// Helpers
// ============================================================================

fn shelter() -> serde_json::Value {
    json!({ "type": "shelter", "name": "Harbor House", "lat": 40.7, "lng": -74.0 })
}

fn listen(store: &Arc<MemoryStore>) -> (ChangeFeedListener, Arc<Mutex<Vec<FeedDelivery>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let log_clone = Arc::clone(&log);
    let remote: Arc<dyn RemoteStore> = store.clone();
    let listener = ChangeFeedListener::subscribe(remote, &Collection::ALL, move |delivery| {
        log_clone.lock().push(delivery);
    })
    .expect("subscribe");
    (listener, log)
}

// ============================================================================
// Delivery
// ============================================================================

#[test]
fn subscribes_once_per_collection() {
    let store = Arc::new(MemoryStore::new());
    let (listener, _log) = listen(&store);

    assert!(listener.is_open());
    assert_eq!(listener.subscription_count(), 2);
    assert_eq!(store.subscriber_count(), 2);
}

#[test]
fn every_change_is_delivered_in_order() {
    let store = Arc::new(MemoryStore::new());
    let (_listener, log) = listen(&store);

    store.external_insert(Collection::Locations, shelter()).unwrap();
    store.external_update(Collection::Locations, 1, json!({ "available_beds": 2 }));
    store.external_delete(Collection::Locations, 1);

    let kinds: Vec<ChangeKind> = log
        .lock()
        .iter()
        .map(|d| match d {
            FeedDelivery::Event(event) => event.kind(),
            other => panic!("unexpected delivery: {other:?}"),
        })
        .collect();
    assert_eq!(
        kinds,
        vec![ChangeKind::Inserted, ChangeKind::Updated, ChangeKind::Deleted]
    );
}

#[test]
fn unusable_payload_is_forwarded_as_malformed() {
    let store = Arc::new(MemoryStore::new());
    let (_listener, log) = listen(&store);

    store.emit(
        Collection::Reviews,
        RawChange {
            event_type: "TRUNCATE".to_string(),
            table: Some("reviews".to_string()),
            new: json!(null),
            old: json!(null),
        },
    );

    assert_eq!(
        *log.lock(),
        vec![FeedDelivery::Malformed(FeedError::UnknownEventType(
            "TRUNCATE".to_string()
        ))]
    );
}

#[test]
fn channel_status_is_reported_per_collection() {
    let store = Arc::new(MemoryStore::new());
    let (_listener, log) = listen(&store);

    store.drop_connections("socket closed");
    store.restore_connections();

    let log = log.lock();
    assert_eq!(log.len(), 4);
    assert!(log.contains(&FeedDelivery::Lost {
        collection: Collection::Reviews,
        reason: "socket closed".to_string(),
    }));
    assert!(log.contains(&FeedDelivery::Resumed {
        collection: Collection::Locations,
    }));
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn teardown_stops_delivery_and_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let (listener, log) = listen(&store);

    listener.teardown();
    listener.teardown();
    store.external_insert(Collection::Locations, shelter()).unwrap();

    assert!(!listener.is_open());
    assert_eq!(listener.subscription_count(), 0);
    assert_eq!(store.subscriber_count(), 0);
    assert!(log.lock().is_empty());
}

#[test]
fn dropping_the_listener_unsubscribes() {
    let store = Arc::new(MemoryStore::new());
    let (listener, _log) = listen(&store);
    drop(listener);
    assert_eq!(store.subscriber_count(), 0);
}

#[test]
fn subscribe_failure_leaves_nothing_behind() {
    let store = Arc::new(MemoryStore::new());
    store.set_offline(true);

    let remote: Arc<dyn RemoteStore> = store.clone();
    let result = ChangeFeedListener::subscribe(remote, &Collection::ALL, |_| {});

    assert!(matches!(
        result,
        Err(LocatorError::Subscribe {
            collection: Collection::Locations,
            ..
        })
    ));
    assert_eq!(store.subscriber_count(), 0);
}
