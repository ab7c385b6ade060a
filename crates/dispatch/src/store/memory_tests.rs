// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::MemoryStore;
use crate::store::SharedStore;

#[tokio::test]
async fn set_get_with_ttl_expires() {
    tokio::time::pause();
    let store = MemoryStore::new();
    store.set("k", "v", Some(Duration::from_millis(50))).await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    tokio::time::advance(Duration::from_millis(60)).await;
    assert_eq!(store.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn set_nx_respects_existing() {
    let store = MemoryStore::new();
    assert!(store.set_nx("k", "a", Duration::from_secs(10)).await.unwrap());
    assert!(!store.set_nx("k", "b", Duration::from_secs(10)).await.unwrap());
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));
}

#[tokio::test]
async fn incr_starts_at_one() {
    let store = MemoryStore::new();
    assert_eq!(store.incr("n").await.unwrap(), 1);
    assert_eq!(store.incr("n").await.unwrap(), 2);
}

#[tokio::test]
async fn zpop_due_filters_score_and_prefix() {
    let store = MemoryStore::new();
    store.zadd("pending", "timer:booking:a", 100.0).await.unwrap();
    store.zadd("pending", "timer:booking:b", 300.0).await.unwrap();
    store.zadd("pending", "timer:radius:c", 100.0).await.unwrap();

    let due = store.zpop_due("pending", "timer:booking:", 200.0).await.unwrap();
    assert_eq!(due, vec!["timer:booking:a".to_owned()]);

    // Popped members are gone; the rest remain.
    let again = store.zpop_due("pending", "timer:booking:", 200.0).await.unwrap();
    assert!(again.is_empty());
    let radius = store.zpop_due("pending", "timer:radius:", 200.0).await.unwrap();
    assert_eq!(radius, vec!["timer:radius:c".to_owned()]);
}

#[tokio::test]
async fn geo_radius_orders_by_distance() {
    let store = MemoryStore::new();
    // Bengaluru center, two nearby points and one far away.
    store.geo_add("geo", "near", 77.60, 12.975).await.unwrap();
    store.geo_add("geo", "nearer", 77.595, 12.972).await.unwrap();
    store.geo_add("geo", "chennai", 80.27, 13.08).await.unwrap();

    let matches = store.geo_radius("geo", 77.594, 12.971, 10.0, 10).await.unwrap();
    let members: Vec<&str> = matches.iter().map(|m| m.member.as_str()).collect();
    assert_eq!(members, vec!["nearer", "near"]);
    assert!(matches[0].distance_km < matches[1].distance_km);
}

#[tokio::test]
async fn geo_radius_respects_limit() {
    let store = MemoryStore::new();
    for i in 0..5 {
        store.geo_add("geo", &format!("t{i}"), 77.594 + 0.001 * i as f64, 12.971).await.unwrap();
    }
    let matches = store.geo_radius("geo", 77.594, 12.971, 50.0, 2).await.unwrap();
    assert_eq!(matches.len(), 2);
}

#[tokio::test]
async fn blpop_wakes_on_push() {
    let store = std::sync::Arc::new(MemoryStore::new());
    let popper = std::sync::Arc::clone(&store);
    let handle =
        tokio::spawn(async move { popper.blpop("q", Duration::from_secs(2)).await.unwrap() });
    tokio::time::sleep(Duration::from_millis(20)).await;
    store.rpush("q", "job").await.unwrap();
    assert_eq!(handle.await.unwrap().as_deref(), Some("job"));
}

#[tokio::test]
async fn blpop_times_out_empty() {
    let store = MemoryStore::new();
    let popped = store.blpop("q", Duration::from_millis(30)).await.unwrap();
    assert_eq!(popped, None);
}

#[tokio::test]
async fn lock_acquire_extend_release() {
    let store = MemoryStore::new();
    assert!(store.lock_acquire("lock:x", "a", Duration::from_secs(5)).await.unwrap());
    // Re-acquire by the same holder extends.
    assert!(store.lock_acquire("lock:x", "a", Duration::from_secs(5)).await.unwrap());
    // Another holder is refused.
    assert!(!store.lock_acquire("lock:x", "b", Duration::from_secs(5)).await.unwrap());
    // Release by the wrong holder is a no-op.
    assert!(!store.lock_release("lock:x", "b").await.unwrap());
    assert!(store.lock_release("lock:x", "a").await.unwrap());
    assert!(store.lock_acquire("lock:x", "b", Duration::from_secs(5)).await.unwrap());
}

#[tokio::test]
async fn lock_expires_after_ttl() {
    tokio::time::pause();
    let store = MemoryStore::new();
    assert!(store.lock_acquire("lock:x", "a", Duration::from_millis(40)).await.unwrap());
    tokio::time::advance(Duration::from_millis(50)).await;
    assert!(store.lock_acquire("lock:x", "b", Duration::from_secs(5)).await.unwrap());
}

#[tokio::test]
async fn publish_reaches_subscribers() {
    let store = MemoryStore::new();
    let mut rx = store.subscribe("chan").await.unwrap();
    store.publish("chan", "hello").await.unwrap();
    assert_eq!(rx.recv().await.as_deref(), Some("hello"));
}

#[tokio::test]
async fn publish_without_subscribers_is_ok() {
    let store = MemoryStore::new();
    store.publish("chan", "nobody").await.unwrap();
}

#[tokio::test]
async fn hash_ttl_drops_whole_hash() {
    tokio::time::pause();
    let store = MemoryStore::new();
    store
        .hset(
            "h",
            &[("lat".to_owned(), "12.9".to_owned())],
            Some(Duration::from_millis(40)),
        )
        .await
        .unwrap();
    assert!(!store.hgetall("h").await.unwrap().is_empty());
    tokio::time::advance(Duration::from_millis(50)).await;
    assert!(store.hgetall("h").await.unwrap().is_empty());
}
