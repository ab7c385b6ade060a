// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use super::DistLock;
use crate::store::memory::MemoryStore;
use crate::store::SharedStore;

#[tokio::test]
async fn two_holders_serialize() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let a = DistLock::new(Arc::clone(&store), "expiry:bk-1", "instance-a");
    let b = DistLock::new(Arc::clone(&store), "expiry:bk-1", "instance-b");

    assert!(a.acquire(Duration::from_secs(5)).await.unwrap());
    assert!(!b.acquire(Duration::from_secs(5)).await.unwrap());
    assert!(a.extend(Duration::from_secs(5)).await.unwrap());
    assert!(a.release().await.unwrap());
    assert!(b.acquire(Duration::from_secs(5)).await.unwrap());
}

#[tokio::test]
async fn release_is_holder_scoped() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let a = DistLock::new(Arc::clone(&store), "radius:bk-2", "instance-a");
    let b = DistLock::new(Arc::clone(&store), "radius:bk-2", "instance-b");

    assert!(a.acquire(Duration::from_secs(5)).await.unwrap());
    // b releasing a's lock must be a no-op.
    assert!(!b.release().await.unwrap());
    assert!(!b.acquire(Duration::from_secs(5)).await.unwrap());
}
