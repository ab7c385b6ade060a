// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named distributed lock over the shared store's set-if-absent primitive.

use std::sync::Arc;
use std::time::Duration;

use super::{keys, SharedStore, StoreError};

/// A named lock with a fixed holder tag.  Acquire and release are each one
/// scripted round-trip; re-acquiring while held extends the TTL.
pub struct DistLock {
    store: Arc<dyn SharedStore>,
    key: String,
    holder: String,
}

impl DistLock {
    pub fn new(store: Arc<dyn SharedStore>, name: &str, holder: impl Into<String>) -> Self {
        Self { store, key: keys::lock(name), holder: holder.into() }
    }

    pub async fn acquire(&self, ttl: Duration) -> Result<bool, StoreError> {
        self.store.lock_acquire(&self.key, &self.holder, ttl).await
    }

    /// Extend the TTL while held.  Identical to acquire on the holder side.
    pub async fn extend(&self, ttl: Duration) -> Result<bool, StoreError> {
        self.store.lock_acquire(&self.key, &self.holder, ttl).await
    }

    pub async fn release(&self) -> Result<bool, StoreError> {
        self.store.lock_release(&self.key, &self.holder).await
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
