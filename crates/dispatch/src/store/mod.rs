// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared key-value store abstraction used for all cross-instance
//! coordination: presence, timers, markers, notified sets and pub/sub.
//!
//! Two backends implement [`SharedStore`]: [`memory::MemoryStore`] (in
//! process, used in development fallback and tests) and
//! [`redis_store::RedisStore`] (remote).  Multi-step atomic operations —
//! lock acquire/release and due-timer pop — are trait methods so the remote
//! backend can issue them as a single scripted round-trip.

pub mod keys;
pub mod lock;
pub mod memory;
pub mod redis_store;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::DispatchConfig;

/// Errors from the shared store.  Ordinary not-found is `Ok(None)`, never an
/// error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("shared store unavailable: {0}")]
    Unavailable(String),
    #[error("shared store command timed out")]
    Timeout,
    #[error("shared store script failed: {0}")]
    Script(String),
    #[error("corrupt value at {key}: {detail}")]
    Corrupt { key: String, detail: String },
}

/// A geo radius match, distance ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMatch {
    pub member: String,
    pub distance_km: f64,
}

/// The shared store operation families.
///
/// Every call resolves to an unambiguous success or failure with no silent
/// partial effect; callers see `StoreError::Unavailable` immediately while
/// disconnected rather than queued commands.
#[async_trait]
pub trait SharedStore: Send + Sync {
    // -- strings --------------------------------------------------------------

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;
    /// Set only if absent; returns whether the value was written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    // -- hashes ---------------------------------------------------------------

    async fn hset(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    // -- sets -----------------------------------------------------------------

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64, StoreError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    // -- sorted sets ----------------------------------------------------------

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;
    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError>;
    /// Atomically pop members with `score <= max_score` whose name starts
    /// with `prefix`.  Single scripted round-trip on the remote backend; each
    /// member is returned to at most one caller across all instances.
    async fn zpop_due(
        &self,
        key: &str,
        prefix: &str,
        max_score: f64,
    ) -> Result<Vec<String>, StoreError>;

    // -- lists ----------------------------------------------------------------

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn lpop(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Blocking left pop with timeout; `Ok(None)` on timeout.
    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>, StoreError>;

    // -- geospatial -----------------------------------------------------------

    async fn geo_add(
        &self,
        key: &str,
        member: &str,
        lng: f64,
        lat: f64,
    ) -> Result<(), StoreError>;
    async fn geo_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;
    /// Members within `radius_km` of the point, nearest first, capped at
    /// `limit`.
    async fn geo_radius(
        &self,
        key: &str,
        lng: f64,
        lat: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<GeoMatch>, StoreError>;

    // -- pub/sub --------------------------------------------------------------

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError>;
    /// Subscribe to a channel.  The receiver yields raw payloads until
    /// dropped.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, StoreError>;

    // -- distributed lock (single scripted round-trip each) -------------------

    /// Set the lock to `holder` with TTL, or extend the TTL if `holder`
    /// already owns it.  Returns whether the caller holds the lock.
    async fn lock_acquire(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;
    /// Delete the lock only while it still names `holder`.  Returns whether
    /// a lock was released.
    async fn lock_release(&self, key: &str, holder: &str) -> Result<bool, StoreError>;
}

/// Connect the configured backend.
///
/// `STORE_URL` set and reachable → remote store.  Unreachable in `--dev` →
/// in-process fallback with a warning; unreachable otherwise → startup error.
pub async fn connect(config: &DispatchConfig) -> anyhow::Result<Arc<dyn SharedStore>> {
    match config.store_url {
        Some(ref url) => match redis_store::RedisStore::connect(url, config).await {
            Ok(store) => {
                tracing::info!(url = %redacted(url), "connected shared store");
                Ok(Arc::new(store))
            }
            Err(e) if config.dev => {
                tracing::warn!(err = %e, "shared store unreachable, using in-process fallback");
                Ok(Arc::new(memory::MemoryStore::new()))
            }
            Err(e) => Err(anyhow::anyhow!("shared store unreachable: {e}")),
        },
        None if config.dev => {
            tracing::info!("no STORE_URL, using in-process store");
            Ok(Arc::new(memory::MemoryStore::new()))
        }
        None => Err(anyhow::anyhow!("STORE_URL is required outside --dev")),
    }
}

/// Strip userinfo from a store URL before logging.
fn redacted(url: &str) -> String {
    match url.split_once('@') {
        Some((scheme_and_auth, rest)) => match scheme_and_auth.split_once("://") {
            Some((scheme, _)) => format!("{scheme}://***@{rest}"),
            None => format!("***@{rest}"),
        },
        None => url.to_owned(),
    }
}
