// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process [`SharedStore`] backend.
//!
//! Development fallback and test double.  All operations run under one async
//! mutex, which makes every multi-step op atomic the same way scripts do on
//! the remote backend.  TTLs are enforced lazily on access.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;

use super::{GeoMatch, SharedStore, StoreError};

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Default)]
struct Inner {
    strings: HashMap<String, Expiring<String>>,
    hashes: HashMap<String, Expiring<HashMap<String, String>>>,
    sets: HashMap<String, Expiring<HashSet<String>>>,
    zsets: HashMap<String, HashMap<String, f64>>,
    lists: HashMap<String, VecDeque<String>>,
    geos: HashMap<String, HashMap<String, (f64, f64)>>,
    subscribers: HashMap<String, Vec<mpsc::Sender<String>>>,
}

struct Expiring<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Option<Duration>) -> Self {
        Self { value, expires_at: ttl.map(|t| Instant::now() + t) }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// In-process shared store.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    list_notify: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()), list_notify: Notify::new() }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn purge_expired<T>(map: &mut HashMap<String, Expiring<T>>, key: &str) {
    if map.get(key).is_some_and(Expiring::is_expired) {
        map.remove(key);
    }
}

/// Great-circle distance between two (lng, lat) points.
fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lng1, lat1) = (a.0.to_radians(), a.1.to_radians());
    let (lng2, lat2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlng = lng2 - lng1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock().await;
        purge_expired(&mut inner.strings, key);
        Ok(inner.strings.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.strings.insert(key.to_owned(), Expiring::new(value.to_owned(), ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        purge_expired(&mut inner.strings, key);
        if inner.strings.contains_key(key) {
            return Ok(false);
        }
        inner.strings.insert(key.to_owned(), Expiring::new(value.to_owned(), Some(ttl)));
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.strings.remove(key);
        inner.hashes.remove(key);
        inner.sets.remove(key);
        inner.zsets.remove(key);
        inner.lists.remove(key);
        inner.geos.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().await;
        purge_expired(&mut inner.strings, key);
        let next = match inner.strings.get(key) {
            Some(entry) => {
                entry.value.parse::<i64>().map_err(|e| StoreError::Corrupt {
                    key: key.to_owned(),
                    detail: e.to_string(),
                })? + 1
            }
            None => 1,
        };
        let expires_at = inner.strings.get(key).and_then(|e| e.expires_at);
        inner
            .strings
            .insert(key.to_owned(), Expiring { value: next.to_string(), expires_at });
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        purge_expired(&mut inner.strings, key);
        purge_expired(&mut inner.hashes, key);
        let at = Some(Instant::now() + ttl);
        if let Some(entry) = inner.strings.get_mut(key) {
            entry.expires_at = at;
            return Ok(true);
        }
        if let Some(entry) = inner.hashes.get_mut(key) {
            entry.expires_at = at;
            return Ok(true);
        }
        if let Some(entry) = inner.sets.get_mut(key) {
            entry.expires_at = at;
            return Ok(true);
        }
        Ok(false)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        purge_expired(&mut inner.strings, key);
        purge_expired(&mut inner.hashes, key);
        purge_expired(&mut inner.sets, key);
        Ok(inner.strings.contains_key(key)
            || inner.hashes.contains_key(key)
            || inner.sets.contains_key(key)
            || inner.zsets.contains_key(key)
            || inner.lists.contains_key(key)
            || inner.geos.contains_key(key))
    }

    async fn hset(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        purge_expired(&mut inner.hashes, key);
        let entry = inner
            .hashes
            .entry(key.to_owned())
            .or_insert_with(|| Expiring::new(HashMap::new(), None));
        for (field, value) in fields {
            entry.value.insert(field.clone(), value.clone());
        }
        if let Some(ttl) = ttl {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut inner = self.inner.lock().await;
        purge_expired(&mut inner.hashes, key);
        Ok(inner.hashes.get(key).map(|e| e.value.clone()).unwrap_or_default())
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        purge_expired(&mut inner.sets, key);
        let entry = inner
            .sets
            .entry(key.to_owned())
            .or_insert_with(|| Expiring::new(HashSet::new(), None));
        let mut added = 0;
        for member in members {
            if entry.value.insert(member.clone()) {
                added += 1;
            }
        }
        Ok(added)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        purge_expired(&mut inner.sets, key);
        if let Some(entry) = inner.sets.get_mut(key) {
            entry.value.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock().await;
        purge_expired(&mut inner.sets, key);
        Ok(inner.sets.get(key).map(|e| e.value.iter().cloned().collect()).unwrap_or_default())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        purge_expired(&mut inner.sets, key);
        Ok(inner.sets.get(key).is_some_and(|e| e.value.contains(member)))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.zsets.entry(key.to_owned()).or_default().insert(member.to_owned(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(zset) = inner.zsets.get_mut(key) {
            zset.remove(member);
        }
        Ok(())
    }

    async fn zpop_due(
        &self,
        key: &str,
        prefix: &str,
        max_score: f64,
    ) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(zset) = inner.zsets.get_mut(key) else {
            return Ok(vec![]);
        };
        let mut due: Vec<(String, f64)> = zset
            .iter()
            .filter(|(member, score)| **score <= max_score && member.starts_with(prefix))
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        due.sort_by(|a, b| a.1.total_cmp(&b.1));
        for (member, _) in &due {
            zset.remove(member);
        }
        Ok(due.into_iter().map(|(member, _)| member).collect())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.lists.entry(key.to_owned()).or_default().push_back(value.to_owned());
        drop(inner);
        self.list_notify.notify_waiters();
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.lists.get_mut(key).and_then(VecDeque::pop_front))
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.list_notify.notified();
            if let Some(value) = self.lpop(key).await? {
                return Ok(Some(value));
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Ok(None);
            };
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(remaining) => return Ok(None),
            }
        }
    }

    async fn geo_add(
        &self,
        key: &str,
        member: &str,
        lng: f64,
        lat: f64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.geos.entry(key.to_owned()).or_default().insert(member.to_owned(), (lng, lat));
        Ok(())
    }

    async fn geo_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(geo) = inner.geos.get_mut(key) {
            geo.remove(member);
        }
        Ok(())
    }

    async fn geo_radius(
        &self,
        key: &str,
        lng: f64,
        lat: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<GeoMatch>, StoreError> {
        let inner = self.inner.lock().await;
        let Some(geo) = inner.geos.get(key) else {
            return Ok(vec![]);
        };
        let mut matches: Vec<GeoMatch> = geo
            .iter()
            .filter_map(|(member, pos)| {
                let distance_km = haversine_km((lng, lat), *pos);
                (distance_km <= radius_km)
                    .then(|| GeoMatch { member: member.clone(), distance_km })
            })
            .collect();
        matches.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(senders) = inner.subscribers.get_mut(channel) {
            senders.retain(|tx| tx.try_send(payload.to_owned()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, StoreError> {
        let (tx, rx) = mpsc::channel(256);
        let mut inner = self.inner.lock().await;
        inner.subscribers.entry(channel.to_owned()).or_default().push(tx);
        Ok(rx)
    }

    async fn lock_acquire(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        purge_expired(&mut inner.strings, key);
        match inner.strings.get(key) {
            Some(entry) if entry.value != holder => Ok(false),
            _ => {
                inner
                    .strings
                    .insert(key.to_owned(), Expiring::new(holder.to_owned(), Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn lock_release(&self, key: &str, holder: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        purge_expired(&mut inner.strings, key);
        if inner.strings.get(key).is_some_and(|e| e.value == holder) {
            inner.strings.remove(key);
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
