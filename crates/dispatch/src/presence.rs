// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Presence and availability index for transporters and drivers.
//!
//! A presence entry exists if and only if the transporter is accepting
//! broadcasts.  Entries carry a TTL; a missed renewal drops them.  The
//! delivery fabric consumes the narrow [`Presence`] interface rather than
//! this module's concrete type, so the fabric has no import back into the
//! index internals.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::durable::DurableStore;
use crate::model::Role;
use crate::store::lock::DistLock;
use crate::store::{keys, SharedStore};

/// The slice of presence the delivery fabric needs: heartbeat extension,
/// restore-on-reconnect and explicit offline.
#[async_trait]
pub trait Presence: Send + Sync {
    /// Extend the presence TTL and refresh coordinates, but only if the
    /// entry currently exists.  A late heartbeat must not revive a session
    /// the user just toggled offline.  Returns whether an entry was
    /// extended.
    async fn heartbeat(&self, user_id: &str, role: Role, lat: f64, lng: f64)
        -> anyhow::Result<bool>;

    /// On reconnection, re-create the presence entry when the durable
    /// `is_available` flag is set.  Returns whether the user came online.
    async fn restore_on_connect(&self, user_id: &str, role: Role) -> anyhow::Result<bool>;

    /// Drop the presence entry, geo row and online membership.
    async fn offline(&self, user_id: &str, role: Role) -> anyhow::Result<()>;
}

/// A live presence entry, decoded from the detail hash.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub truck_type_key: String,
    pub vehicle_id: String,
    pub lat: f64,
    pub lng: f64,
    pub is_on_trip: bool,
    pub last_seen: u64,
}

/// Shared-store-backed presence index.
pub struct PresenceIndex {
    store: Arc<dyn SharedStore>,
    durable: Arc<dyn DurableStore>,
    transporter_ttl: Duration,
    driver_ttl: Duration,
}

impl PresenceIndex {
    pub fn new(
        store: Arc<dyn SharedStore>,
        durable: Arc<dyn DurableStore>,
        transporter_ttl: Duration,
        driver_ttl: Duration,
    ) -> Self {
        Self { store, durable, transporter_ttl, driver_ttl }
    }

    /// Upsert a transporter's presence.  Returns whether the transporter
    /// transitioned offline → online (callers enqueue re-broadcast delivery
    /// on that edge).
    pub async fn update(
        &self,
        transporter_id: &str,
        truck_type_key: &str,
        vehicle_id: &str,
        lat: f64,
        lng: f64,
        is_on_trip: bool,
    ) -> anyhow::Result<bool> {
        let presence_key = keys::transporter_presence(transporter_id);
        let was_online = self.store.exists(&presence_key).await?;

        // Truck type changed: the old geo row must go before the new one.
        let reverse_key = keys::transporter_truck_type(transporter_id);
        if let Some(old_type) = self.store.get(&reverse_key).await? {
            if old_type != truck_type_key {
                self.store.geo_remove(&keys::geo_drivers(&old_type), transporter_id).await?;
            }
        }

        let now = crate::model::epoch_ms();
        self.store
            .hset(
                &presence_key,
                &[
                    ("truck_type".to_owned(), truck_type_key.to_owned()),
                    ("vehicle_id".to_owned(), vehicle_id.to_owned()),
                    ("lat".to_owned(), lat.to_string()),
                    ("lng".to_owned(), lng.to_string()),
                    ("on_trip".to_owned(), is_on_trip.to_string()),
                    ("last_seen".to_owned(), now.to_string()),
                ],
                Some(self.transporter_ttl),
            )
            .await?;
        self.store.set(&reverse_key, truck_type_key, None).await?;

        let geo_key = keys::geo_drivers(truck_type_key);
        if is_on_trip {
            // Mid-trip transporters keep their detail hash but leave the
            // searchable index.
            self.store.geo_remove(&geo_key, transporter_id).await?;
        } else {
            self.store.geo_add(&geo_key, transporter_id, lng, lat).await?;
        }
        self.store.sadd(keys::ONLINE_TRANSPORTERS, &[transporter_id.to_owned()]).await?;

        Ok(!was_online)
    }

    /// Remove a transporter from the geo index, online set and detail hash.
    pub async fn remove_transporter(&self, transporter_id: &str) -> anyhow::Result<()> {
        let reverse_key = keys::transporter_truck_type(transporter_id);
        if let Some(truck_type) = self.store.get(&reverse_key).await? {
            self.store.geo_remove(&keys::geo_drivers(&truck_type), transporter_id).await?;
        }
        self.store.del(&reverse_key).await?;
        self.store.del(&keys::transporter_presence(transporter_id)).await?;
        self.store.srem(keys::ONLINE_TRANSPORTERS, transporter_id).await?;
        Ok(())
    }

    /// Decode a transporter's presence entry, if live.
    pub async fn entry(&self, transporter_id: &str) -> anyhow::Result<Option<PresenceEntry>> {
        let hash = self.store.hgetall(&keys::transporter_presence(transporter_id)).await?;
        if hash.is_empty() {
            return Ok(None);
        }
        Ok(Some(PresenceEntry {
            truck_type_key: hash.get("truck_type").cloned().unwrap_or_default(),
            vehicle_id: hash.get("vehicle_id").cloned().unwrap_or_default(),
            lat: hash.get("lat").and_then(|v| v.parse().ok()).unwrap_or(0.0),
            lng: hash.get("lng").and_then(|v| v.parse().ok()).unwrap_or(0.0),
            is_on_trip: hash.get("on_trip").is_some_and(|v| v == "true"),
            last_seen: hash.get("last_seen").and_then(|v| v.parse().ok()).unwrap_or(0),
        }))
    }

    /// Online transporters of the truck type within `radius_km`, nearest
    /// first.  On-trip entries and geo stragglers whose detail hash has
    /// expired are excluded; stragglers are swept from the index on read.
    pub async fn nearest(
        &self,
        truck_type_key: &str,
        lat: f64,
        lng: f64,
        radius_km: f64,
        limit: usize,
    ) -> anyhow::Result<Vec<String>> {
        let geo_key = keys::geo_drivers(truck_type_key);
        let matches = self.store.geo_radius(&geo_key, lng, lat, radius_km, limit).await?;

        let mut ids = Vec::with_capacity(matches.len());
        for m in matches {
            match self.entry(&m.member).await? {
                Some(entry) if !entry.is_on_trip => ids.push(m.member),
                Some(_) => {}
                None => {
                    debug!(transporter_id = %m.member, "sweeping stale geo entry");
                    self.store.geo_remove(&geo_key, &m.member).await?;
                    self.store.srem(keys::ONLINE_TRANSPORTERS, &m.member).await?;
                }
            }
        }
        Ok(ids)
    }

    /// Subset of `ids` that are currently online: one membership scan
    /// against the global online set.  An empty set may mean "just
    /// restarted", so it falls back to durable point reads.
    pub async fn online_filter(&self, ids: &[String]) -> anyhow::Result<Vec<String>> {
        let online = self.store.smembers(keys::ONLINE_TRANSPORTERS).await?;
        if !online.is_empty() {
            let online: std::collections::HashSet<&str> =
                online.iter().map(String::as_str).collect();
            return Ok(ids.iter().filter(|id| online.contains(id.as_str())).cloned().collect());
        }

        let mut result = Vec::new();
        for id in ids {
            if let Some(t) = self.durable.get_transporter(id).await? {
                if t.is_available {
                    result.push(id.clone());
                }
            }
        }
        Ok(result)
    }

    /// All currently-online transporter ids.
    pub async fn online_ids(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.store.smembers(keys::ONLINE_TRANSPORTERS).await?)
    }

    async fn extend_driver(&self, driver_id: &str, lat: f64, lng: f64) -> anyhow::Result<bool> {
        let details_key = keys::driver_details(driver_id);
        if !self.store.exists(&details_key).await? {
            return Ok(false);
        }
        let now = crate::model::epoch_ms();
        self.store
            .hset(
                &details_key,
                &[
                    ("lat".to_owned(), lat.to_string()),
                    ("lng".to_owned(), lng.to_string()),
                    ("last_seen".to_owned(), now.to_string()),
                ],
                Some(self.driver_ttl),
            )
            .await?;
        self.store.expire(&keys::driver_vehicle(driver_id), self.driver_ttl).await?;
        Ok(true)
    }
}

#[async_trait]
impl Presence for PresenceIndex {
    async fn heartbeat(
        &self,
        user_id: &str,
        role: Role,
        lat: f64,
        lng: f64,
    ) -> anyhow::Result<bool> {
        match role {
            Role::Driver => self.extend_driver(user_id, lat, lng).await,
            Role::Transporter => {
                // Existence guard: a heartbeat never re-creates an entry the
                // user toggled away.
                let Some(entry) = self.entry(user_id).await? else {
                    return Ok(false);
                };
                self.update(
                    user_id,
                    &entry.truck_type_key,
                    &entry.vehicle_id,
                    lat,
                    lng,
                    entry.is_on_trip,
                )
                .await?;
                Ok(true)
            }
            Role::Customer => Ok(false),
        }
    }

    async fn restore_on_connect(&self, user_id: &str, role: Role) -> anyhow::Result<bool> {
        if role != Role::Transporter {
            return Ok(false);
        }
        if self.entry(user_id).await?.is_some() {
            // Entry survived the disconnect; nothing to restore.
            return Ok(false);
        }
        let Some(transporter) = self.durable.get_transporter(user_id).await? else {
            return Ok(false);
        };
        if !transporter.is_available {
            return Ok(false);
        }
        let truck_type = match transporter.truck_type_keys.first() {
            Some(t) => t.clone(),
            None => return Ok(false),
        };
        let vehicle = transporter.vehicle_ids.first().cloned().unwrap_or_default();
        let came_online = self
            .update(
                user_id,
                &truck_type,
                &vehicle,
                transporter.last_lat.unwrap_or(0.0),
                transporter.last_lng.unwrap_or(0.0),
                false,
            )
            .await?;
        if came_online {
            info!(transporter_id = %user_id, "presence restored on reconnect");
        }
        Ok(came_online)
    }

    async fn offline(&self, user_id: &str, role: Role) -> anyhow::Result<()> {
        match role {
            Role::Transporter => self.remove_transporter(user_id).await,
            Role::Driver => {
                self.store.del(&keys::driver_details(user_id)).await?;
                self.store.del(&keys::driver_vehicle(user_id)).await?;
                Ok(())
            }
            Role::Customer => Ok(()),
        }
    }
}

/// Spawn the cluster-singleton staleness sweep: members of the online set
/// whose detail hash has expired are dropped and flagged offline in the
/// durable store.
pub fn spawn_stale_sweeper(
    presence: Arc<PresenceIndex>,
    interval: Duration,
    instance_id: String,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let lock = DistLock::new(
            Arc::clone(&presence.store),
            "presence:stale-sweep",
            instance_id,
        );
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            match lock.acquire(interval).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(err = %e, "stale sweep lock unavailable");
                    continue;
                }
            }

            if let Err(e) = sweep_once(&presence).await {
                warn!(err = %e, "stale presence sweep failed");
            }
        }
    });
}

async fn sweep_once(presence: &PresenceIndex) -> anyhow::Result<()> {
    let online = presence.store.smembers(keys::ONLINE_TRANSPORTERS).await?;
    let mut swept = 0usize;
    for id in online {
        if presence.store.exists(&keys::transporter_presence(&id)).await? {
            continue;
        }
        presence.remove_transporter(&id).await?;
        presence.durable.set_transporter_available(&id, false).await?;
        swept += 1;
    }
    if swept > 0 {
        info!(swept, "swept stale presence entries");
    }
    Ok(())
}

#[cfg(test)]
#[path = "presence_tests.rs"]
mod tests;
