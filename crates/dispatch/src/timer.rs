// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributed timer engine.
//!
//! A timer is a payload string keyed by name plus a member of the
//! `timers:pending` zset scored by expiry.  The payload carries its own TTL
//! (expiry + safety buffer) so storage self-cleans even if a drain crashes
//! mid-flight.  `drain` pops due members atomically, so each timer fires on
//! exactly one instance; a short per-timer lock then serializes handler
//! execution against re-armed retries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::model::epoch_ms;
use crate::state::DispatchState;
use crate::store::lock::DistLock;
use crate::store::{keys, SharedStore, StoreError};

/// Timer key prefix for booking expiry.
pub const BOOKING_PREFIX: &str = "timer:booking:";
/// Timer key prefix for radius expansion.
pub const RADIUS_PREFIX: &str = "timer:radius:";

/// Payload TTL slack beyond the timer's expiry.
const SAFETY_BUFFER: Duration = Duration::from_secs(60);
/// Per-timer handler lock TTL; a crashed handler frees the timer for the
/// next tick after this.
const HANDLER_LOCK_TTL: Duration = Duration::from_secs(30);

/// A due timer returned from a drain.
#[derive(Debug, Clone, PartialEq)]
pub struct DueTimer {
    pub key: String,
    pub payload: String,
}

/// Schedules and fires named timers across all instances.
pub struct TimerEngine {
    store: Arc<dyn SharedStore>,
}

impl TimerEngine {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Place a timer; an existing timer under the same key is replaced.
    pub async fn schedule(
        &self,
        key: &str,
        payload: &str,
        expires_at_ms: u64,
    ) -> Result<(), StoreError> {
        let ttl = Duration::from_millis(expires_at_ms.saturating_sub(epoch_ms()))
            + SAFETY_BUFFER;
        self.store.set(key, payload, Some(ttl)).await?;
        self.store.zadd(keys::TIMERS_PENDING, key, expires_at_ms as f64).await
    }

    /// Remove a timer; idempotent.
    pub async fn cancel(&self, key: &str) -> Result<(), StoreError> {
        self.store.zrem(keys::TIMERS_PENDING, key).await?;
        self.store.del(key).await
    }

    /// Atomically claim timers due at `now_ms` under `prefix` and return
    /// their payloads.  A timer whose payload string is gone was cancelled
    /// (or outlived its safety buffer) and is dropped silently.
    pub async fn drain(&self, prefix: &str, now_ms: u64) -> Result<Vec<DueTimer>, StoreError> {
        let members =
            self.store.zpop_due(keys::TIMERS_PENDING, prefix, now_ms as f64).await?;
        let mut due = Vec::with_capacity(members.len());
        for key in members {
            match self.store.get(&key).await? {
                Some(payload) => {
                    self.store.del(&key).await?;
                    due.push(DueTimer { key, payload });
                }
                None => debug!(timer = %key, "due timer already cancelled"),
            }
        }
        Ok(due)
    }

    /// Put a claimed timer back, due immediately on the next tick.  Used
    /// when a handler fails; handlers are idempotent so a rerun is safe.
    pub async fn requeue(&self, timer: &DueTimer) -> Result<(), StoreError> {
        self.schedule(&timer.key, &timer.payload, epoch_ms()).await
    }
}

/// Spawn the per-instance drain ticker.  Every instance runs one; the
/// atomic pop plus per-timer lock keep each firing single-owner.
pub fn spawn_timer_loop(state: Arc<DispatchState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.timer_drain_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            drain_tick(&state).await;
        }
    });
}

/// One drain pass over both registered prefixes.
pub(crate) async fn drain_tick(state: &Arc<DispatchState>) {
    let now = epoch_ms();
    for prefix in [BOOKING_PREFIX, RADIUS_PREFIX] {
        let due = match state.timers.drain(prefix, now).await {
            Ok(due) => due,
            Err(e) => {
                warn!(prefix, err = %e, "timer drain failed");
                continue;
            }
        };

        for timer in due {
            let lock = DistLock::new(
                Arc::clone(&state.store),
                &timer.key,
                state.instance_id.clone(),
            );
            match lock.acquire(HANDLER_LOCK_TTL).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(timer = %timer.key, err = %e, "timer lock unavailable");
                    continue;
                }
            }

            let result = if prefix == BOOKING_PREFIX {
                crate::lifecycle::handle_expiry_timer(state, &timer.payload).await
            } else {
                crate::dispatcher::handle_radius_timer(state, &timer.payload).await
            };

            match result {
                Ok(()) => {
                    if let Err(e) = lock.release().await {
                        debug!(timer = %timer.key, err = %e, "timer lock release failed");
                    }
                }
                Err(e) => {
                    // Leave the lock to expire and retry on a later tick.
                    warn!(timer = %timer.key, err = %e, "timer handler failed, requeueing");
                    if let Err(e) = state.timers.requeue(&timer).await {
                        warn!(timer = %timer.key, err = %e, "timer requeue failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
