// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Progressive-radius dispatch: initial search, fan-out, expansion timers,
//! re-broadcast on coming online and the startup expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::durable::DurableStore;
use crate::fabric::events::{BroadcastPayload, Room, ServerEvent};
use crate::model::{epoch_ms, Booking};
use crate::state::DispatchState;
use crate::store::keys;
use crate::store::SharedStore;

/// Active broadcasts older than this are not re-delivered to transporters
/// coming online.
const REBROADCAST_MAX_AGE_MS: u64 = 30 * 60 * 1000;
/// Re-broadcast delivery cap per online transition.
const REBROADCAST_CAP: usize = 20;
/// Worker poll window for the re-broadcast queue.
const REBROADCAST_POLL: Duration = Duration::from_secs(5);
/// Marker kept alongside the radius step index when the durable fallback
/// already notified everyone and expansion should stop.
const STEP_DONE: &str = "done";

/// Radius expansion timer payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct RadiusTimerPayload {
    pub booking_id: String,
    pub customer_id: String,
    pub truck_type_key: String,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub current_step_index: usize,
}

/// The one builder for the canonical broadcast packet; every delivery path
/// goes through here.
pub fn build_broadcast_payload(
    booking: &Booking,
    radius_step: usize,
    is_rebroadcast: bool,
    now_ms: u64,
) -> BroadcastPayload {
    BroadcastPayload {
        booking_id: booking.id.clone(),
        customer_name: booking.customer_name.clone(),
        truck_type: booking.truck_type.clone(),
        truck_subtype: booking.truck_subtype.clone(),
        pickup: booking.pickup.clone(),
        drop: booking.drop.clone(),
        pickup_address: booking.pickup.address.clone(),
        pickup_city: booking.pickup.city.clone(),
        pickup_lat: booking.pickup.lat,
        pickup_lng: booking.pickup.lng,
        drop_address: booking.drop.address.clone(),
        drop_city: booking.drop.city.clone(),
        drop_lat: booking.drop.lat,
        drop_lng: booking.drop.lng,
        trucks_total: booking.trucks_needed,
        trucks_remaining: booking.trucks_remaining(),
        price_per_truck: booking.price_per_truck,
        total_amount: booking.total_amount,
        goods: booking.goods.clone(),
        weight_tonnes: booking.weight_tonnes,
        timeout_seconds: booking.remaining_seconds(now_ms),
        radius_step,
        is_rebroadcast,
    }
}

/// Resolve the initial match set for a fresh booking.
///
/// Step 1 of the radius ladder runs inline; when it finds nobody, the
/// durable store's transporter list intersected with the online set stands
/// in.  Returns the matched ids and whether the fallback was used (further
/// expansion is pointless after it — everyone reachable is already
/// notified).
pub async fn initial_match(
    state: &Arc<DispatchState>,
    booking: &Booking,
) -> anyhow::Result<(Vec<String>, bool)> {
    let step = state.radius_steps[0];
    let key = booking.truck_type_key();
    let nearby = state
        .presence
        .nearest(
            &key,
            booking.pickup.lat,
            booking.pickup.lng,
            step.radius_km,
            state.config.radius_step_limit,
        )
        .await?;
    if !nearby.is_empty() {
        return Ok((nearby, false));
    }

    let all = state.durable.transporters_by_type(&key).await?;
    if all.is_empty() {
        return Ok((vec![], false));
    }
    let online = state.presence.online_filter(&all).await?;
    Ok((online, true))
}

/// Fan a broadcast out to `ids`, deduped against the notified set.
///
/// Returns the transporters actually sent this packet.  The notified set is
/// the at-most-once guard: a failed set write is retried by the store layer,
/// then logged and the broadcast proceeds — delivery must not block on the
/// marker.
pub async fn fan_out(
    state: &Arc<DispatchState>,
    booking: &Booking,
    ids: &[String],
    radius_step: usize,
    is_rebroadcast: bool,
) -> Vec<String> {
    let notified_key = keys::broadcast_notified(&booking.id);
    let now = epoch_ms();
    let payload = build_broadcast_payload(booking, radius_step, is_rebroadcast, now);

    let mut fresh = Vec::new();
    for id in ids {
        match state.store.sadd(&notified_key, std::slice::from_ref(id)).await {
            Ok(1) => fresh.push(id.clone()),
            Ok(_) => {} // already notified on an earlier step
            Err(e) => {
                warn!(booking_id = %booking.id, transporter_id = %id, err = %e,
                    "notified-set write failed, broadcasting anyway");
                fresh.push(id.clone());
            }
        }
    }
    if fresh.is_empty() {
        return fresh;
    }

    // Self-cleaning: the set outlives the horizon by a buffer, not forever.
    let ttl = Duration::from_millis(booking.expires_at.saturating_sub(now))
        + Duration::from_secs(60);
    if let Err(e) = state.store.expire(&notified_key, ttl).await {
        debug!(booking_id = %booking.id, err = %e, "notified-set expire failed");
    }

    for id in &fresh {
        state
            .fabric
            .emit(&Room::User(id.clone()), &ServerEvent::NewBroadcast(payload.clone()))
            .await;
    }

    if let Err(e) = state.durable.append_notified(&booking.id, &fresh).await {
        warn!(booking_id = %booking.id, err = %e, "notified column append failed");
    }
    info!(
        booking_id = %booking.id,
        count = fresh.len(),
        radius_step,
        is_rebroadcast,
        "broadcast fan-out"
    );
    fresh
}

/// Schedule the radius expansion timer for `step_index`'s timeout.
pub async fn schedule_radius_timer(
    state: &Arc<DispatchState>,
    booking: &Booking,
    step_index: usize,
) -> anyhow::Result<()> {
    let payload = RadiusTimerPayload {
        booking_id: booking.id.clone(),
        customer_id: booking.customer_id.clone(),
        truck_type_key: booking.truck_type_key(),
        pickup_lat: booking.pickup.lat,
        pickup_lng: booking.pickup.lng,
        current_step_index: step_index,
    };
    let due = epoch_ms() + state.radius_steps[step_index].timeout_ms;
    state
        .timers
        .schedule(&keys::timer_radius(&booking.id), &serde_json::to_string(&payload)?, due)
        .await?;
    state
        .store
        .set(
            &keys::broadcast_radius_step(&booking.id),
            &step_index.to_string(),
            Some(state.config.dispatch_horizon() + Duration::from_secs(60)),
        )
        .await?;
    Ok(())
}

/// Remove radius expansion state for a finished booking.
pub async fn wipe_radius_state(state: &Arc<DispatchState>, booking_id: &str) {
    if let Err(e) = state.timers.cancel(&keys::timer_radius(booking_id)).await {
        warn!(booking_id, err = %e, "radius timer cancel failed");
    }
    if let Err(e) = state.store.del(&keys::broadcast_radius_step(booking_id)).await {
        debug!(booking_id, err = %e, "radius step marker delete failed");
    }
}

/// Radius timer handler: one runs per booking at a time (per-key timer
/// lock).  Expands to the next step, or runs the durable fallback when the
/// ladder is exhausted.
pub async fn handle_radius_timer(
    state: &Arc<DispatchState>,
    payload: &str,
) -> anyhow::Result<()> {
    let payload: RadiusTimerPayload = serde_json::from_str(payload)?;
    let Some(booking) = state.durable.get_booking(&payload.booking_id).await? else {
        wipe_radius_state(state, &payload.booking_id).await;
        return Ok(());
    };
    // Cancellation racing this handler is visible here: a terminal re-read
    // means clean up and exit without side effects.
    if booking.status.is_terminal() {
        wipe_radius_state(state, &booking.id).await;
        return Ok(());
    }

    let next = payload.current_step_index + 1;
    if next >= state.radius_steps.len() {
        // Ladder exhausted: broadcast to every online transporter of the
        // type not yet notified.
        let all = state.durable.transporters_by_type(&payload.truck_type_key).await?;
        let online = state.presence.online_filter(&all).await?;
        fan_out(state, &booking, &online, payload.current_step_index, false).await;
        wipe_radius_state(state, &booking.id).await;
        state
            .store
            .set(
                &keys::broadcast_radius_step(&booking.id),
                STEP_DONE,
                Some(state.config.dispatch_horizon()),
            )
            .await
            .ok();
        return Ok(());
    }

    let step = state.radius_steps[next];
    let nearby = state
        .presence
        .nearest(
            &payload.truck_type_key,
            payload.pickup_lat,
            payload.pickup_lng,
            step.radius_km,
            state.config.radius_step_limit,
        )
        .await?;
    fan_out(state, &booking, &nearby, next, false).await;
    schedule_radius_timer(state, &booking, next).await?;
    Ok(())
}

/// Spawn the re-broadcast worker: consumes transporter ids queued on their
/// offline → online transition and delivers active matching broadcasts.
/// Fire-and-forget relative to the toggle/connect path that enqueued them.
pub fn spawn_rebroadcast_worker(state: Arc<DispatchState>) {
    tokio::spawn(async move {
        loop {
            if state.shutdown.is_cancelled() {
                break;
            }
            let popped = tokio::select! {
                _ = state.shutdown.cancelled() => break,
                popped = state.store.blpop(keys::REBROADCAST_QUEUE, REBROADCAST_POLL) => popped,
            };
            let transporter_id = match popped {
                Ok(Some(id)) => id,
                Ok(None) => continue,
                Err(e) => {
                    warn!(err = %e, "re-broadcast queue pop failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            if let Err(e) = rebroadcast_to(&state, &transporter_id).await {
                warn!(transporter_id = %transporter_id, err = %e, "re-broadcast failed");
            }
        }
    });
}

/// Deliver currently-active matching broadcasts to one transporter.
async fn rebroadcast_to(state: &Arc<DispatchState>, transporter_id: &str) -> anyhow::Result<()> {
    let Some(transporter) = state.durable.get_transporter(transporter_id).await? else {
        return Ok(());
    };
    let now = epoch_ms();
    let mut bookings = state
        .durable
        .active_bookings_matching(&transporter.truck_type_keys)
        .await?;
    bookings.retain(|b| b.expires_at > now && now.saturating_sub(b.created_at) < REBROADCAST_MAX_AGE_MS);
    bookings.sort_by_key(|b| std::cmp::Reverse(b.created_at));
    bookings.truncate(REBROADCAST_CAP);

    let ids = vec![transporter_id.to_owned()];
    for booking in &bookings {
        let step = current_step(state, &booking.id).await;
        let sent = fan_out(state, booking, &ids, step, true).await;
        if !sent.is_empty() {
            debug!(booking_id = %booking.id, transporter_id, "re-broadcast delivered");
        }
    }
    Ok(())
}

async fn current_step(state: &Arc<DispatchState>, booking_id: &str) -> usize {
    match state.store.get(&keys::broadcast_radius_step(booking_id)).await {
        Ok(Some(raw)) => raw.parse().unwrap_or(0),
        _ => 0,
    }
}

/// Startup sweep: bookings whose `expires_at` passed while no instance was
/// around to fire their timer are driven through the timeout flow.  The
/// durable column is authoritative.
pub async fn startup_sweep(state: &Arc<DispatchState>) {
    let overdue = match state.durable.overdue_bookings(epoch_ms()).await {
        Ok(overdue) => overdue,
        Err(e) => {
            warn!(err = %e, "startup expiry sweep scan failed");
            return;
        }
    };
    if overdue.is_empty() {
        return;
    }
    info!(count = overdue.len(), "startup sweep found overdue bookings");
    for booking in overdue {
        if let Err(e) = crate::lifecycle::expire_booking(state, &booking.id).await {
            warn!(booking_id = %booking.id, err = %e, "startup expiry failed");
        }
    }
}

/// Spawn a periodic overdue-booking sweep as a crash backstop; the timer
/// engine handles the common path.
pub fn spawn_expiry_sweeper(state: Arc<DispatchState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let lock = crate::store::lock::DistLock::new(
                Arc::clone(&state.store),
                "booking:expiry-sweep",
                state.instance_id.clone(),
            );
            match lock.acquire(Duration::from_secs(55)).await {
                Ok(true) => startup_sweep(&state).await,
                Ok(false) => {}
                Err(e) => warn!(err = %e, "expiry sweep lock unavailable"),
            }
        }
    });
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
