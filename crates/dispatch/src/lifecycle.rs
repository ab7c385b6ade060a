// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Booking lifecycle engine: create, cancel, accept and timeout flows.
//!
//! Every transition is an atomic conditional update against the durable
//! record; decisions are made on the update's return, never on a prior
//! read.  Marker writes on the shared store are best-effort — the store
//! layer retries once, then the flow logs and proceeds so broadcasts are
//! never blocked on bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dispatcher;
use crate::durable::{DurableError, DurableStore};
use crate::error::ApiError;
use crate::fabric::events::{Room, ServerEvent};
use crate::model::{
    epoch_ms, truck_type_key, Assignment, AssignmentStatus, Booking, BookingStatus, Place,
};
use crate::state::DispatchState;
use crate::store::keys;
use crate::store::lock::DistLock;
use crate::store::SharedStore;

/// Statuses in which a slot may still be claimed.
const ACCEPTABLE: [BookingStatus; 3] =
    [BookingStatus::Broadcasting, BookingStatus::Active, BookingStatus::PartiallyFilled];

/// Statuses a customer may cancel from.
const CANCELLABLE: [BookingStatus; 4] = [
    BookingStatus::Created,
    BookingStatus::Broadcasting,
    BookingStatus::Active,
    BookingStatus::PartiallyFilled,
];

/// TTL of the create-serialization lock.
const CREATE_LOCK_TTL: Duration = Duration::from_secs(10);

/// Booking expiry timer payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExpiryTimerPayload {
    pub booking_id: String,
    pub customer_id: String,
}

/// Customer booking request, already validated at the HTTP boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub pickup: Place,
    pub drop: Place,
    pub truck_type: String,
    #[serde(default)]
    pub truck_subtype: Option<String>,
    pub trucks_needed: u32,
    pub price_per_truck: f64,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub goods: Option<String>,
    #[serde(default)]
    pub weight_tonnes: Option<f64>,
    #[serde(default)]
    pub scheduled_at: Option<u64>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
}

/// Create response: the booking plus the match count and horizon.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingResponse {
    #[serde(flatten)]
    pub booking: Booking,
    pub matching_transporters_count: usize,
    pub timeout_seconds: u64,
}

/// Fingerprint a create request for the idempotency probe.  Coordinates are
/// rounded so GPS jitter between retries still collides.
pub fn create_fingerprint(
    customer_id: &str,
    truck_type: &str,
    truck_subtype: Option<&str>,
    pickup: &Place,
    drop: &Place,
) -> String {
    let canonical = format!(
        "{customer_id}|{}|{:.4}|{:.4}|{:.4}|{:.4}",
        truck_type_key(truck_type, truck_subtype),
        pickup.lat,
        pickup.lng,
        drop.lat,
        drop.lng,
    );
    let digest = ring::digest::digest(&ring::digest::SHA256, canonical.as_bytes());
    let mut out = String::with_capacity(32);
    for byte in &digest.as_ref()[..16] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn booking_fingerprint(booking: &Booking) -> String {
    create_fingerprint(
        &booking.customer_id,
        &booking.truck_type,
        booking.truck_subtype.as_deref(),
        &booking.pickup,
        &booking.drop,
    )
}

/// Create flow.  Serializable transaction plus single-in-flight lock; the
/// initial radius search and fan-out run inline, expansion and expiry via
/// timers.
pub async fn create_booking(
    state: &Arc<DispatchState>,
    customer_id: &str,
    req: CreateBookingRequest,
) -> Result<CreateBookingResponse, ApiError> {
    if req.trucks_needed == 0 {
        return Err(ApiError::BadRequest);
    }

    // Idempotency probe: an identical request inside the window returns the
    // booking it already created.
    let fingerprint = create_fingerprint(
        customer_id,
        &req.truck_type,
        req.truck_subtype.as_deref(),
        &req.pickup,
        &req.drop,
    );
    let idem_key = keys::idem_create(customer_id, &fingerprint);
    if let Ok(Some(existing_id)) = state.store.get(&idem_key).await {
        if let Ok(Some(existing)) = state.durable.get_booking(&existing_id).await {
            if !existing.status.is_terminal() {
                let count = existing.notified_transporters.len();
                let timeout_seconds = existing.remaining_seconds(epoch_ms());
                return Ok(CreateBookingResponse {
                    booking: existing,
                    matching_transporters_count: count,
                    timeout_seconds,
                });
            }
        }
    }

    let create_lock = DistLock::new(
        Arc::clone(&state.store),
        &format!("customer-broadcast-create:{customer_id}"),
        state.instance_id.clone(),
    );
    match create_lock.acquire(CREATE_LOCK_TTL).await {
        Ok(true) => {}
        Ok(false) => return Err(ApiError::OrderActiveExists),
        Err(e) => {
            warn!(customer_id, err = %e, "create lock unavailable");
            return Err(ApiError::StoreUnavailable);
        }
    }
    let result = create_locked(state, customer_id, req, &fingerprint).await;
    if let Err(e) = create_lock.release().await {
        warn!(customer_id, err = %e, "create lock release failed");
    }
    result
}

async fn create_locked(
    state: &Arc<DispatchState>,
    customer_id: &str,
    req: CreateBookingRequest,
    fingerprint: &str,
) -> Result<CreateBookingResponse, ApiError> {
    let now = epoch_ms();
    let horizon = state.config.dispatch_horizon();
    let booking = Booking {
        id: uuid::Uuid::new_v4().to_string(),
        customer_id: customer_id.to_owned(),
        customer_name: req.customer_name.unwrap_or_default(),
        customer_phone: req.customer_phone.unwrap_or_default(),
        pickup: req.pickup,
        drop: req.drop,
        truck_type: req.truck_type,
        truck_subtype: req.truck_subtype,
        trucks_needed: req.trucks_needed,
        trucks_filled: 0,
        price_per_truck: req.price_per_truck,
        total_amount: req.price_per_truck * f64::from(req.trucks_needed),
        goods: req.goods,
        weight_tonnes: req.weight_tonnes,
        scheduled_at: req.scheduled_at,
        expires_at: now + horizon.as_millis() as u64,
        status: BookingStatus::Created,
        notified_transporters: vec![],
        created_at: now,
        state_changed_at: now,
    };

    // Serializable boundary: the insert itself rejects a second in-flight
    // booking even if the shared-store lock failed over.
    let booking = match state.durable.create_booking(booking).await {
        Ok(booking) => booking,
        Err(DurableError::ActiveBookingExists) => return Err(ApiError::OrderActiveExists),
        Err(DurableError::Conflict) => return Err(ApiError::Conflict),
        Err(e) => {
            warn!(customer_id, err = %e, "booking insert failed");
            return Err(ApiError::Internal);
        }
    };

    let (matched, used_fallback) = match dispatcher::initial_match(state, &booking).await {
        Ok(m) => m,
        Err(e) => {
            warn!(booking_id = %booking.id, err = %e, "initial match failed");
            // Unwind: the row must not stay in `created` forever.
            let _ = state
                .durable
                .update_booking_if_status_in(
                    &booking.id,
                    &[BookingStatus::Created],
                    BookingStatus::Expired,
                    epoch_ms(),
                )
                .await;
            return Err(ApiError::StoreUnavailable);
        }
    };

    if matched.is_empty() {
        let _ = state
            .durable
            .update_booking_if_status_in(
                &booking.id,
                &[BookingStatus::Created],
                BookingStatus::Expired,
                epoch_ms(),
            )
            .await;
        state
            .fabric
            .emit(
                &Room::User(customer_id.to_owned()),
                &ServerEvent::NoVehiclesAvailable { booking_id: booking.id.clone() },
            )
            .await;
        info!(booking_id = %booking.id, "no matching transporters online");
        let booking = state
            .durable
            .get_booking(&booking.id)
            .await
            .ok()
            .flatten()
            .unwrap_or(booking);
        return Ok(CreateBookingResponse {
            booking,
            matching_transporters_count: 0,
            timeout_seconds: 0,
        });
    }

    if state
        .durable
        .update_booking_if_status_in(
            &booking.id,
            &[BookingStatus::Created],
            BookingStatus::Broadcasting,
            epoch_ms(),
        )
        .await
        .unwrap_or(0)
        == 0
    {
        // Someone raced us into a terminal state (cancel before fan-out).
        return Err(ApiError::Conflict);
    }

    let sent = dispatcher::fan_out(state, &booking, &matched, 0, false).await;

    // Expiry timer always arms; the radius ladder only when step 1 did not
    // already reach everyone.
    let expiry_payload = ExpiryTimerPayload {
        booking_id: booking.id.clone(),
        customer_id: customer_id.to_owned(),
    };
    if let Ok(payload) = serde_json::to_string(&expiry_payload) {
        if let Err(e) = state
            .timers
            .schedule(&keys::timer_booking(&booking.id), &payload, booking.expires_at)
            .await
        {
            warn!(booking_id = %booking.id, err = %e, "expiry timer schedule failed");
        }
    }
    if !used_fallback {
        if let Err(e) = dispatcher::schedule_radius_timer(state, &booking, 0).await {
            warn!(booking_id = %booking.id, err = %e, "radius timer schedule failed");
        }
    }

    // Markers: single-in-flight and idempotency, TTL = horizon + buffer.
    let marker_ttl = horizon + Duration::from_secs(60);
    if let Err(e) = state
        .store
        .set(&keys::customer_active_broadcast(customer_id), &booking.id, Some(marker_ttl))
        .await
    {
        warn!(booking_id = %booking.id, err = %e, "single-in-flight marker write failed");
    }
    if let Err(e) = state
        .store
        .set(
            &keys::idem_create(customer_id, fingerprint),
            &booking.id,
            Some(horizon + Duration::from_secs(30)),
        )
        .await
    {
        warn!(booking_id = %booking.id, err = %e, "idempotency marker write failed");
    }

    let _ = state
        .durable
        .update_booking_if_status_in(
            &booking.id,
            &[BookingStatus::Broadcasting],
            BookingStatus::Active,
            epoch_ms(),
        )
        .await;
    state
        .fabric
        .emit(
            &Room::Booking(booking.id.clone()),
            &ServerEvent::BroadcastStateChanged {
                booking_id: booking.id.clone(),
                status: BookingStatus::Active,
            },
        )
        .await;

    let booking = state
        .durable
        .get_booking(&booking.id)
        .await
        .ok()
        .flatten()
        .unwrap_or(booking);
    let timeout_seconds = booking.remaining_seconds(epoch_ms());
    info!(booking_id = %booking.id, matched = sent.len(), "broadcast dispatched");
    Ok(CreateBookingResponse {
        booking,
        matching_transporters_count: sent.len(),
        timeout_seconds,
    })
}

/// Cancel flow; idempotent when the booking is already cancelled.
pub async fn cancel_booking(
    state: &Arc<DispatchState>,
    customer_id: &str,
    booking_id: &str,
) -> Result<Booking, ApiError> {
    let Some(booking) =
        state.durable.get_booking(booking_id).await.map_err(|_| ApiError::Internal)?
    else {
        return Err(ApiError::BookingNotFound);
    };
    if booking.customer_id != customer_id {
        return Err(ApiError::Forbidden);
    }

    let updated = state
        .durable
        .update_booking_if_status_in(booking_id, &CANCELLABLE, BookingStatus::Cancelled, epoch_ms())
        .await
        .map_err(|_| ApiError::Internal)?;

    if updated == 0 {
        let current = state
            .durable
            .get_booking(booking_id)
            .await
            .map_err(|_| ApiError::Internal)?
            .ok_or(ApiError::BookingNotFound)?;
        return if current.status == BookingStatus::Cancelled {
            Ok(current)
        } else {
            Err(ApiError::BookingCannotCancel)
        };
    }

    info!(booking_id, customer_id, "booking cancelled");
    let notified = notified_transporters(state, &booking).await;
    cleanup_booking_coordination(state, &booking).await;
    revert_pending_assignments(state, booking_id).await;

    for transporter_id in &notified {
        state
            .fabric
            .emit(
                &Room::User(transporter_id.clone()),
                &ServerEvent::RequestNoLongerAvailable {
                    booking_id: booking_id.to_owned(),
                    reason: "cancelled".to_owned(),
                },
            )
            .await;
    }

    let cancelled = state
        .durable
        .get_booking(booking_id)
        .await
        .map_err(|_| ApiError::Internal)?
        .ok_or(ApiError::BookingNotFound)?;
    state
        .fabric
        .emit(
            &Room::User(customer_id.to_owned()),
            &ServerEvent::BookingUpdated { booking: cancelled.clone() },
        )
        .await;
    state
        .fabric
        .emit(
            &Room::Booking(booking_id.to_owned()),
            &ServerEvent::BroadcastStateChanged {
                booking_id: booking_id.to_owned(),
                status: BookingStatus::Cancelled,
            },
        )
        .await;
    Ok(cancelled)
}

/// Acceptance flow: one transporter claims one truck slot.
pub async fn accept_booking(
    state: &Arc<DispatchState>,
    transporter_id: &str,
    booking_id: &str,
    vehicle_id: &str,
    driver_id: Option<String>,
) -> Result<Assignment, ApiError> {
    let Some(booking) =
        state.durable.get_booking(booking_id).await.map_err(|_| ApiError::Internal)?
    else {
        return Err(ApiError::BookingNotFound);
    };

    let Some(vehicle) =
        state.durable.get_vehicle(vehicle_id).await.map_err(|_| ApiError::Internal)?
    else {
        return Err(ApiError::VehicleInsufficient);
    };
    if vehicle.transporter_id != transporter_id || vehicle.in_use {
        return Err(ApiError::VehicleInsufficient);
    }
    if vehicle.truck_type_key != booking.truck_type_key() {
        return Err(ApiError::VehicleTypeMismatch);
    }

    // The conditional increment is the only authority on whether this
    // transporter won a slot.
    let now = epoch_ms();
    let Some((filled, needed)) = state
        .durable
        .fill_one_slot(booking_id, &ACCEPTABLE, now)
        .await
        .map_err(|_| ApiError::Internal)?
    else {
        return Err(ApiError::RequestAlreadyTaken);
    };

    let assignment = Assignment {
        id: uuid::Uuid::new_v4().to_string(),
        booking_id: booking_id.to_owned(),
        transporter_id: transporter_id.to_owned(),
        vehicle_id: vehicle_id.to_owned(),
        driver_id,
        status: AssignmentStatus::Pending,
        created_at: now,
        state_changed_at: now,
    };
    if let Err(e) = state.durable.create_assignment(assignment.clone()).await {
        warn!(booking_id, transporter_id, err = %e, "assignment insert failed");
    }
    if let Err(e) = state.durable.mark_vehicle_in_use(vehicle_id, true).await {
        warn!(vehicle_id, err = %e, "vehicle in-use flag write failed");
    }

    let target = if filled >= needed {
        BookingStatus::FullyFilled
    } else {
        BookingStatus::PartiallyFilled
    };
    let updated = state
        .durable
        .update_booking_if_status_in(booking_id, &ACCEPTABLE, target, epoch_ms())
        .await
        .map_err(|_| ApiError::Internal)?;
    if updated == 0 {
        // A cancel (or the expiry handler) won the race between our
        // increment and this transition; undo our side and report the slot
        // as gone.  This is what keeps `cancelled` and a live assignment
        // from coexisting.
        revert_assignment(state, &assignment).await;
        return Err(ApiError::RequestAlreadyTaken);
    }

    if filled >= needed {
        complete_fully_filled(state, &booking, &assignment, filled, needed).await;
    } else {
        emit_partial_fill(state, &booking, &assignment, filled, needed).await;
    }
    info!(booking_id, transporter_id, filled, needed, "slot accepted");
    Ok(assignment)
}

/// Undo one assignment after losing the cancel/accept race.
async fn revert_assignment(state: &Arc<DispatchState>, assignment: &Assignment) {
    let reverted = state
        .durable
        .update_assignment_status_if(
            &assignment.id,
            &[AssignmentStatus::Pending],
            AssignmentStatus::Cancelled,
            epoch_ms(),
        )
        .await
        .unwrap_or(0);
    if reverted == 1 {
        if let Err(e) = state.durable.mark_vehicle_in_use(&assignment.vehicle_id, false).await {
            warn!(vehicle_id = %assignment.vehicle_id, err = %e, "vehicle release failed");
        }
    }
}

async fn complete_fully_filled(
    state: &Arc<DispatchState>,
    booking: &Booking,
    assignment: &Assignment,
    filled: u32,
    needed: u32,
) {
    // Timers and the in-flight marker go atomically with the terminal
    // transition; the idempotency marker just ages out.
    if let Err(e) = state.timers.cancel(&keys::timer_booking(&booking.id)).await {
        warn!(booking_id = %booking.id, err = %e, "expiry timer cancel failed");
    }
    dispatcher::wipe_radius_state(state, &booking.id).await;
    if let Err(e) =
        state.store.del(&keys::customer_active_broadcast(&booking.customer_id)).await
    {
        warn!(booking_id = %booking.id, err = %e, "in-flight marker delete failed");
    }

    // Winner first, then the customer, then the losers.
    state
        .fabric
        .emit(
            &Room::User(assignment.transporter_id.clone()),
            &ServerEvent::AcceptConfirmation {
                booking_id: booking.id.clone(),
                assignment: assignment.clone(),
            },
        )
        .await;
    state
        .fabric
        .emit(
            &Room::User(booking.customer_id.clone()),
            &ServerEvent::TruckAssigned {
                booking_id: booking.id.clone(),
                transporter_id: assignment.transporter_id.clone(),
                vehicle_id: assignment.vehicle_id.clone(),
                trucks_filled: filled,
                trucks_needed: needed,
            },
        )
        .await;
    state
        .fabric
        .emit(
            &Room::User(booking.customer_id.clone()),
            &ServerEvent::BookingFullyFilled {
                booking_id: booking.id.clone(),
                trucks_filled: filled,
                trucks_needed: needed,
            },
        )
        .await;

    let accepted: std::collections::HashSet<String> = state
        .durable
        .assignments_for_booking(&booking.id)
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|a| a.status == AssignmentStatus::Pending)
        .map(|a| a.transporter_id)
        .collect();
    for loser in notified_transporters(state, booking).await {
        if accepted.contains(&loser) {
            continue;
        }
        state
            .fabric
            .emit(
                &Room::User(loser),
                &ServerEvent::RequestNoLongerAvailable {
                    booking_id: booking.id.clone(),
                    reason: "filled".to_owned(),
                },
            )
            .await;
    }
    state
        .fabric
        .emit(
            &Room::Booking(booking.id.clone()),
            &ServerEvent::BroadcastStateChanged {
                booking_id: booking.id.clone(),
                status: BookingStatus::FullyFilled,
            },
        )
        .await;
}

async fn emit_partial_fill(
    state: &Arc<DispatchState>,
    booking: &Booking,
    assignment: &Assignment,
    filled: u32,
    needed: u32,
) {
    state
        .fabric
        .emit(
            &Room::User(assignment.transporter_id.clone()),
            &ServerEvent::AcceptConfirmation {
                booking_id: booking.id.clone(),
                assignment: assignment.clone(),
            },
        )
        .await;
    state
        .fabric
        .emit(
            &Room::User(booking.customer_id.clone()),
            &ServerEvent::TruckAssigned {
                booking_id: booking.id.clone(),
                transporter_id: assignment.transporter_id.clone(),
                vehicle_id: assignment.vehicle_id.clone(),
                trucks_filled: filled,
                trucks_needed: needed,
            },
        )
        .await;
    state
        .fabric
        .emit(
            &Room::User(booking.customer_id.clone()),
            &ServerEvent::BookingPartiallyFilled {
                booking_id: booking.id.clone(),
                trucks_filled: filled,
                trucks_needed: needed,
            },
        )
        .await;

    let remaining = needed.saturating_sub(filled);
    for transporter_id in notified_transporters(state, booking).await {
        if transporter_id == assignment.transporter_id {
            continue;
        }
        state
            .fabric
            .emit(
                &Room::User(transporter_id),
                &ServerEvent::TrucksRemainingUpdate {
                    booking_id: booking.id.clone(),
                    trucks_remaining: remaining,
                },
            )
            .await;
    }
}

/// Timeout flow, fired by the expiry timer and the startup sweep.
pub async fn handle_expiry_timer(
    state: &Arc<DispatchState>,
    payload: &str,
) -> anyhow::Result<()> {
    let payload: ExpiryTimerPayload = serde_json::from_str(payload)?;
    expire_booking(state, &payload.booking_id).await
}

/// Drive one booking through timeout.  Idempotent: terminal bookings only
/// get their coordination state cleaned.
pub async fn expire_booking(state: &Arc<DispatchState>, booking_id: &str) -> anyhow::Result<()> {
    let Some(booking) = state.durable.get_booking(booking_id).await? else {
        return Ok(());
    };
    if booking.status.is_terminal() {
        cleanup_booking_coordination(state, &booking).await;
        return Ok(());
    }

    let updated = state
        .durable
        .update_booking_if_status_in(
            booking_id,
            &[
                BookingStatus::Created,
                BookingStatus::Broadcasting,
                BookingStatus::Active,
                BookingStatus::PartiallyFilled,
            ],
            BookingStatus::Expired,
            epoch_ms(),
        )
        .await?;
    if updated == 0 {
        // Another instance completed the timeout (or an accept raced us to
        // fully_filled); nothing more to do.
        return Ok(());
    }

    let status = if booking.trucks_filled > 0 {
        "partially_filled_expired"
    } else {
        "expired"
    };
    info!(booking_id, status, trucks_filled = booking.trucks_filled, "booking expired");

    let notified = notified_transporters(state, &booking).await;
    cleanup_booking_coordination(state, &booking).await;

    state
        .fabric
        .emit(
            &Room::User(booking.customer_id.clone()),
            &ServerEvent::BookingExpired {
                booking_id: booking_id.to_owned(),
                status: status.to_owned(),
                trucks_filled: booking.trucks_filled,
            },
        )
        .await;
    for transporter_id in notified {
        state
            .fabric
            .emit(
                &Room::User(transporter_id),
                &ServerEvent::RequestNoLongerAvailable {
                    booking_id: booking_id.to_owned(),
                    reason: "expired".to_owned(),
                },
            )
            .await;
    }
    state
        .fabric
        .emit(
            &Room::Booking(booking_id.to_owned()),
            &ServerEvent::BroadcastStateChanged {
                booking_id: booking_id.to_owned(),
                status: BookingStatus::Expired,
            },
        )
        .await;
    Ok(())
}

/// Union of the shared-store notified set and the durable column (the set
/// may have aged out for long-lived bookings).
async fn notified_transporters(state: &Arc<DispatchState>, booking: &Booking) -> Vec<String> {
    let mut ids = state
        .store
        .smembers(&keys::broadcast_notified(&booking.id))
        .await
        .unwrap_or_default();
    for id in &booking.notified_transporters {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }
    ids
}

/// Cancel timers and delete the booking's markers and notified set.
async fn cleanup_booking_coordination(state: &Arc<DispatchState>, booking: &Booking) {
    if let Err(e) = state.timers.cancel(&keys::timer_booking(&booking.id)).await {
        warn!(booking_id = %booking.id, err = %e, "expiry timer cancel failed");
    }
    dispatcher::wipe_radius_state(state, &booking.id).await;

    let marker = keys::customer_active_broadcast(&booking.customer_id);
    // Only clear the in-flight marker if it still points at this booking.
    match state.store.get(&marker).await {
        Ok(Some(current)) if current == booking.id => {
            if let Err(e) = state.store.del(&marker).await {
                warn!(booking_id = %booking.id, err = %e, "in-flight marker delete failed");
            }
        }
        _ => {}
    }
    if let Err(e) = state
        .store
        .del(&keys::idem_create(&booking.customer_id, &booking_fingerprint(booking)))
        .await
    {
        warn!(booking_id = %booking.id, err = %e, "idempotency marker delete failed");
    }
    if let Err(e) = state.store.del(&keys::broadcast_notified(&booking.id)).await {
        warn!(booking_id = %booking.id, err = %e, "notified set delete failed");
    }
}

/// Revert still-pending assignments on cancellation and release their
/// vehicles.
async fn revert_pending_assignments(state: &Arc<DispatchState>, booking_id: &str) {
    let assignments = state.durable.assignments_for_booking(booking_id).await.unwrap_or_default();
    for assignment in assignments {
        let reverted = state
            .durable
            .update_assignment_status_if(
                &assignment.id,
                &[AssignmentStatus::Pending],
                AssignmentStatus::Cancelled,
                epoch_ms(),
            )
            .await
            .unwrap_or(0);
        if reverted == 1 {
            if let Err(e) = state.durable.mark_vehicle_in_use(&assignment.vehicle_id, false).await
            {
                warn!(vehicle_id = %assignment.vehicle_id, err = %e, "vehicle release failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
pub(crate) mod tests;
