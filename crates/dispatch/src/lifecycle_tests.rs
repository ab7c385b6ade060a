// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::tests::test_config;
use crate::durable::{MemoryDurable, Vehicle};
use crate::model::Transporter;
use crate::store::memory::MemoryStore;
use crate::store::SharedStore;

pub(crate) fn test_state() -> Arc<DispatchState> {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let durable = Arc::new(MemoryDurable::new());
    Arc::new(
        DispatchState::new(test_config(), store, durable, CancellationToken::new())
            .expect("test state"),
    )
}

pub(crate) async fn seed_transporter(state: &Arc<DispatchState>, id: &str, lat: f64, lng: f64) {
    state
        .durable
        .put_transporter(Transporter {
            id: id.to_owned(),
            name: format!("T {id}"),
            truck_type_keys: vec!["open_17ft".to_owned()],
            vehicle_ids: vec![format!("veh-{id}")],
            is_available: true,
            last_lat: Some(lat),
            last_lng: Some(lng),
        })
        .await
        .unwrap();
    state
        .durable
        .put_vehicle(Vehicle {
            id: format!("veh-{id}"),
            transporter_id: id.to_owned(),
            truck_type_key: "open_17ft".to_owned(),
            in_use: false,
        })
        .await
        .unwrap();
    state.presence.update(id, "open_17ft", &format!("veh-{id}"), lat, lng, false).await.unwrap();
}

pub(crate) fn request(trucks: u32) -> CreateBookingRequest {
    CreateBookingRequest {
        pickup: Place {
            lat: 12.971,
            lng: 77.594,
            address: "1 MG Road".to_owned(),
            city: "Bengaluru".to_owned(),
            state: "KA".to_owned(),
        },
        drop: Place {
            lat: 13.082,
            lng: 80.270,
            address: "2 Mount Road".to_owned(),
            city: "Chennai".to_owned(),
            state: "TN".to_owned(),
        },
        truck_type: "open".to_owned(),
        truck_subtype: Some("17ft".to_owned()),
        trucks_needed: trucks,
        price_per_truck: 18_000.0,
        distance_km: Some(350.0),
        goods: Some("textiles".to_owned()),
        weight_tonnes: Some(9.0),
        scheduled_at: None,
        customer_name: Some("Acme Traders".to_owned()),
        customer_phone: Some("+911234567890".to_owned()),
    }
}

#[tokio::test]
async fn create_with_no_transporters_expires_immediately() {
    let state = test_state();
    let resp = create_booking(&state, "cust-1", request(1)).await.unwrap();
    assert_eq!(resp.matching_transporters_count, 0);
    assert_eq!(resp.booking.status, BookingStatus::Expired);

    // Terminal immediately, so the customer may create again.
    let resp2 = create_booking(&state, "cust-1", request(1)).await.unwrap();
    assert_eq!(resp2.booking.status, BookingStatus::Expired);
}

#[tokio::test]
async fn create_with_nearby_transporter_goes_active() {
    let state = test_state();
    seed_transporter(&state, "t1", 12.972, 77.595).await;

    let resp = create_booking(&state, "cust-1", request(1)).await.unwrap();
    assert_eq!(resp.matching_transporters_count, 1);
    assert_eq!(resp.booking.status, BookingStatus::Active);
    assert!(resp.timeout_seconds > 0 && resp.timeout_seconds <= 120);

    // t1 is in the notified set and column.
    assert!(state
        .store
        .sismember(&keys::broadcast_notified(&resp.booking.id), "t1")
        .await
        .unwrap());
    let stored = state.durable.get_booking(&resp.booking.id).await.unwrap().unwrap();
    assert_eq!(stored.notified_transporters, vec!["t1".to_owned()]);

    // Both timers are armed.
    assert!(state.store.exists(&keys::timer_booking(&resp.booking.id)).await.unwrap());
    assert!(state.store.exists(&keys::timer_radius(&resp.booking.id)).await.unwrap());
    // Single-in-flight marker points at the booking.
    assert_eq!(
        state.store.get(&keys::customer_active_broadcast("cust-1")).await.unwrap(),
        Some(resp.booking.id.clone())
    );
}

#[tokio::test]
async fn second_create_conflicts_while_in_flight() {
    let state = test_state();
    seed_transporter(&state, "t1", 12.972, 77.595).await;
    create_booking(&state, "cust-1", request(1)).await.unwrap();

    // Different fingerprint (other truck type) so the idempotency probe
    // does not short-circuit.
    let mut other = request(1);
    other.truck_type = "container".to_owned();
    other.truck_subtype = None;
    let err = create_booking(&state, "cust-1", other).await.unwrap_err();
    assert_eq!(err, ApiError::OrderActiveExists);
}

#[tokio::test]
async fn identical_create_is_idempotent() {
    let state = test_state();
    seed_transporter(&state, "t1", 12.972, 77.595).await;

    let first = create_booking(&state, "cust-1", request(2)).await.unwrap();
    let second = create_booking(&state, "cust-1", request(2)).await.unwrap();
    assert_eq!(first.booking.id, second.booking.id);
}

#[tokio::test]
async fn accept_fills_and_completes() {
    let state = test_state();
    seed_transporter(&state, "t1", 12.972, 77.595).await;
    let resp = create_booking(&state, "cust-1", request(1)).await.unwrap();

    let assignment =
        accept_booking(&state, "t1", &resp.booking.id, "veh-t1", None).await.unwrap();
    assert_eq!(assignment.status, AssignmentStatus::Pending);

    let booking = state.durable.get_booking(&resp.booking.id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::FullyFilled);
    assert_eq!(booking.trucks_filled, 1);

    // Timers and the in-flight marker are gone.
    assert!(!state.store.exists(&keys::timer_booking(&resp.booking.id)).await.unwrap());
    assert!(!state.store.exists(&keys::timer_radius(&resp.booking.id)).await.unwrap());
    assert_eq!(
        state.store.get(&keys::customer_active_broadcast("cust-1")).await.unwrap(),
        None
    );
    // Vehicle is held.
    let vehicle = state.durable.get_vehicle("veh-t1").await.unwrap().unwrap();
    assert!(vehicle.in_use);
}

#[tokio::test]
async fn accept_after_full_is_already_taken() {
    let state = test_state();
    seed_transporter(&state, "t1", 12.972, 77.595).await;
    seed_transporter(&state, "t2", 12.973, 77.596).await;
    let resp = create_booking(&state, "cust-1", request(1)).await.unwrap();

    accept_booking(&state, "t1", &resp.booking.id, "veh-t1", None).await.unwrap();
    let err = accept_booking(&state, "t2", &resp.booking.id, "veh-t2", None).await.unwrap_err();
    assert_eq!(err, ApiError::RequestAlreadyTaken);

    let booking = state.durable.get_booking(&resp.booking.id).await.unwrap().unwrap();
    assert_eq!(booking.trucks_filled, 1);
}

#[tokio::test]
async fn partial_fill_keeps_booking_open() {
    let state = test_state();
    seed_transporter(&state, "t1", 12.972, 77.595).await;
    seed_transporter(&state, "t2", 12.973, 77.596).await;
    let resp = create_booking(&state, "cust-1", request(3)).await.unwrap();

    accept_booking(&state, "t1", &resp.booking.id, "veh-t1", None).await.unwrap();
    let booking = state.durable.get_booking(&resp.booking.id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::PartiallyFilled);
    assert_eq!(booking.trucks_filled, 1);

    accept_booking(&state, "t2", &resp.booking.id, "veh-t2", None).await.unwrap();
    let booking = state.durable.get_booking(&resp.booking.id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::PartiallyFilled);
    assert_eq!(booking.trucks_filled, 2);
}

#[tokio::test]
async fn vehicle_validation_gates_accept() {
    let state = test_state();
    seed_transporter(&state, "t1", 12.972, 77.595).await;
    seed_transporter(&state, "t2", 12.973, 77.596).await;
    let resp = create_booking(&state, "cust-1", request(1)).await.unwrap();

    // Someone else's vehicle.
    let err =
        accept_booking(&state, "t1", &resp.booking.id, "veh-t2", None).await.unwrap_err();
    assert_eq!(err, ApiError::VehicleInsufficient);

    // Wrong truck type.
    state
        .durable
        .put_vehicle(Vehicle {
            id: "veh-flat".to_owned(),
            transporter_id: "t1".to_owned(),
            truck_type_key: "flatbed_20ft".to_owned(),
            in_use: false,
        })
        .await
        .unwrap();
    let err =
        accept_booking(&state, "t1", &resp.booking.id, "veh-flat", None).await.unwrap_err();
    assert_eq!(err, ApiError::VehicleTypeMismatch);
}

#[tokio::test]
async fn cancel_is_idempotent_and_conflicts_after_fill() {
    let state = test_state();
    seed_transporter(&state, "t1", 12.972, 77.595).await;
    let resp = create_booking(&state, "cust-1", request(2)).await.unwrap();

    let cancelled = cancel_booking(&state, "cust-1", &resp.booking.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    // Second cancel: idempotent success.
    let again = cancel_booking(&state, "cust-1", &resp.booking.id).await.unwrap();
    assert_eq!(again.status, BookingStatus::Cancelled);

    // In-flight marker cleared, so a new create may proceed.
    assert_eq!(
        state.store.get(&keys::customer_active_broadcast("cust-1")).await.unwrap(),
        None
    );
    let next = create_booking(&state, "cust-1", request(1)).await.unwrap();
    assert_ne!(next.booking.id, resp.booking.id);
}

#[tokio::test]
async fn cancel_after_fully_filled_conflicts() {
    let state = test_state();
    seed_transporter(&state, "t1", 12.972, 77.595).await;
    let resp = create_booking(&state, "cust-1", request(1)).await.unwrap();
    accept_booking(&state, "t1", &resp.booking.id, "veh-t1", None).await.unwrap();

    let err = cancel_booking(&state, "cust-1", &resp.booking.id).await.unwrap_err();
    assert_eq!(err, ApiError::BookingCannotCancel);
    // The accepted state is untouched.
    let booking = state.durable.get_booking(&resp.booking.id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::FullyFilled);
    assert_eq!(booking.trucks_filled, 1);
}

#[tokio::test]
async fn cancel_reverts_pending_assignments() {
    let state = test_state();
    seed_transporter(&state, "t1", 12.972, 77.595).await;
    let resp = create_booking(&state, "cust-1", request(2)).await.unwrap();
    accept_booking(&state, "t1", &resp.booking.id, "veh-t1", None).await.unwrap();

    cancel_booking(&state, "cust-1", &resp.booking.id).await.unwrap();
    let assignments = state.durable.assignments_for_booking(&resp.booking.id).await.unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].status, AssignmentStatus::Cancelled);
    let vehicle = state.durable.get_vehicle("veh-t1").await.unwrap().unwrap();
    assert!(!vehicle.in_use);
}

#[tokio::test]
async fn cancel_by_other_customer_is_forbidden() {
    let state = test_state();
    seed_transporter(&state, "t1", 12.972, 77.595).await;
    let resp = create_booking(&state, "cust-1", request(1)).await.unwrap();

    let err = cancel_booking(&state, "cust-2", &resp.booking.id).await.unwrap_err();
    assert_eq!(err, ApiError::Forbidden);
}

#[tokio::test]
async fn expiry_preserves_partial_fill() {
    let state = test_state();
    seed_transporter(&state, "t1", 12.972, 77.595).await;
    let resp = create_booking(&state, "cust-1", request(3)).await.unwrap();
    accept_booking(&state, "t1", &resp.booking.id, "veh-t1", None).await.unwrap();

    expire_booking(&state, &resp.booking.id).await.unwrap();
    let booking = state.durable.get_booking(&resp.booking.id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Expired);
    assert_eq!(booking.trucks_filled, 1);
    // Accepted assignment survives expiry.
    let assignments = state.durable.assignments_for_booking(&resp.booking.id).await.unwrap();
    assert_eq!(assignments[0].status, AssignmentStatus::Pending);
    // Coordination state is gone.
    assert_eq!(
        state.store.get(&keys::customer_active_broadcast("cust-1")).await.unwrap(),
        None
    );
    assert!(!state.store.exists(&keys::broadcast_notified(&resp.booking.id)).await.unwrap());
}

#[tokio::test]
async fn expiry_of_terminal_booking_is_a_noop() {
    let state = test_state();
    seed_transporter(&state, "t1", 12.972, 77.595).await;
    let resp = create_booking(&state, "cust-1", request(1)).await.unwrap();
    accept_booking(&state, "t1", &resp.booking.id, "veh-t1", None).await.unwrap();

    expire_booking(&state, &resp.booking.id).await.unwrap();
    let booking = state.durable.get_booking(&resp.booking.id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::FullyFilled);
}

#[tokio::test]
async fn fingerprint_ignores_gps_jitter() {
    let req = request(1);
    let a = create_fingerprint("c1", &req.truck_type, req.truck_subtype.as_deref(), &req.pickup, &req.drop);
    let mut pickup = req.pickup.clone();
    pickup.lat += 0.000004; // below the rounding step
    let b = create_fingerprint("c1", &req.truck_type, req.truck_subtype.as_deref(), &pickup, &req.drop);
    assert_eq!(a, b);

    let mut far = req.pickup.clone();
    far.lat += 0.01;
    let c = create_fingerprint("c1", &req.truck_type, req.truck_subtype.as_deref(), &far, &req.drop);
    assert_ne!(a, c);
}
