// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::lifecycle::tests::{request, seed_transporter, test_state};
use crate::model::BookingStatus;
use crate::store::SharedStore;

async fn radius_payload(state: &Arc<DispatchState>, booking_id: &str) -> String {
    state
        .store
        .get(&keys::timer_radius(booking_id))
        .await
        .unwrap()
        .expect("radius timer payload")
}

async fn notified(state: &Arc<DispatchState>, booking_id: &str) -> Vec<String> {
    let mut ids = state
        .store
        .smembers(&keys::broadcast_notified(booking_id))
        .await
        .unwrap();
    ids.sort();
    ids
}

#[tokio::test]
async fn payload_builder_computes_remaining() {
    let booking = crate::model::tests::test_booking();
    let payload = build_broadcast_payload(&booking, 2, true, booking.expires_at - 45_000);
    assert_eq!(payload.booking_id, booking.id);
    assert_eq!(payload.trucks_total, 3);
    assert_eq!(payload.trucks_remaining, 3);
    assert_eq!(payload.timeout_seconds, 45);
    assert_eq!(payload.radius_step, 2);
    assert!(payload.is_rebroadcast);
    assert_eq!(payload.pickup_lat, booking.pickup.lat);
    assert_eq!(payload.drop_city, booking.drop.city);
}

#[tokio::test]
async fn progressive_expansion_dedupes_across_steps() {
    let state = test_state();
    // ~0.009 degrees latitude ≈ 1 km.
    seed_transporter(&state, "near", 12.98, 77.60).await; // ~1 km
    seed_transporter(&state, "mid-a", 13.10, 77.60).await; // ~15 km
    seed_transporter(&state, "mid-b", 13.12, 77.60).await; // ~17 km
    seed_transporter(&state, "far", 13.30, 77.60).await; // ~37 km

    let resp = crate::lifecycle::create_booking(&state, "cust-1", request(4)).await.unwrap();
    let id = resp.booking.id.clone();
    // Step 0 (10 km): only the nearest.
    assert_eq!(notified(&state, &id).await, vec!["near".to_owned()]);

    // Step 1 (25 km): the two mid-range transporters join, exactly once.
    let payload = radius_payload(&state, &id).await;
    handle_radius_timer(&state, &payload).await.unwrap();
    assert_eq!(
        notified(&state, &id).await,
        vec!["mid-a".to_owned(), "mid-b".to_owned(), "near".to_owned()]
    );

    // Step 2 (50 km): the far transporter.
    let payload = radius_payload(&state, &id).await;
    handle_radius_timer(&state, &payload).await.unwrap();
    assert_eq!(
        notified(&state, &id).await,
        vec![
            "far".to_owned(),
            "mid-a".to_owned(),
            "mid-b".to_owned(),
            "near".to_owned()
        ]
    );
    // The step marker tracks the expansion.
    assert_eq!(
        state.store.get(&keys::broadcast_radius_step(&id)).await.unwrap().as_deref(),
        Some("2")
    );
}

#[tokio::test]
async fn exhausted_ladder_runs_online_fallback() {
    let state = test_state();
    seed_transporter(&state, "near", 12.98, 77.60).await;
    // Far outside the 75 km ladder (~250 km north).
    seed_transporter(&state, "remote", 15.2, 77.60).await;

    let resp = crate::lifecycle::create_booking(&state, "cust-1", request(2)).await.unwrap();
    let id = resp.booking.id.clone();
    assert_eq!(notified(&state, &id).await, vec!["near".to_owned()]);

    // Walk through steps 1..3; remote stays out of range.
    for _ in 0..3 {
        let payload = radius_payload(&state, &id).await;
        handle_radius_timer(&state, &payload).await.unwrap();
    }
    // The next firing exhausts the ladder and falls back to everyone online.
    let payload = radius_payload(&state, &id).await;
    handle_radius_timer(&state, &payload).await.unwrap();
    assert_eq!(
        notified(&state, &id).await,
        vec!["near".to_owned(), "remote".to_owned()]
    );
    // No further radius timer is armed.
    assert!(!state.store.exists(&keys::timer_radius(&id)).await.unwrap());
}

#[tokio::test]
async fn step_one_empty_falls_back_to_durable_online_set() {
    let state = test_state();
    // Online but beyond step 1's 10 km.
    seed_transporter(&state, "mid", 13.10, 77.60).await;

    let resp = crate::lifecycle::create_booking(&state, "cust-1", request(1)).await.unwrap();
    let id = resp.booking.id.clone();
    // The durable fallback notified the online transporter immediately...
    assert_eq!(notified(&state, &id).await, vec!["mid".to_owned()]);
    assert_eq!(resp.matching_transporters_count, 1);
    // ...and expansion is skipped: no radius timer armed.
    assert!(!state.store.exists(&keys::timer_radius(&id)).await.unwrap());
}

#[tokio::test]
async fn radius_handler_stops_on_terminal_booking() {
    let state = test_state();
    seed_transporter(&state, "near", 12.98, 77.60).await;
    seed_transporter(&state, "mid", 13.10, 77.60).await;

    let resp = crate::lifecycle::create_booking(&state, "cust-1", request(1)).await.unwrap();
    let id = resp.booking.id.clone();
    let payload = radius_payload(&state, &id).await;

    crate::lifecycle::cancel_booking(&state, "cust-1", &id).await.unwrap();
    handle_radius_timer(&state, &payload).await.unwrap();

    // No expansion happened after cancellation; the set was wiped by cancel.
    assert!(notified(&state, &id).await.is_empty());
    assert!(!state.store.exists(&keys::timer_radius(&id)).await.unwrap());
}

#[tokio::test]
async fn rebroadcast_delivers_active_matching_only() {
    let state = test_state();
    seed_transporter(&state, "t1", 12.98, 77.60).await;
    let resp = crate::lifecycle::create_booking(&state, "cust-1", request(2)).await.unwrap();
    let id = resp.booking.id.clone();

    // A late transporter comes online.
    seed_transporter(&state, "late", 12.99, 77.61).await;
    rebroadcast_to(&state, "late").await.unwrap();

    let ids = notified(&state, &id).await;
    assert!(ids.contains(&"late".to_owned()));
    // The durable column picked them up for future gone-notifications.
    let booking = state.durable.get_booking(&id).await.unwrap().unwrap();
    assert!(booking.notified_transporters.contains(&"late".to_owned()));

    // Running it again is a no-op thanks to the notified set.
    let before = notified(&state, &id).await.len();
    rebroadcast_to(&state, "late").await.unwrap();
    assert_eq!(notified(&state, &id).await.len(), before);
}

#[tokio::test]
async fn rebroadcast_skips_stale_and_foreign_bookings() {
    let state = test_state();
    seed_transporter(&state, "t1", 12.98, 77.60).await;
    let resp = crate::lifecycle::create_booking(&state, "cust-1", request(1)).await.unwrap();

    // Terminal bookings are never re-delivered.
    crate::lifecycle::expire_booking(&state, &resp.booking.id).await.unwrap();

    seed_transporter(&state, "late", 12.99, 77.61).await;
    rebroadcast_to(&state, "late").await.unwrap();
    // Expired booking is not re-delivered.
    assert!(!notified(&state, &resp.booking.id).await.contains(&"late".to_owned()));
}

#[tokio::test]
async fn startup_sweep_expires_overdue_bookings() {
    let state = test_state();
    seed_transporter(&state, "t1", 12.98, 77.60).await;
    let resp = crate::lifecycle::create_booking(&state, "cust-1", request(1)).await.unwrap();
    let id = resp.booking.id.clone();

    // Force the booking overdue, as if the owning instance crashed before
    // its expiry timer could fire.
    let mut booking = state.durable.get_booking(&id).await.unwrap().unwrap();
    booking.expires_at = epoch_ms() - 1_000;
    overdue_fixture(&state, booking).await;

    startup_sweep(&state).await;
    let swept = state.durable.get_booking(&id).await.unwrap().unwrap();
    assert_eq!(swept.status, BookingStatus::Expired);
    assert!(!state.store.exists(&keys::timer_booking(&id)).await.unwrap());
}

/// Swap a doctored booking row in, bypassing create's active-booking guard.
async fn overdue_fixture(state: &Arc<DispatchState>, booking: Booking) {
    use crate::durable::DurableStore;
    // MemoryDurable's append path is the only mutator available; emulate a
    // direct row write by cancelling and re-inserting.
    let _ = state
        .durable
        .update_booking_if_status_in(
            &booking.id,
            &[
                BookingStatus::Created,
                BookingStatus::Broadcasting,
                BookingStatus::Active,
                BookingStatus::PartiallyFilled,
            ],
            BookingStatus::Cancelled,
            1,
        )
        .await;
    let mut fresh = booking;
    fresh.status = BookingStatus::Active;
    let _ = DurableStore::create_booking(&*state.durable, fresh).await;
}
