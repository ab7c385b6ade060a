// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::BookingStatus;
use crate::model::tests::test_booking;

#[tokio::test]
async fn create_rejects_second_active_booking() {
    let durable = MemoryDurable::new();
    durable.create_booking(test_booking()).await.unwrap();

    let mut second = test_booking();
    second.id = "bk-2".to_owned();
    let err = durable.create_booking(second).await.unwrap_err();
    assert!(matches!(err, DurableError::ActiveBookingExists));
}

#[tokio::test]
async fn create_allows_new_booking_after_terminal() {
    let durable = MemoryDurable::new();
    durable.create_booking(test_booking()).await.unwrap();
    durable
        .update_booking_if_status_in(
            "bk-1",
            &[BookingStatus::Created],
            BookingStatus::Cancelled,
            1,
        )
        .await
        .unwrap();

    let mut second = test_booking();
    second.id = "bk-2".to_owned();
    assert!(durable.create_booking(second).await.is_ok());
}

#[tokio::test]
async fn conditional_update_is_status_gated() {
    let durable = MemoryDurable::new();
    durable.create_booking(test_booking()).await.unwrap();

    let n = durable
        .update_booking_if_status_in(
            "bk-1",
            &[BookingStatus::Active],
            BookingStatus::Expired,
            99,
        )
        .await
        .unwrap();
    assert_eq!(n, 0);
    let booking = durable.get_booking("bk-1").await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Created);

    let n = durable
        .update_booking_if_status_in(
            "bk-1",
            &[BookingStatus::Created],
            BookingStatus::Broadcasting,
            99,
        )
        .await
        .unwrap();
    assert_eq!(n, 1);
    let booking = durable.get_booking("bk-1").await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Broadcasting);
    assert_eq!(booking.state_changed_at, 99);
}

#[tokio::test]
async fn fill_one_slot_stops_at_capacity() {
    let durable = MemoryDurable::new();
    let mut booking = test_booking();
    booking.trucks_needed = 2;
    booking.status = BookingStatus::Active;
    durable.create_booking(booking).await.unwrap();

    let allowed = [
        BookingStatus::Broadcasting,
        BookingStatus::Active,
        BookingStatus::PartiallyFilled,
    ];
    assert_eq!(durable.fill_one_slot("bk-1", &allowed, 1).await.unwrap(), Some((1, 2)));
    assert_eq!(durable.fill_one_slot("bk-1", &allowed, 2).await.unwrap(), Some((2, 2)));
    assert_eq!(durable.fill_one_slot("bk-1", &allowed, 3).await.unwrap(), None);
}

#[tokio::test]
async fn overdue_scan_skips_terminal() {
    let durable = MemoryDurable::new();
    let mut expired = test_booking();
    expired.status = BookingStatus::Active;
    durable.create_booking(expired.clone()).await.unwrap();

    let overdue = durable.overdue_bookings(expired.expires_at + 1).await.unwrap();
    assert_eq!(overdue.len(), 1);

    durable
        .update_booking_if_status_in(
            "bk-1",
            &[BookingStatus::Active],
            BookingStatus::Expired,
            1,
        )
        .await
        .unwrap();
    let overdue = durable.overdue_bookings(expired.expires_at + 1).await.unwrap();
    assert!(overdue.is_empty());
}
