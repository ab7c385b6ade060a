// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    open_with_subtype = { "Open", Some("17ft"), "open_17ft" },
    container = { "Container", None, "container" },
    spaces = { "Flat Bed", Some("20 FT"), "flat_bed_20_ft" },
    empty_subtype = { "open", Some("  "), "open" },
)]
fn truck_type_key_normalizes(truck_type: &str, subtype: Option<&str>, expected: &str) {
    assert_eq!(truck_type_key(truck_type, subtype), expected);
}

#[parameterized(
    created = { BookingStatus::Created, true, false },
    broadcasting = { BookingStatus::Broadcasting, true, true },
    active = { BookingStatus::Active, true, true },
    partially_filled = { BookingStatus::PartiallyFilled, true, true },
    fully_filled = { BookingStatus::FullyFilled, false, false },
    expired = { BookingStatus::Expired, false, false },
    cancelled = { BookingStatus::Cancelled, false, false },
)]
fn status_predicates(status: BookingStatus, cancellable: bool, acceptable: bool) {
    assert_eq!(status.is_cancellable(), cancellable);
    assert_eq!(status.is_acceptable(), acceptable);
}

#[test]
fn terminal_statuses() {
    for status in [BookingStatus::FullyFilled, BookingStatus::Expired, BookingStatus::Cancelled] {
        assert!(status.is_terminal());
    }
    for status in [
        BookingStatus::Created,
        BookingStatus::Broadcasting,
        BookingStatus::Active,
        BookingStatus::PartiallyFilled,
    ] {
        assert!(!status.is_terminal());
    }
}

#[test]
fn status_serializes_snake_case() {
    let json = serde_json::to_string(&BookingStatus::PartiallyFilled).unwrap();
    assert_eq!(json, "\"partially_filled\"");
}

#[test]
fn remaining_seconds_clamps_at_zero() {
    let booking = test_booking();
    assert_eq!(booking.remaining_seconds(booking.expires_at + 5_000), 0);
    assert_eq!(booking.remaining_seconds(booking.expires_at - 30_000), 30);
}

pub(crate) fn test_booking() -> Booking {
    Booking {
        id: "bk-1".to_owned(),
        customer_id: "cust-1".to_owned(),
        customer_name: "Acme Traders".to_owned(),
        customer_phone: "+911234567890".to_owned(),
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
        trucks_needed: 3,
        trucks_filled: 0,
        price_per_truck: 18_000.0,
        total_amount: 54_000.0,
        goods: Some("textiles".to_owned()),
        weight_tonnes: Some(9.0),
        scheduled_at: None,
        expires_at: 1_700_000_120_000,
        status: BookingStatus::Created,
        notified_transporters: vec![],
        created_at: 1_700_000_000_000,
        state_changed_at: 1_700_000_000_000,
    }
}
