// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared-store key layout.  Stable: clients outside this core may read
//! these keys but must not write them.

/// Pending-timer index: zset, score = expires_at in epoch millis.
pub const TIMERS_PENDING: &str = "timers:pending";

/// Global online transporter set.
pub const ONLINE_TRANSPORTERS: &str = "online:transporters";

/// Work queue of transporter ids awaiting re-broadcast delivery.
pub const REBROADCAST_QUEUE: &str = "rebroadcast:queue";

/// Cross-instance delivery-fabric relay channel.
pub const FABRIC_CHANNEL: &str = "fabric:events";

/// Single-in-flight marker: string, booking id, TTL = horizon + 60s.
pub fn customer_active_broadcast(customer_id: &str) -> String {
    format!("customer:active-broadcast:{customer_id}")
}

/// Idempotency marker: string, booking id, TTL = horizon + 30s.
pub fn idem_create(customer_id: &str, fingerprint: &str) -> String {
    format!("idem:broadcast:create:{customer_id}:{fingerprint}")
}

/// Expiry timer for a booking; doubles as the timer payload key.
pub fn timer_booking(booking_id: &str) -> String {
    format!("timer:booking:{booking_id}")
}

/// Radius expansion timer for a booking.
pub fn timer_radius(booking_id: &str) -> String {
    format!("timer:radius:{booking_id}")
}

/// Per-booking set of transporters already sent the broadcast.
pub fn broadcast_notified(booking_id: &str) -> String {
    format!("broadcast:notified:{booking_id}")
}

/// Current radius step index for a booking, integer as text.
pub fn broadcast_radius_step(booking_id: &str) -> String {
    format!("broadcast:radius:step:{booking_id}")
}

/// Transporter presence detail hash, TTL = transporter presence TTL.
pub fn transporter_presence(transporter_id: &str) -> String {
    format!("transporter:presence:{transporter_id}")
}

/// Reverse map from transporter id to its current truck type key.  No TTL:
/// the stale sweep needs it after the detail hash has expired, and removes
/// it together with the geo entry.
pub fn transporter_truck_type(transporter_id: &str) -> String {
    format!("transporter:truck-type:{transporter_id}")
}

/// Geo index per normalized truck type key.
pub fn geo_drivers(truck_type_key: &str) -> String {
    format!("geo:drivers:{truck_type_key}")
}

/// Driver presence detail hash, TTL = driver presence TTL.
pub fn driver_details(driver_id: &str) -> String {
    format!("driver:details:{driver_id}")
}

/// Driver's current vehicle id, TTL = driver presence TTL.
pub fn driver_vehicle(driver_id: &str) -> String {
    format!("driver:vehicle:{driver_id}")
}

/// Named distributed lock.
pub fn lock(name: &str) -> String {
    format!("lock:{name}")
}
