// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-format events on the persistent connection.
//!
//! This module is the single source of truth for event names and payload
//! shapes; every code path that talks to a client goes through these types.

use serde::{Deserialize, Serialize};

use crate::model::{Assignment, Booking, BookingStatus, Place, Role};

/// Server → client events.  The names are part of the client contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Session established.
    Connected { user_id: String, role: Role },
    /// A broadcast is offered to a transporter.
    NewBroadcast(BroadcastPayload),
    /// General booking refresh for its owner.
    BookingUpdated { booking: Booking },
    /// All requested trucks are filled.
    BookingFullyFilled { booking_id: String, trucks_filled: u32, trucks_needed: u32 },
    /// One more truck filled, more remain.
    BookingPartiallyFilled { booking_id: String, trucks_filled: u32, trucks_needed: u32 },
    /// The dispatch horizon elapsed.
    BookingExpired { booking_id: String, status: String, trucks_filled: u32 },
    /// No matching transporter was online anywhere.
    NoVehiclesAvailable { booking_id: String },
    /// Booking status transition, emitted into the booking room.
    BroadcastStateChanged { booking_id: String, status: BookingStatus },
    /// The accepting transporter's slot is confirmed.
    AcceptConfirmation { booking_id: String, assignment: Assignment },
    /// The broadcast is gone (filled, cancelled or expired).
    RequestNoLongerAvailable { booking_id: String, reason: String },
    /// Remaining-slot count for transporters still deciding.
    TrucksRemainingUpdate { booking_id: String, trucks_remaining: u32 },
    /// A truck was assigned to the customer's booking.
    TruckAssigned {
        booking_id: String,
        transporter_id: String,
        vehicle_id: String,
        trucks_filled: u32,
        trucks_needed: u32,
    },
}

impl ServerEvent {
    /// Critical events ride the FIFO path and are never shed; non-critical
    /// countdown-style updates may be dropped under back-pressure.
    pub fn is_critical(&self) -> bool {
        !matches!(
            self,
            Self::TrucksRemainingUpdate { .. } | Self::BroadcastStateChanged { .. }
        )
    }
}

/// The canonical broadcast packet.  Built in exactly one place
/// ([`crate::dispatcher::build_broadcast_payload`]); carries both nested and
/// flat location fields for client compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastPayload {
    pub booking_id: String,
    pub customer_name: String,
    pub truck_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truck_subtype: Option<String>,
    pub pickup: Place,
    pub drop: Place,
    pub pickup_address: String,
    pub pickup_city: String,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub drop_address: String,
    pub drop_city: String,
    pub drop_lat: f64,
    pub drop_lng: f64,
    pub trucks_total: u32,
    pub trucks_remaining: u32,
    pub price_per_truck: f64,
    pub total_amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goods: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_tonnes: Option<f64>,
    /// Seconds left until the broadcast expires.
    pub timeout_seconds: u64,
    /// Radius step that produced this delivery.
    pub radius_step: usize,
    /// Set when delivery was triggered by the transporter coming online.
    pub is_rebroadcast: bool,
}

/// Client → server events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    Heartbeat {
        lat: f64,
        lng: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        battery: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        speed: Option<f64>,
    },
    JoinBooking { booking_id: String },
    LeaveBooking { booking_id: String },
    JoinOrder { order_id: String },
    LeaveOrder { order_id: String },
    /// Driver-only position update.
    UpdateLocation { lat: f64, lng: f64 },
    Ping,
}

/// Logical delivery destinations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    User(String),
    Role(Role),
    Booking(String),
    Order(String),
    Trip(String),
}

impl Room {
    pub fn key(&self) -> String {
        match self {
            Self::User(id) => format!("user:{id}"),
            Self::Role(role) => format!("role:{role}"),
            Self::Booking(id) => format!("booking:{id}"),
            Self::Order(id) => format!("order:{id}"),
            Self::Trip(id) => format!("trip:{id}"),
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        let (kind, id) = key.split_once(':')?;
        match kind {
            "user" => Some(Self::User(id.to_owned())),
            "role" => Role::parse(id).map(Self::Role),
            "booking" => Some(Self::Booking(id.to_owned())),
            "order" => Some(Self::Order(id.to_owned())),
            "trip" => Some(Self::Trip(id.to_owned())),
            _ => None,
        }
    }
}

/// Cross-instance relay envelope on the shared store's pub/sub channel.
/// `src` marks the publishing instance so relayed messages are not
/// re-delivered locally.
#[derive(Debug, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub src: String,
    pub room: String,
    pub payload: String,
    pub critical: bool,
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
