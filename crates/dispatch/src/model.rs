// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain records shared by the durable store, lifecycle engine and wire
//! payloads: bookings, assignments, transporter profiles.

use serde::{Deserialize, Serialize};

/// Lifecycle states of a booking.
///
/// `Created` exists only between the transactional insert and fan-out;
/// `Broadcasting` while fan-out is in progress; `Active` once timers are
/// armed.  `Expired` and `Cancelled` are terminal, `FullyFilled` accepts no
/// further slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Created,
    Broadcasting,
    Active,
    PartiallyFilled,
    FullyFilled,
    Expired,
    Cancelled,
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Cancelled | Self::FullyFilled)
    }

    /// Statuses from which a customer cancel is permitted.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Broadcasting | Self::Active | Self::PartiallyFilled
        )
    }

    /// Statuses in which a transporter may still claim a slot.
    pub fn is_acceptable(&self) -> bool {
        matches!(self, Self::Broadcasting | Self::Active | Self::PartiallyFilled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Broadcasting => "broadcasting",
            Self::Active => "active",
            Self::PartiallyFilled => "partially_filled",
            Self::FullyFilled => "fully_filled",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pickup or drop location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub lat: f64,
    pub lng: f64,
    pub address: String,
    pub city: String,
    pub state: String,
}

/// One broadcast session: a customer's request for N trucks of one type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub pickup: Place,
    pub drop: Place,
    pub truck_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truck_subtype: Option<String>,
    pub trucks_needed: u32,
    pub trucks_filled: u32,
    pub price_per_truck: f64,
    pub total_amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goods: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_tonnes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<u64>,
    pub expires_at: u64,
    pub status: BookingStatus,
    /// Transporters ever sent this broadcast.  Best-effort mirror of the
    /// shared-store notified set, used for gone-notifications after the set's
    /// TTL has elapsed.
    pub notified_transporters: Vec<String>,
    pub created_at: u64,
    pub state_changed_at: u64,
}

impl Booking {
    /// Normalized vehicle type+subtype pair used for presence indexing.
    pub fn truck_type_key(&self) -> String {
        truck_type_key(&self.truck_type, self.truck_subtype.as_deref())
    }

    pub fn trucks_remaining(&self) -> u32 {
        self.trucks_needed.saturating_sub(self.trucks_filled)
    }

    /// Seconds until `expires_at`, clamped at zero.
    pub fn remaining_seconds(&self, now_ms: u64) -> u64 {
        self.expires_at.saturating_sub(now_ms) / 1000
    }
}

/// Build the normalized truck type key, e.g. `("Open", Some("17ft"))` →
/// `open_17ft`.
pub fn truck_type_key(truck_type: &str, subtype: Option<&str>) -> String {
    let base = truck_type.trim().to_lowercase().replace(' ', "_");
    match subtype {
        Some(sub) if !sub.trim().is_empty() => {
            format!("{base}_{}", sub.trim().to_lowercase().replace(' ', "_"))
        }
        _ => base,
    }
}

/// States of an assignment.  The dispatcher only writes `Pending` and
/// `Cancelled`; later transitions belong to trip tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    DriverAccepted,
    EnRoutePickup,
    AtPickup,
    InTransit,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// A (booking, transporter, vehicle, driver) quadruple produced when a
/// transporter accepts one truck slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub booking_id: String,
    pub transporter_id: String,
    pub vehicle_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    pub status: AssignmentStatus,
    pub created_at: u64,
    pub state_changed_at: u64,
}

/// Durable transporter profile, the subset the dispatcher reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transporter {
    pub id: String,
    pub name: String,
    /// Normalized truck type keys of the transporter's fleet.
    pub truck_type_keys: Vec<String>,
    pub vehicle_ids: Vec<String>,
    /// Whether the transporter wants broadcasts; drives presence restore on
    /// reconnect.
    pub is_available: bool,
    /// Last reported position, used to seed a restored presence entry until
    /// the next heartbeat.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_lng: Option<f64>,
}

impl Transporter {
    pub fn matches_type(&self, key: &str) -> bool {
        self.truck_type_keys.iter().any(|k| k == key)
    }
}

/// Connection roles on the delivery fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Transporter,
    Driver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Transporter => "transporter",
            Self::Driver => "driver",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(Self::Customer),
            "transporter" => Some(Self::Transporter),
            "driver" => Some(Self::Driver),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "model_tests.rs"]
pub(crate) mod tests;
