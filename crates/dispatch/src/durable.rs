// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable-store interface for booking, assignment, vehicle and transporter
//! records.
//!
//! The dispatcher needs three things from the relational layer: point reads,
//! atomic status-conditional updates, and a serializable transaction around
//! booking creation.  [`MemoryDurable`] provides those semantics in process
//! for development and tests; production wires a database-backed
//! implementation of the same trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::model::{Assignment, AssignmentStatus, Booking, BookingStatus, Transporter};

#[derive(Debug, thiserror::Error)]
pub enum DurableError {
    #[error("customer already has an active booking")]
    ActiveBookingExists,
    #[error("transaction conflict")]
    Conflict,
    #[error("durable store unavailable: {0}")]
    Unavailable(String),
}

/// A vehicle row, the subset the accept/cancel paths touch.
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub id: String,
    pub transporter_id: String,
    pub truck_type_key: String,
    pub in_use: bool,
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get_booking(&self, id: &str) -> Result<Option<Booking>, DurableError>;

    /// Insert inside a serializable transaction; fails with
    /// [`DurableError::ActiveBookingExists`] if the customer already has any
    /// non-terminal booking.
    async fn create_booking(&self, booking: Booking) -> Result<Booking, DurableError>;

    /// Conditional status update; applies only while the current status is in
    /// `allowed`, pairing the change with a `state_changed_at` write.
    /// Returns the number of rows updated (0 or 1).
    async fn update_booking_if_status_in(
        &self,
        id: &str,
        allowed: &[BookingStatus],
        new_status: BookingStatus,
        now_ms: u64,
    ) -> Result<u64, DurableError>;

    /// Atomic conditional increment of `trucks_filled`: proceeds only while
    /// `trucks_filled < trucks_needed` and status is in `allowed`.  Returns
    /// the new `(filled, needed)` pair, or `None` on conflict.
    async fn fill_one_slot(
        &self,
        id: &str,
        allowed: &[BookingStatus],
        now_ms: u64,
    ) -> Result<Option<(u32, u32)>, DurableError>;

    async fn find_active_booking_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<Booking>, DurableError>;

    /// Bookings in {active, partially_filled} whose truck type key is in
    /// `truck_type_keys` (all such bookings when empty).
    async fn active_bookings_matching(
        &self,
        truck_type_keys: &[String],
    ) -> Result<Vec<Booking>, DurableError>;

    /// Non-terminal bookings whose `expires_at` has passed; startup sweep.
    async fn overdue_bookings(&self, now_ms: u64) -> Result<Vec<Booking>, DurableError>;

    /// All transporter ids whose fleet covers the truck type key.
    async fn transporters_by_type(
        &self,
        truck_type_key: &str,
    ) -> Result<Vec<String>, DurableError>;

    /// Best-effort append to the booking's `notified_transporters` column.
    async fn append_notified(
        &self,
        booking_id: &str,
        transporter_ids: &[String],
    ) -> Result<(), DurableError>;

    async fn create_assignment(&self, assignment: Assignment) -> Result<(), DurableError>;

    async fn assignments_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Vec<Assignment>, DurableError>;

    async fn update_assignment_status_if(
        &self,
        id: &str,
        allowed: &[AssignmentStatus],
        new_status: AssignmentStatus,
        now_ms: u64,
    ) -> Result<u64, DurableError>;

    async fn get_transporter(&self, id: &str) -> Result<Option<Transporter>, DurableError>;

    async fn put_transporter(&self, transporter: Transporter) -> Result<(), DurableError>;

    async fn set_transporter_available(
        &self,
        id: &str,
        available: bool,
    ) -> Result<(), DurableError>;

    async fn get_vehicle(&self, id: &str) -> Result<Option<Vehicle>, DurableError>;

    async fn put_vehicle(&self, vehicle: Vehicle) -> Result<(), DurableError>;

    async fn mark_vehicle_in_use(&self, id: &str, in_use: bool) -> Result<(), DurableError>;
}

// -- In-memory implementation -------------------------------------------------

#[derive(Default)]
struct Inner {
    bookings: HashMap<String, Booking>,
    assignments: HashMap<String, Assignment>,
    transporters: HashMap<String, Transporter>,
    vehicles: HashMap<String, Vehicle>,
}

/// In-process durable store.  One mutex over all tables gives the same
/// isolation a serializable transaction would.
pub struct MemoryDurable {
    inner: Mutex<Inner>,
}

impl MemoryDurable {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }

    pub fn shared() -> Arc<dyn DurableStore> {
        Arc::new(Self::new())
    }
}

impl Default for MemoryDurable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for MemoryDurable {
    async fn get_booking(&self, id: &str) -> Result<Option<Booking>, DurableError> {
        Ok(self.inner.lock().await.bookings.get(id).cloned())
    }

    async fn create_booking(&self, booking: Booking) -> Result<Booking, DurableError> {
        let mut inner = self.inner.lock().await;
        let has_active = inner
            .bookings
            .values()
            .any(|b| b.customer_id == booking.customer_id && !b.status.is_terminal());
        if has_active {
            return Err(DurableError::ActiveBookingExists);
        }
        inner.bookings.insert(booking.id.clone(), booking.clone());
        Ok(booking)
    }

    async fn update_booking_if_status_in(
        &self,
        id: &str,
        allowed: &[BookingStatus],
        new_status: BookingStatus,
        now_ms: u64,
    ) -> Result<u64, DurableError> {
        let mut inner = self.inner.lock().await;
        let Some(booking) = inner.bookings.get_mut(id) else {
            return Ok(0);
        };
        if !allowed.contains(&booking.status) {
            return Ok(0);
        }
        booking.status = new_status;
        booking.state_changed_at = now_ms;
        Ok(1)
    }

    async fn fill_one_slot(
        &self,
        id: &str,
        allowed: &[BookingStatus],
        now_ms: u64,
    ) -> Result<Option<(u32, u32)>, DurableError> {
        let mut inner = self.inner.lock().await;
        let Some(booking) = inner.bookings.get_mut(id) else {
            return Ok(None);
        };
        if !allowed.contains(&booking.status) || booking.trucks_filled >= booking.trucks_needed {
            return Ok(None);
        }
        booking.trucks_filled += 1;
        booking.state_changed_at = now_ms;
        Ok(Some((booking.trucks_filled, booking.trucks_needed)))
    }

    async fn find_active_booking_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<Booking>, DurableError> {
        Ok(self
            .inner
            .lock()
            .await
            .bookings
            .values()
            .find(|b| b.customer_id == customer_id && !b.status.is_terminal())
            .cloned())
    }

    async fn active_bookings_matching(
        &self,
        truck_type_keys: &[String],
    ) -> Result<Vec<Booking>, DurableError> {
        Ok(self
            .inner
            .lock()
            .await
            .bookings
            .values()
            .filter(|b| {
                matches!(b.status, BookingStatus::Active | BookingStatus::PartiallyFilled)
                    && (truck_type_keys.is_empty()
                        || truck_type_keys.contains(&b.truck_type_key()))
            })
            .cloned()
            .collect())
    }

    async fn overdue_bookings(&self, now_ms: u64) -> Result<Vec<Booking>, DurableError> {
        Ok(self
            .inner
            .lock()
            .await
            .bookings
            .values()
            .filter(|b| !b.status.is_terminal() && b.expires_at < now_ms)
            .cloned()
            .collect())
    }

    async fn transporters_by_type(
        &self,
        truck_type_key: &str,
    ) -> Result<Vec<String>, DurableError> {
        Ok(self
            .inner
            .lock()
            .await
            .transporters
            .values()
            .filter(|t| t.matches_type(truck_type_key))
            .map(|t| t.id.clone())
            .collect())
    }

    async fn append_notified(
        &self,
        booking_id: &str,
        transporter_ids: &[String],
    ) -> Result<(), DurableError> {
        let mut inner = self.inner.lock().await;
        if let Some(booking) = inner.bookings.get_mut(booking_id) {
            for id in transporter_ids {
                if !booking.notified_transporters.contains(id) {
                    booking.notified_transporters.push(id.clone());
                }
            }
        }
        Ok(())
    }

    async fn create_assignment(&self, assignment: Assignment) -> Result<(), DurableError> {
        self.inner.lock().await.assignments.insert(assignment.id.clone(), assignment);
        Ok(())
    }

    async fn assignments_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Vec<Assignment>, DurableError> {
        Ok(self
            .inner
            .lock()
            .await
            .assignments
            .values()
            .filter(|a| a.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn update_assignment_status_if(
        &self,
        id: &str,
        allowed: &[AssignmentStatus],
        new_status: AssignmentStatus,
        now_ms: u64,
    ) -> Result<u64, DurableError> {
        let mut inner = self.inner.lock().await;
        let Some(assignment) = inner.assignments.get_mut(id) else {
            return Ok(0);
        };
        if !allowed.contains(&assignment.status) {
            return Ok(0);
        }
        assignment.status = new_status;
        assignment.state_changed_at = now_ms;
        Ok(1)
    }

    async fn get_transporter(&self, id: &str) -> Result<Option<Transporter>, DurableError> {
        Ok(self.inner.lock().await.transporters.get(id).cloned())
    }

    async fn put_transporter(&self, transporter: Transporter) -> Result<(), DurableError> {
        self.inner.lock().await.transporters.insert(transporter.id.clone(), transporter);
        Ok(())
    }

    async fn set_transporter_available(
        &self,
        id: &str,
        available: bool,
    ) -> Result<(), DurableError> {
        if let Some(t) = self.inner.lock().await.transporters.get_mut(id) {
            t.is_available = available;
        }
        Ok(())
    }

    async fn get_vehicle(&self, id: &str) -> Result<Option<Vehicle>, DurableError> {
        Ok(self.inner.lock().await.vehicles.get(id).cloned())
    }

    async fn put_vehicle(&self, vehicle: Vehicle) -> Result<(), DurableError> {
        self.inner.lock().await.vehicles.insert(vehicle.id.clone(), vehicle);
        Ok(())
    }

    async fn mark_vehicle_in_use(&self, id: &str, in_use: bool) -> Result<(), DurableError> {
        if let Some(v) = self.inner.lock().await.vehicles.get_mut(id) {
            v.in_use = in_use;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "durable_tests.rs"]
mod tests;
