// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the dispatch API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::durable::DurableStore;
use crate::error::ApiError;
use crate::lifecycle::{self, CreateBookingRequest};
use crate::model::{epoch_ms, truck_type_key, Role};
use crate::state::DispatchState;
use crate::store::{keys, SharedStore};
use crate::transport::auth::Claims;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub instance_id: String,
    pub connections: usize,
}

#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    pub vehicle_id: String,
    #[serde(default)]
    pub driver_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub available: bool,
    #[serde(default)]
    pub truck_type: Option<String>,
    #[serde(default)]
    pub truck_subtype: Option<String>,
    #[serde(default)]
    pub vehicle_id: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub online: bool,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(state): State<Arc<DispatchState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        instance_id: state.instance_id.clone(),
        connections: state.fabric.connection_count(),
    })
}

/// `POST /api/v1/bookings` — create a broadcast.
pub async fn create_booking(
    State(state): State<Arc<DispatchState>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateBookingRequest>,
) -> impl IntoResponse {
    if claims.role != Role::Customer {
        return ApiError::Forbidden.to_http_response("customer role required").into_response();
    }
    match lifecycle::create_booking(&state, &claims.user_id, req).await {
        Ok(resp) => (StatusCode::CREATED, Json(resp)).into_response(),
        Err(e) => e.to_http_response(e.as_str()).into_response(),
    }
}

/// `PATCH /api/v1/bookings/{id}/cancel` — idempotent cancel.
pub async fn cancel_booking(
    State(state): State<Arc<DispatchState>>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<String>,
) -> impl IntoResponse {
    if claims.role != Role::Customer {
        return ApiError::Forbidden.to_http_response("customer role required").into_response();
    }
    match lifecycle::cancel_booking(&state, &claims.user_id, &booking_id).await {
        Ok(booking) => Json(booking).into_response(),
        Err(e) => e.to_http_response(e.as_str()).into_response(),
    }
}

/// `GET /api/v1/bookings/{id}` — owner or notified transporter.
pub async fn get_booking(
    State(state): State<Arc<DispatchState>>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<String>,
) -> impl IntoResponse {
    let booking = match state.durable.get_booking(&booking_id).await {
        Ok(Some(booking)) => booking,
        Ok(None) => {
            return ApiError::BookingNotFound.to_http_response("unknown booking").into_response()
        }
        Err(e) => {
            warn!(booking_id, err = %e, "booking read failed");
            return ApiError::Internal.to_http_response("read failed").into_response();
        }
    };

    let visible = match claims.role {
        Role::Customer => booking.customer_id == claims.user_id,
        Role::Transporter => {
            booking.notified_transporters.contains(&claims.user_id)
                || state
                    .store
                    .sismember(&keys::broadcast_notified(&booking_id), &claims.user_id)
                    .await
                    .unwrap_or(false)
        }
        Role::Driver => false,
    };
    if !visible {
        return ApiError::BookingNotFound.to_http_response("unknown booking").into_response();
    }
    Json(booking).into_response()
}

/// `GET /api/v1/bookings/active` — broadcasts visible to a transporter.
pub async fn active_bookings(
    State(state): State<Arc<DispatchState>>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    if claims.role != Role::Transporter {
        return ApiError::Forbidden.to_http_response("transporter role required").into_response();
    }
    let transporter = match state.durable.get_transporter(&claims.user_id).await {
        Ok(Some(t)) => t,
        Ok(None) => {
            return ApiError::Forbidden.to_http_response("unknown transporter").into_response()
        }
        Err(e) => {
            warn!(transporter_id = %claims.user_id, err = %e, "transporter read failed");
            return ApiError::Internal.to_http_response("read failed").into_response();
        }
    };
    match state.durable.active_bookings_matching(&transporter.truck_type_keys).await {
        Ok(mut bookings) => {
            let now = epoch_ms();
            bookings.retain(|b| b.expires_at > now);
            Json(bookings).into_response()
        }
        Err(e) => {
            warn!(err = %e, "active booking scan failed");
            ApiError::Internal.to_http_response("scan failed").into_response()
        }
    }
}

/// `POST /api/v1/bookings/{id}/accept` — claim one truck slot.
pub async fn accept_booking(
    State(state): State<Arc<DispatchState>>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<String>,
    Json(req): Json<AcceptRequest>,
) -> impl IntoResponse {
    if claims.role != Role::Transporter {
        return ApiError::Forbidden.to_http_response("transporter role required").into_response();
    }
    match lifecycle::accept_booking(
        &state,
        &claims.user_id,
        &booking_id,
        &req.vehicle_id,
        req.driver_id,
    )
    .await
    {
        Ok(assignment) => (StatusCode::CREATED, Json(assignment)).into_response(),
        Err(e) => e.to_http_response(e.as_str()).into_response(),
    }
}

/// `POST /api/v1/availability` — transporter online/offline toggle.  The
/// response does not wait for re-broadcast delivery.
pub async fn set_availability(
    State(state): State<Arc<DispatchState>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AvailabilityRequest>,
) -> impl IntoResponse {
    if claims.role != Role::Transporter {
        return ApiError::Forbidden.to_http_response("transporter role required").into_response();
    }

    if !req.available {
        if let Err(e) = state.presence.remove_transporter(&claims.user_id).await {
            warn!(transporter_id = %claims.user_id, err = %e, "presence removal failed");
            return ApiError::StoreUnavailable.to_http_response("store unavailable").into_response();
        }
        if let Err(e) = state.durable.set_transporter_available(&claims.user_id, false).await {
            warn!(transporter_id = %claims.user_id, err = %e, "availability flag write failed");
        }
        return Json(AvailabilityResponse { online: false }).into_response();
    }

    let (Some(truck_type), Some(lat), Some(lng)) = (req.truck_type.as_deref(), req.lat, req.lng)
    else {
        return ApiError::BadRequest
            .to_http_response("truck_type, lat and lng are required to go online")
            .into_response();
    };
    let key = truck_type_key(truck_type, req.truck_subtype.as_deref());
    let vehicle_id = req.vehicle_id.unwrap_or_default();

    let came_online = match state
        .presence
        .update(&claims.user_id, &key, &vehicle_id, lat, lng, false)
        .await
    {
        Ok(came_online) => came_online,
        Err(e) => {
            warn!(transporter_id = %claims.user_id, err = %e, "presence update failed");
            return ApiError::StoreUnavailable.to_http_response("store unavailable").into_response();
        }
    };
    if let Err(e) = state.durable.set_transporter_available(&claims.user_id, true).await {
        warn!(transporter_id = %claims.user_id, err = %e, "availability flag write failed");
    }
    if came_online {
        // Fire-and-forget: the worker delivers active broadcasts.
        if let Err(e) = state.store.rpush(keys::REBROADCAST_QUEUE, &claims.user_id).await {
            warn!(transporter_id = %claims.user_id, err = %e, "re-broadcast enqueue failed");
        }
    }
    Json(AvailabilityResponse { online: true }).into_response()
}
