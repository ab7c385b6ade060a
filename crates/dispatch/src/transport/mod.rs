// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the dispatch service.

pub mod auth;
pub mod http;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::fabric::ws;
use crate::state::DispatchState;

/// Build the axum `Router` with all dispatch routes.
pub fn build_router(state: Arc<DispatchState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(http::health))
        // Booking lifecycle
        .route("/api/v1/bookings", post(http::create_booking))
        .route("/api/v1/bookings/active", get(http::active_bookings))
        .route("/api/v1/bookings/{id}", get(http::get_booking))
        .route("/api/v1/bookings/{id}/cancel", patch(http::cancel_booking))
        .route("/api/v1/bookings/{id}/accept", post(http::accept_booking))
        // Presence toggle
        .route("/api/v1/availability", post(http::set_availability))
        // WebSocket (auth via query token in the handler)
        .route("/ws", get(ws::ws_handler))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
