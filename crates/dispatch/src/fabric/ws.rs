// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket endpoint for customers, transporters and drivers.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::model::Role;
use crate::presence::Presence;
use crate::state::DispatchState;
use crate::store::{keys, SharedStore};
use crate::transport::auth::{self, Claims};

use super::events::{ClientEvent, Room, ServerEvent};
use super::{ConnQueue, Outbound};

/// Transport keepalive: ping cadence on the server side.
const PING_INTERVAL: Duration = Duration::from_secs(25);

/// Query parameters for the WS upgrade.
#[derive(Debug, Clone, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// `GET /ws` — WebSocket upgrade; authentication happens before upgrade.
pub async fn ws_handler(
    State(state): State<Arc<DispatchState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let claims = match query
        .token
        .as_deref()
        .and_then(|t| auth::verify_token(&state.config.auth_secret, t).ok())
    {
        Some(claims) => claims,
        None => {
            return axum::http::Response::builder()
                .status(401)
                .body(axum::body::Body::from("unauthorized"))
                .unwrap_or_default()
                .into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(state, claims, socket)).into_response()
}

/// Per-connection session: register, greet, restore presence, pump frames.
async fn handle_socket(state: Arc<DispatchState>, claims: Claims, socket: WebSocket) {
    let (conn_id, queue) = state.fabric.register(&claims.user_id, claims.role);
    state.fabric.send_to_conn(
        conn_id,
        &ServerEvent::Connected { user_id: claims.user_id.clone(), role: claims.role },
    );

    // Reconnect restore: a still-available transporter comes back online
    // without re-toggling, and gets any active broadcasts re-delivered.
    match state.fabric.presence.restore_on_connect(&claims.user_id, claims.role).await {
        Ok(true) => {
            if let Err(e) =
                state.store.rpush(keys::REBROADCAST_QUEUE, &claims.user_id).await
            {
                warn!(user_id = %claims.user_id, err = %e, "re-broadcast enqueue failed");
            }
        }
        Ok(false) => {}
        Err(e) => warn!(user_id = %claims.user_id, err = %e, "presence restore failed"),
    }

    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(write_pump(ws_tx, Arc::clone(&queue)));

    loop {
        let msg = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            msg = ws_rx.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                handle_client_event(&state, conn_id, &claims, &text).await;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(_)) => break,
            _ => {}
        }
    }

    state.fabric.unregister(conn_id);
    writer.abort();
}

/// Outbound pump: drains the connection queue, interleaving keepalive pings.
async fn write_pump(
    mut ws_tx: futures_util::stream::SplitSink<WebSocket, Message>,
    queue: Arc<ConnQueue>,
) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            frame = queue.pop() => {
                match frame {
                    Some(Outbound::Text { body, .. }) => {
                        if ws_tx.send(Message::Text(body.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { reason }) => {
                        let _ = ws_tx
                            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                                code: 1008,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                    None => break,
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Apply one inbound client event.
async fn handle_client_event(
    state: &Arc<DispatchState>,
    conn_id: u64,
    claims: &Claims,
    text: &str,
) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(user_id = %claims.user_id, err = %e, "undecodable client event");
            return;
        }
    };

    match event {
        ClientEvent::Heartbeat { lat, lng, .. } => {
            if let Err(e) =
                state.fabric.presence.heartbeat(&claims.user_id, claims.role, lat, lng).await
            {
                warn!(user_id = %claims.user_id, err = %e, "heartbeat presence update failed");
            }
        }
        ClientEvent::UpdateLocation { lat, lng } => {
            if claims.role != Role::Driver {
                return;
            }
            if let Err(e) =
                state.fabric.presence.heartbeat(&claims.user_id, Role::Driver, lat, lng).await
            {
                warn!(driver_id = %claims.user_id, err = %e, "driver location update failed");
            }
        }
        ClientEvent::JoinBooking { booking_id } => {
            state.fabric.join(conn_id, &Room::Booking(booking_id));
        }
        ClientEvent::LeaveBooking { booking_id } => {
            state.fabric.leave(conn_id, &Room::Booking(booking_id));
        }
        ClientEvent::JoinOrder { order_id } => {
            state.fabric.join(conn_id, &Room::Order(order_id));
        }
        ClientEvent::LeaveOrder { order_id } => {
            state.fabric.leave(conn_id, &Room::Order(order_id));
        }
        ClientEvent::Ping => {}
    }
}
