// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Haulcast: broadcast dispatcher core of a freight-matching backend.
//!
//! Customers request trucks; the dispatcher finds online transporters of
//! the matching type, fans the broadcast out over WebSocket, widens the
//! search radius while nobody accepts, tracks partial fulfilment and times
//! unfilled requests out.  All cross-instance coordination rides a shared
//! key-value store, so any number of instances can serve any request.

pub mod config;
pub mod dispatcher;
pub mod durable;
pub mod error;
pub mod fabric;
pub mod lifecycle;
pub mod model;
pub mod presence;
pub mod state;
pub mod store;
pub mod timer;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;
use crate::durable::{DurableStore, MemoryDurable};
use crate::state::DispatchState;
use crate::transport::build_router;

/// Run the dispatch server until shutdown.
pub async fn run(config: DispatchConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let store = store::connect(&config).await?;
    // The relational layer is an external collaborator; the in-process
    // implementation backs development and tests.
    let durable: Arc<dyn DurableStore> = Arc::new(MemoryDurable::new());

    let state = Arc::new(DispatchState::new(config, store, durable, shutdown.clone())?);
    spawn_background(&state);

    // Crash recovery: overdue bookings are driven through timeout before
    // serving traffic; expires_at on the durable row is authoritative.
    dispatcher::startup_sweep(&state).await;

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    tracing::info!(instance_id = %state.instance_id, "haulcast listening on {addr}");
    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}

/// Resolve on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Spawn the per-instance background loops: timer drain, relay consumer,
/// stale-presence sweep, re-broadcast worker and the expiry backstop.
pub fn spawn_background(state: &Arc<DispatchState>) {
    timer::spawn_timer_loop(Arc::clone(state));
    fabric::spawn_relay(Arc::clone(&state.fabric), state.shutdown.clone());
    presence::spawn_stale_sweeper(
        Arc::clone(&state.presence),
        state.config.stale_cleanup_interval(),
        state.instance_id.clone(),
        state.shutdown.clone(),
    );
    dispatcher::spawn_rebroadcast_worker(Arc::clone(state));
    dispatcher::spawn_expiry_sweeper(Arc::clone(state));
}
