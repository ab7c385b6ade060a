// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{DispatchConfig, RadiusStep};
use crate::durable::DurableStore;
use crate::fabric::DeliveryFabric;
use crate::presence::{Presence, PresenceIndex};
use crate::store::SharedStore;
use crate::timer::TimerEngine;

/// Shared dispatch state: every component, constructor-injected once per
/// process.  Handlers and background loops receive `Arc<DispatchState>`.
pub struct DispatchState {
    pub config: DispatchConfig,
    /// Parsed `RADIUS_STEPS`, validated at startup.
    pub radius_steps: Vec<RadiusStep>,
    /// Process-unique id; relay source marker and lock holder tag.
    pub instance_id: String,
    pub store: Arc<dyn SharedStore>,
    pub durable: Arc<dyn DurableStore>,
    pub presence: Arc<PresenceIndex>,
    pub fabric: Arc<DeliveryFabric>,
    pub timers: TimerEngine,
    pub shutdown: CancellationToken,
}

impl DispatchState {
    pub fn new(
        config: DispatchConfig,
        store: Arc<dyn SharedStore>,
        durable: Arc<dyn DurableStore>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let radius_steps = config.parse_radius_steps()?;
        let instance_id = uuid::Uuid::new_v4().to_string();

        let presence = Arc::new(PresenceIndex::new(
            Arc::clone(&store),
            Arc::clone(&durable),
            config.transporter_presence_ttl(),
            config.driver_presence_ttl(),
        ));
        let fabric = Arc::new(DeliveryFabric::new(
            instance_id.clone(),
            Arc::clone(&store),
            Arc::clone(&presence) as Arc<dyn Presence>,
            config.max_connections_per_user,
        ));
        let timers = TimerEngine::new(Arc::clone(&store));

        Ok(Self {
            config,
            radius_steps,
            instance_id,
            store,
            durable,
            presence,
            fabric,
            timers,
            shutdown,
        })
    }
}
