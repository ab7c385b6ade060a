// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

pub(crate) fn test_config() -> DispatchConfig {
    DispatchConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        auth_secret: "test-secret".to_owned(),
        broadcast_timeout_seconds: 120,
        radius_steps: "10:15000,25:15000,50:15000,75:15000".to_owned(),
        radius_step_limit: 20,
        max_connections_per_user: 5,
        presence_ttl_seconds: 60,
        transporter_presence_ttl_seconds: 120,
        stale_cleanup_interval_ms: 30_000,
        timer_drain_interval_ms: 5_000,
        store_url: None,
        store_max_retries: 2,
        store_command_timeout_ms: 2_000,
        store_pool_size: 16,
        dev: true,
    }
}

#[test]
fn default_radius_steps_parse() {
    let steps = test_config().parse_radius_steps().unwrap();
    assert_eq!(steps.len(), 4);
    assert_eq!(steps[0], RadiusStep { radius_km: 10.0, timeout_ms: 15_000 });
    assert_eq!(steps[3], RadiusStep { radius_km: 75.0, timeout_ms: 15_000 });
}

#[test]
fn malformed_radius_steps_rejected() {
    let mut config = test_config();
    config.radius_steps = "10;15000".to_owned();
    assert!(config.parse_radius_steps().is_err());

    config.radius_steps = "ten:15000".to_owned();
    assert!(config.parse_radius_steps().is_err());

    config.radius_steps = "".to_owned();
    assert!(config.parse_radius_steps().is_err());
}

#[test]
fn horizon_must_cover_step_timeouts() {
    let mut config = test_config();
    // 4 steps x 15s = 60s of steps, but a 30s horizon.
    config.broadcast_timeout_seconds = 30;
    assert!(config.parse_radius_steps().is_err());
}
