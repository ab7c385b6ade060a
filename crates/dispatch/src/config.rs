// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// One step of the progressive radius search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadiusStep {
    pub radius_km: f64,
    pub timeout_ms: u64,
}

/// Configuration for the dispatch service.
#[derive(Debug, Clone, clap::Parser)]
pub struct DispatchConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "DISPATCH_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9400, env = "DISPATCH_PORT")]
    pub port: u16,

    /// HMAC secret for signed bearer tokens.
    #[arg(long, default_value = "dev-secret-change-me", env = "AUTH_SECRET")]
    pub auth_secret: String,

    /// Total dispatch horizon in seconds before an unfilled broadcast expires.
    #[arg(long, default_value_t = 120, env = "BROADCAST_TIMEOUT_SECONDS")]
    pub broadcast_timeout_seconds: u64,

    /// Ordered radius steps as `km:timeout_ms` pairs, comma separated.
    #[arg(long, default_value = "10:15000,25:15000,50:15000,75:15000", env = "RADIUS_STEPS")]
    pub radius_steps: String,

    /// Nearest-transporter cap per radius step.
    #[arg(long, default_value_t = 20, env = "RADIUS_STEP_LIMIT")]
    pub radius_step_limit: usize,

    /// Max concurrent WebSocket connections per user.
    #[arg(long, default_value_t = 5, env = "MAX_CONNECTIONS_PER_USER")]
    pub max_connections_per_user: usize,

    /// Presence TTL for drivers, in seconds.
    #[arg(long, default_value_t = 60, env = "PRESENCE_TTL_SECONDS")]
    pub presence_ttl_seconds: u64,

    /// Presence TTL for transporters, in seconds.
    #[arg(long, default_value_t = 120, env = "TRANSPORTER_PRESENCE_TTL_SECONDS")]
    pub transporter_presence_ttl_seconds: u64,

    /// Stale presence cleanup interval in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "STALE_CLEANUP_INTERVAL_MS")]
    pub stale_cleanup_interval_ms: u64,

    /// Timer drain tick interval in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "TIMER_DRAIN_INTERVAL_MS")]
    pub timer_drain_interval_ms: u64,

    /// Shared store URL (`redis://` or `rediss://` for TLS). Unset means the
    /// in-process store.
    #[arg(long, env = "STORE_URL")]
    pub store_url: Option<String>,

    /// Max retries per shared-store command.
    #[arg(long, default_value_t = 2, env = "STORE_MAX_RETRIES")]
    pub store_max_retries: u32,

    /// Per-command shared-store timeout in milliseconds.
    #[arg(long, default_value_t = 2_000, env = "STORE_COMMAND_TIMEOUT_MS")]
    pub store_command_timeout_ms: u64,

    /// Connection pool ceiling for the shared store.
    #[arg(long, default_value_t = 16, env = "STORE_POOL_SIZE")]
    pub store_pool_size: usize,

    /// Development mode: fall back to the in-process store when the remote
    /// store is unreachable instead of refusing to start.
    #[arg(long, env = "DISPATCH_DEV")]
    pub dev: bool,
}

impl DispatchConfig {
    /// Parse the ordered radius step list. Malformed input is a startup error.
    pub fn parse_radius_steps(&self) -> anyhow::Result<Vec<RadiusStep>> {
        let mut steps = Vec::new();
        for part in self.radius_steps.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (km, ms) = part
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("radius step `{part}` is not `km:timeout_ms`"))?;
            steps.push(RadiusStep {
                radius_km: km.trim().parse()?,
                timeout_ms: ms.trim().parse()?,
            });
        }
        if steps.is_empty() {
            anyhow::bail!("RADIUS_STEPS must contain at least one step");
        }
        let total_ms: u64 = steps.iter().map(|s| s.timeout_ms).sum();
        if self.broadcast_timeout_seconds * 1000 < total_ms {
            anyhow::bail!(
                "BROADCAST_TIMEOUT_SECONDS ({}s) is shorter than the sum of radius step timeouts ({total_ms}ms)",
                self.broadcast_timeout_seconds
            );
        }
        Ok(steps)
    }

    pub fn dispatch_horizon(&self) -> Duration {
        Duration::from_secs(self.broadcast_timeout_seconds)
    }

    pub fn driver_presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_seconds)
    }

    pub fn transporter_presence_ttl(&self) -> Duration {
        Duration::from_secs(self.transporter_presence_ttl_seconds)
    }

    pub fn stale_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.stale_cleanup_interval_ms)
    }

    pub fn timer_drain_interval(&self) -> Duration {
        Duration::from_millis(self.timer_drain_interval_ms)
    }

    pub fn store_command_timeout(&self) -> Duration {
        Duration::from_millis(self.store_command_timeout_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
pub(crate) mod tests;
