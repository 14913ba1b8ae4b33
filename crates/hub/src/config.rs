// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Configuration for the agent hub.
#[derive(Debug, Clone, Parser)]
#[command(name = "agenthub", version, about = "Agent coordination hub")]
pub struct HubConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "AGENTHUB_HOST")]
    pub host: String,

    /// Port to listen on (0 picks a free port).
    #[arg(long, default_value_t = 9850, env = "AGENTHUB_PORT")]
    pub port: u16,

    /// Bearer token for HTTP control routes. If unset, auth is disabled.
    #[arg(long, env = "AGENTHUB_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Shared service credential accepted on agent channels via `x-service-key`.
    #[arg(long, env = "AGENTHUB_SERVICE_KEY")]
    pub service_key: Option<String>,

    /// Accept `x-verified-user-id` / `x-verified-role` from a trusted front door.
    #[arg(long, env = "AGENTHUB_TRUST_IDENTITY_HEADERS")]
    pub trust_identity_headers: bool,

    /// Directory for durable state. If unset, state lives in memory only.
    #[arg(long, env = "AGENTHUB_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Path to the token/permission table JSON file.
    #[arg(long, env = "AGENTHUB_AUTH_CONFIG")]
    pub auth_config: Option<PathBuf>,

    /// Remote delegation classifier URL. If unset, the keyword classifier is used.
    #[arg(long, env = "AGENTHUB_CLASSIFIER_URL")]
    pub classifier_url: Option<String>,

    /// Keyword classifier rules JSON file.
    #[arg(long, env = "AGENTHUB_CLASSIFIER_RULES")]
    pub classifier_rules: Option<PathBuf>,

    /// Lease sweep interval in seconds.
    #[arg(long, default_value_t = 60, env = "AGENTHUB_LEASE_SWEEP_SECS")]
    pub lease_sweep_secs: u64,

    /// Hub maintenance interval in seconds.
    #[arg(long, default_value_t = 60, env = "AGENTHUB_HUB_MAINTENANCE_SECS")]
    pub hub_maintenance_secs: u64,

    /// Close channels with no status or pong for this many seconds.
    #[arg(long, default_value_t = 120, env = "AGENTHUB_STALE_AFTER_SECS")]
    pub stale_after_secs: u64,

    /// Delivery attempts before a pending task is dropped.
    #[arg(long, default_value_t = 3, env = "AGENTHUB_MAX_RETRIES")]
    pub max_retries: u32,

    /// Outbound queue depth per agent channel.
    #[arg(long, default_value_t = 64, env = "AGENTHUB_CHANNEL_BUFFER")]
    pub channel_buffer: usize,

    /// Rows per category in a status snapshot.
    #[arg(long, default_value_t = 20, env = "AGENTHUB_SNAPSHOT_LIMIT")]
    pub snapshot_limit: usize,

    /// Routing confidence below which a task is flagged for consensus.
    #[arg(long, default_value_t = 0.6, env = "AGENTHUB_CONSENSUS_THRESHOLD")]
    pub consensus_threshold: f64,

    /// Number of rate limiter shards.
    #[arg(long, default_value_t = 16, env = "AGENTHUB_RATE_SHARDS")]
    pub rate_shards: usize,

    /// Sweep expired rate counters every N requests per shard.
    #[arg(long, default_value_t = 1000, env = "AGENTHUB_RATE_SWEEP_EVERY")]
    pub rate_sweep_every: u64,

    /// Sweep rate counters when a shard holds more than this many.
    #[arg(long, default_value_t = 10_000, env = "AGENTHUB_RATE_SWEEP_THRESHOLD")]
    pub rate_sweep_threshold: usize,

    /// Clear a shard outright if it still holds this many after sweeping.
    #[arg(long, default_value_t = 100_000, env = "AGENTHUB_RATE_HARD_CAP")]
    pub rate_hard_cap: usize,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "AGENTHUB_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (json or text).
    #[arg(long, env = "AGENTHUB_LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

macro_rules! secs_field {
    ($method:ident, $field:ident) => {
        pub fn $method(&self) -> Duration {
            Duration::from_secs(self.$field)
        }
    };
}

impl HubConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("--lease-sweep-secs", self.lease_sweep_secs),
            ("--hub-maintenance-secs", self.hub_maintenance_secs),
            ("--stale-after-secs", self.stale_after_secs),
        ] {
            if value == 0 {
                anyhow::bail!("{name} must be greater than zero");
            }
        }
        if self.rate_shards == 0 {
            anyhow::bail!("--rate-shards must be greater than zero");
        }
        if self.channel_buffer == 0 {
            anyhow::bail!("--channel-buffer must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.consensus_threshold) {
            anyhow::bail!("--consensus-threshold must be between 0 and 1");
        }
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("--log-format must be json or text");
        }
        Ok(())
    }

    /// True when the HTTP control and lease routes take requests without a
    /// bearer token.
    pub fn control_routes_open(&self) -> bool {
        self.auth_token.is_none()
    }

    secs_field!(lease_sweep_interval, lease_sweep_secs);
    secs_field!(hub_maintenance_interval, hub_maintenance_secs);
    secs_field!(stale_after, stale_after_secs);
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
