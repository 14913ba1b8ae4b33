// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agenthub: lease coordination, agent session hub, and rate limiting.

pub mod alarm;
pub mod auth;
pub mod clock;
pub mod config;
pub mod delegation;
pub mod error;
pub mod hub;
pub mod lease;
pub mod ratelimit;
pub mod records;
pub mod state;
pub mod store;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::alarm::spawn_alarm;
use crate::auth::{AuthService, IdentityPolicy, StaticAuthService};
use crate::clock::{SharedClock, SystemClock};
use crate::config::HubConfig;
use crate::delegation::{Classifier, HttpClassifier, KeywordClassifier, KeywordRules};
use crate::hub::{Hub, HubDeps, HubSettings};
use crate::lease::service::LeaseService;
use crate::ratelimit::{RateLimitConfig, ShardedRateLimiter};
use crate::records::MemoryRecords;
use crate::state::AppState;
use crate::store::{FileStore, MemoryStore, Namespace, SharedStore};
use crate::transport::build_router;

/// Root-store prefix owned by the session hub.
const HUB_PREFIX: &str = "hub/";

fn build_classifier(config: &HubConfig) -> anyhow::Result<Arc<dyn Classifier>> {
    if let Some(ref url) = config.classifier_url {
        tracing::info!(%url, "using remote classifier");
        return Ok(Arc::new(HttpClassifier::new(url.clone())?));
    }
    let classifier = match config.classifier_rules {
        Some(ref path) => KeywordClassifier::load(path, config.consensus_threshold)?,
        None => KeywordClassifier::new(KeywordRules::default(), config.consensus_threshold)?,
    };
    Ok(Arc::new(classifier))
}

fn build_auth(config: &HubConfig) -> anyhow::Result<Arc<dyn AuthService>> {
    let auth = match config.auth_config {
        Some(ref path) => StaticAuthService::load(path)?,
        None => StaticAuthService::new(),
    };
    Ok(Arc::new(auth))
}

/// Recover durable state and assemble the shared server state.
///
/// Also spawns the lease sweeps and the hub maintenance alarm; all of them
/// stop when `shutdown` is cancelled.
pub async fn build_state(
    config: &HubConfig,
    store: SharedStore,
    clock: SharedClock,
    shutdown: CancellationToken,
) -> anyhow::Result<Arc<AppState>> {
    let leases = LeaseService::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        config.lease_sweep_interval(),
        shutdown.clone(),
    );
    let recovered = leases.recover().await?;
    tracing::info!(partitions = recovered, "lease partitions recovered");

    let hub_store = Namespace::shared(Arc::clone(&store), HUB_PREFIX);
    let hub = Hub::open(
        HubDeps {
            store: Arc::clone(&hub_store),
            clock: Arc::clone(&clock),
            classifier: build_classifier(config)?,
            records: Arc::new(MemoryRecords::default()),
        },
        HubSettings {
            stale_after: config.stale_after(),
            max_retries: config.max_retries,
            channel_buffer: config.channel_buffer,
            snapshot_limit: config.snapshot_limit,
        },
    )
    .await?;

    {
        let hub = Arc::clone(&hub);
        spawn_alarm(
            "hub-maintenance".to_owned(),
            hub_store,
            Arc::clone(&clock),
            config.hub_maintenance_interval(),
            shutdown.clone(),
            move || {
                let hub = Arc::clone(&hub);
                async move {
                    let report = hub.maintain().await;
                    tracing::debug!(?report, "hub maintenance");
                }
            },
        );
    }

    let limiter = ShardedRateLimiter::new(
        config.rate_shards,
        RateLimitConfig {
            sweep_every: config.rate_sweep_every,
            sweep_threshold: config.rate_sweep_threshold,
            hard_cap: config.rate_hard_cap,
        },
        clock,
    );

    Ok(Arc::new(AppState {
        hub,
        leases,
        limiter,
        auth: build_auth(config)?,
        identity_policy: IdentityPolicy {
            trust_identity_headers: config.trust_identity_headers,
            service_key: config.service_key.clone(),
        },
        auth_token: config.auth_token.clone(),
        shutdown,
    }))
}

/// Run the hub server until shutdown.
pub async fn run(config: HubConfig) -> anyhow::Result<()> {
    config.validate()?;
    if config.control_routes_open() {
        tracing::warn!("no --auth-token, hub and lease routes accept unauthenticated requests");
    }
    let shutdown = CancellationToken::new();

    let store: SharedStore = match config.state_dir {
        Some(ref dir) => {
            tracing::info!(dir = %dir.display(), "using file store");
            Arc::new(FileStore::open(dir)?)
        }
        None => {
            tracing::warn!("no --state-dir, state will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let state = build_state(&config, store, Arc::new(SystemClock), shutdown.clone()).await?;
    let hub = Arc::clone(&state.hub);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!("agenthub listening on {}", listener.local_addr()?);

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
            }
            shutdown.cancel();
        });
    }

    let router = build_router(state);
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    hub.shutdown().await.map_err(|code| anyhow::anyhow!("hub shutdown: {code}"))?;
    tracing::info!("agenthub stopped");
    Ok(())
}
