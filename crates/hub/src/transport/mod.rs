// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the hub.

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Build the axum `Router` with all hub, lease, and rate-limit routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/health", get(http::health))
        // Agent channel (identity resolved before upgrade)
        .route(
            auth::WS_PATH,
            get(ws::ws_handler)
                .layer(middleware::from_fn_with_state(state.clone(), auth::identity_layer)),
        )
        // Session hub
        .route("/hub/broadcast-task", post(http::broadcast_task))
        .route("/hub/enqueue-task", post(http::enqueue_task))
        .route("/hub/broadcast-alert", post(http::broadcast_alert))
        .route("/hub/alerts/{id}/ack", post(http::acknowledge_alert))
        .route("/hub/agents", get(http::list_agents))
        .route("/hub/agents/known", get(http::known_agents))
        .route("/hub/pending", get(http::pending_tasks))
        // Lease coordinator
        .route("/lease/claim-next", post(http::claim_next))
        .route("/lease/release", post(http::release))
        .route("/lease/renew", post(http::renew))
        .route("/lease/leases", get(http::list_leases))
        .route("/lease/task/{task_id}", delete(http::delete_task))
        // Rate limiter
        .route("/ratelimit/check", post(http::rate_check))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
