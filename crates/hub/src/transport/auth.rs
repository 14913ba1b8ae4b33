// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::{authenticate, constant_time_eq};
use crate::error::ErrorCode;
use crate::state::AppState;

/// Path of the agent channel endpoint.
pub const WS_PATH: &str = "/ws";

/// Validate a Bearer token from HTTP headers.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ErrorCode> {
    let expected = match expected {
        Some(tok) => tok,
        None => return Ok(()),
    };

    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(ErrorCode::Unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or(ErrorCode::Unauthorized)?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(ErrorCode::Unauthorized)
    }
}

/// Axum middleware that enforces Bearer token authentication.
///
/// Exempt: `/health` and the agent channel, which authenticates itself.
pub async fn auth_layer(
    state: State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/health" || path == WS_PATH {
        return next.run(req).await;
    }

    if let Err(code) = validate_bearer(req.headers(), state.auth_token.as_deref()) {
        return code.into_response();
    }

    next.run(req).await
}

/// Resolve the channel identity before the upgrade is accepted, so rejected
/// agents get a plain 401/403 instead of a socket.
pub async fn identity_layer(
    state: State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let identity = authenticate(
        req.headers(),
        req.uri().query(),
        WS_PATH,
        &state.identity_policy,
        &*state.auth,
    )
    .await;

    match identity {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(code) => {
            tracing::debug!(%code, "agent channel rejected");
            code.into_response()
        }
    }
}
