// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{AuthService, IdentityPolicy};
use crate::hub::Hub;
use crate::lease::service::LeaseService;
use crate::ratelimit::ShardedRateLimiter;

/// Shared server state handed to every route.
pub struct AppState {
    pub hub: Arc<Hub>,
    pub leases: LeaseService,
    pub limiter: ShardedRateLimiter,
    pub auth: Arc<dyn AuthService>,
    pub identity_policy: IdentityPolicy,
    /// Bearer token for HTTP control routes. `None` disables the check.
    pub auth_token: Option<String>,
    pub shutdown: CancellationToken,
}
