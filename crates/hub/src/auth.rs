// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Channel identity resolution and the token/permission service behind it.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

pub const TRUSTED_USER_HEADER: &str = "x-verified-user-id";
pub const TRUSTED_ROLE_HEADER: &str = "x-verified-role";
pub const SERVICE_KEY_HEADER: &str = "x-service-key";

/// Channel kind passed to [`AuthService::has_permission`] for agent sockets.
pub const WEBSOCKET: &str = "websocket";

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    TrustedHeader,
    ServiceKey,
    Token,
}

/// Who is on the other end of a channel. Fixed for the channel's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub role: String,
    pub auth_method: AuthMethod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedToken {
    pub sub: String,
    pub role: String,
}

/// Token verification and role permissions.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Resolve a bearer token, or `None` if it is unknown.
    async fn verify_token(&self, token: &str) -> anyhow::Result<Option<VerifiedToken>>;

    async fn has_permission(
        &self,
        channel_kind: &str,
        path: &str,
        role: &str,
    ) -> anyhow::Result<bool>;
}

/// On-disk shape of `--auth-config`.
#[derive(Debug, Default, Deserialize)]
struct AuthTable {
    #[serde(default)]
    tokens: HashMap<String, VerifiedToken>,
    #[serde(default)]
    permissions: HashMap<String, Vec<String>>,
}

/// Auth service backed by a fixed token table.
///
/// Permission patterns match a path exactly, or as a prefix when they end in
/// `*`. With no permission entries at all, every verified role is allowed.
#[derive(Debug, Default)]
pub struct StaticAuthService {
    tokens: HashMap<String, VerifiedToken>,
    permissions: HashMap<String, Vec<String>>,
}

impl StaticAuthService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let table: AuthTable = serde_json::from_str(&contents)?;
        tracing::info!(
            path = %path.display(),
            tokens = table.tokens.len(),
            roles = table.permissions.len(),
            "loaded auth config"
        );
        Ok(Self { tokens: table.tokens, permissions: table.permissions })
    }

    pub fn with_token(mut self, token: &str, sub: &str, role: &str) -> Self {
        self.tokens
            .insert(token.to_owned(), VerifiedToken { sub: sub.to_owned(), role: role.to_owned() });
        self
    }

    pub fn with_permission(mut self, role: &str, pattern: &str) -> Self {
        self.permissions.entry(role.to_owned()).or_default().push(pattern.to_owned());
        self
    }
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => pattern == path,
    }
}

#[async_trait]
impl AuthService for StaticAuthService {
    async fn verify_token(&self, token: &str) -> anyhow::Result<Option<VerifiedToken>> {
        Ok(self.tokens.iter().find(|(t, _)| constant_time_eq(t, token)).map(|(_, v)| v.clone()))
    }

    async fn has_permission(
        &self,
        _channel_kind: &str,
        path: &str,
        role: &str,
    ) -> anyhow::Result<bool> {
        if self.permissions.is_empty() {
            return Ok(true);
        }
        Ok(self
            .permissions
            .get(role)
            .is_some_and(|patterns| patterns.iter().any(|p| pattern_matches(p, path))))
    }
}

/// Settings that decide which credentials a channel may present.
#[derive(Debug, Clone, Default)]
pub struct IdentityPolicy {
    pub trust_identity_headers: bool,
    pub service_key: Option<String>,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty())
}

/// The percent-decoded `token` query parameter, if present and non-empty.
fn query_token(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(name, value)| name == "token" && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

/// Resolve the identity of a channel request, then check it may open `path`.
///
/// Credentials are tried in order: trusted front-door headers (when enabled),
/// the shared service key, then a bearer or `?token=` token.
pub async fn authenticate(
    headers: &HeaderMap,
    query: Option<&str>,
    path: &str,
    policy: &IdentityPolicy,
    auth: &dyn AuthService,
) -> Result<Identity, ErrorCode> {
    let identity = resolve_identity(headers, query, policy, auth).await?;

    let allowed = auth.has_permission(WEBSOCKET, path, &identity.role).await.map_err(|e| {
        tracing::error!(err = %format!("{e:#}"), "permission check failed");
        ErrorCode::Internal
    })?;
    if !allowed {
        tracing::warn!(user = %identity.user_id, role = %identity.role, path, "channel forbidden");
        return Err(ErrorCode::Forbidden);
    }
    Ok(identity)
}

async fn resolve_identity(
    headers: &HeaderMap,
    query: Option<&str>,
    policy: &IdentityPolicy,
    auth: &dyn AuthService,
) -> Result<Identity, ErrorCode> {
    if policy.trust_identity_headers {
        if let (Some(user), Some(role)) =
            (header(headers, TRUSTED_USER_HEADER), header(headers, TRUSTED_ROLE_HEADER))
        {
            return Ok(Identity {
                user_id: user.to_owned(),
                role: role.to_owned(),
                auth_method: AuthMethod::TrustedHeader,
            });
        }
    }

    if let (Some(expected), Some(presented)) =
        (policy.service_key.as_deref(), header(headers, SERVICE_KEY_HEADER))
    {
        if constant_time_eq(presented, expected) {
            return Ok(Identity {
                user_id: "service".to_owned(),
                role: "service".to_owned(),
                auth_method: AuthMethod::ServiceKey,
            });
        }
    }

    let bearer = header(headers, "authorization").and_then(|h| h.strip_prefix("Bearer "));
    let Some(token) = bearer.map(str::to_owned).or_else(|| query_token(query)) else {
        return Err(ErrorCode::Unauthorized);
    };

    let verified = auth.verify_token(&token).await.map_err(|e| {
        tracing::error!(err = %format!("{e:#}"), "token verification failed");
        ErrorCode::Internal
    })?;
    match verified {
        Some(v) => Ok(Identity { user_id: v.sub, role: v.role, auth_method: AuthMethod::Token }),
        None => Err(ErrorCode::Unauthorized),
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
