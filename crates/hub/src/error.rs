// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes shared by the HTTP surface and the agent channel protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    NotLeaseHolder,
    NoActiveLease,
    StorageUnavailable,
    DeliveryFailed,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::NotLeaseHolder => 409,
            Self::NoActiveLease => 404,
            Self::StorageUnavailable => 500,
            Self::DeliveryFailed => 502,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::NotLeaseHolder => "NOT_LEASE_HOLDER",
            Self::NoActiveLease => "NO_ACTIVE_LEASE",
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
            Self::DeliveryFailed => "DELIVERY_FAILED",
            Self::Internal => "INTERNAL",
        }
    }

    /// Generic message safe to show callers; internal detail stays in the log.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::BadRequest => "invalid request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not found",
            Self::NotLeaseHolder => "lease is held by another worker",
            Self::NoActiveLease => "no active lease for task",
            Self::StorageUnavailable => "internal error",
            Self::DeliveryFailed => "delivery failed",
            Self::Internal => "internal error",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl IntoResponse for ErrorCode {
    fn into_response(self) -> Response {
        self.to_http_response(self.default_message()).into_response()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ErrorCode {}

/// Log a durable-store failure and collapse it into [`ErrorCode::StorageUnavailable`].
pub fn storage_unavailable(op: &'static str, err: anyhow::Error) -> ErrorCode {
    tracing::error!(op, err = %format!("{err:#}"), "durable store call failed");
    ErrorCode::StorageUnavailable
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
