// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! HTTP-facing error response used by every RPC route.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DispatchError;

/// Result type used by axum route handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// HTTP-facing error returned by RC and Coordinator RPC routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiError {
    /// Bad request (400) — malformed RPC arguments.
    BadRequest(String),
    /// Conflict (409) — e.g. a lock held by another caller.
    Conflict(String),
    /// Too many requests (429) — caller should back off and retry.
    TooManyRequests(String),
    /// Internal server error (500).
    InternalError(String),
    /// Service unavailable (503) — peer is shutting down.
    ServiceUnavailable(String),
}

/// Body returned alongside the status code above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Conflict(_) => "CONFLICT",
            Self::TooManyRequests(_) => "TOO_MANY_REQUESTS",
            Self::InternalError(_) => "INTERNAL_ERROR",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::BadRequest(m)
            | Self::Conflict(m)
            | Self::TooManyRequests(m)
            | Self::InternalError(m)
            | Self::ServiceUnavailable(m) => m,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            code: self.error_code().to_string(),
            message: self.message().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::PolicyDenied(m) => Self::Conflict(m),
            DispatchError::Backpressure(m) => Self::TooManyRequests(m),
            DispatchError::RuleFailed { .. } => Self::InternalError(err.to_string()),
            DispatchError::IteratorFailed(_) => Self::InternalError(err.to_string()),
            DispatchError::Rpc { .. } => Self::ServiceUnavailable(err.to_string()),
            DispatchError::Persistence { .. } => Self::InternalError(err.to_string()),
            DispatchError::Config(m) => Self::BadRequest(m),
            DispatchError::Fatal(m) => Self::InternalError(m),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("invalid JSON: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::TooManyRequests("x".into()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_from_dispatch_error() {
        let err: ApiError = DispatchError::Backpressure("rebalancing".into()).into();
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_display() {
        let e = ApiError::Conflict("lock held".into());
        assert_eq!(e.to_string(), "CONFLICT: lock held");
    }
}
