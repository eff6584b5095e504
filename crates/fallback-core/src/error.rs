//! Centralized error types for the fallback controller.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::recovery_probe::PlatformError;
use crate::supervisor::SupervisorError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for SupervisorError {
    fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "service_permission_denied",
            Self::Timeout => "service_timeout",
            Self::Other(_) => "service_control_failed",
        }
    }
}

impl ErrorCode for PlatformError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid_token",
            Self::Network(_) => "network_error",
            Self::ApiError(..) => "api_error",
        }
    }
}

/// Application-wide error type for the fallback controller's HTTP surface.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum FallbackError {
    /// The request body was not valid JSON or was missing required fields.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// The request body exceeded the maximum accepted size.
    #[error("Request body too large: {0} bytes")]
    BodyTooLarge(usize),

    /// The bearer token was missing or did not match the configured token.
    #[error("Authentication failed")]
    AuthFailure,

    /// The record store could not be read or written.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Internal server error not covered by a more specific variant.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FallbackError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "malformed_request",
            Self::BodyTooLarge(_) => "body_too_large",
            Self::AuthFailure => "auth_failure",
            Self::Persistence(_) => "persistence_failure",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::AuthFailure => StatusCode::UNAUTHORIZED,
            Self::Persistence(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type FallbackResult<T> = Result<T, FallbackError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for FallbackError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}
