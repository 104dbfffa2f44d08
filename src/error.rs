use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::middleware::rate_limit::RateLimitSnapshot;
use crate::safety::UnsafeEnvironment;
use crate::validation::ValidationError;

/// Application-wide error types with appropriate HTTP status codes.
///
/// Every rejection the security pipeline can produce is a variant here, and
/// [`IntoResponse`] renders each one to the fixed JSON body clients rely on.
///
/// # Disclosure Rules
///
/// - Client input errors (`InvalidRequest`, `InvalidJson`, `ValidationFailed`)
///   describe the caller's own input and are safe to return in detail.
/// - Authentication and authorization errors stay generic so they never hint
///   at why a credential was refused.
/// - Internal errors carry a message for the server log only; the client sees
///   a generic body.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded for {}", .0.key)]
    RateLimited(RateLimitSnapshot),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid JSON in request body")]
    InvalidJson,

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Validation failed with {} error(s)", .0.len())]
    ValidationFailed(Vec<ValidationError>),

    #[error("Dev operations are disabled in production")]
    ProductionDisabled,

    #[error("Environment is not safe for dev operations: {0}")]
    EnvironmentUnsafe(#[from] UnsafeEnvironment),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl ErrorResponse {
    fn new(error: &'static str) -> Self {
        Self {
            error,
            details: None,
            retry_after: None,
        }
    }
}

impl AppError {
    /// HTTP status code for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::AuthenticationRequired | AppError::InvalidToken => StatusCode::UNAUTHORIZED,
            AppError::InsufficientPermissions | AppError::ProductionDisabled => {
                StatusCode::FORBIDDEN
            }
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::InvalidRequest(_) | AppError::InvalidJson | AppError::ValidationFailed(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::EnvironmentUnsafe(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::AuthenticationFailed(_)
            | AppError::Internal(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Full details stay server-side. Routine rejections (401/403/429/400)
        // are logged where they are detected, so only 5xx are logged here.
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = match &self {
            AppError::AuthenticationRequired => ErrorResponse::new("Authentication required"),
            AppError::InvalidToken => ErrorResponse::new("Invalid authentication token"),
            AppError::InsufficientPermissions => ErrorResponse::new("Insufficient permissions"),
            AppError::AuthenticationFailed(_) => ErrorResponse::new("Authentication failed"),
            AppError::RateLimited(snapshot) => ErrorResponse {
                retry_after: Some(snapshot.retry_after_secs),
                ..ErrorResponse::new("Rate limit exceeded")
            },
            AppError::InvalidRequest(reason) => ErrorResponse {
                details: Some(Value::String(reason.clone())),
                ..ErrorResponse::new("Invalid request")
            },
            AppError::InvalidJson => ErrorResponse::new("Invalid JSON in request body"),
            AppError::PayloadTooLarge(_) => ErrorResponse::new("Request body too large"),
            AppError::ValidationFailed(errors) => ErrorResponse {
                details: serde_json::to_value(errors).ok(),
                ..ErrorResponse::new("Validation failed")
            },
            AppError::ProductionDisabled => {
                ErrorResponse::new("Dev operations are disabled in production")
            }
            AppError::EnvironmentUnsafe(_) => {
                ErrorResponse::new("Dev operations are unavailable in this environment")
            }
            AppError::Internal(_) | AppError::ConfigError(_) => {
                ErrorResponse::new("Internal server error")
            }
        };

        let mut response = (status, Json(body)).into_response();

        if let AppError::RateLimited(snapshot) = &self {
            snapshot.apply_rejection_headers(response.headers_mut());
        }

        response
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
