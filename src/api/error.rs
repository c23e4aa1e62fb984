use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::controller::{BroadcastError, ControlError};
use crate::domain::LoadId;

/// API error types that can be returned from handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Load {0} is locked by the battery interlock")]
    SafetyLocked(LoadId),

    #[error("Actuation failed: {0}")]
    ActuationFailed(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Error response that gets serialized to JSON
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    message: String,
}

impl ApiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::SafetyLocked(_) => StatusCode::CONFLICT,
            ApiError::ActuationFailed(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type string
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NotFound",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Unauthorized => "Unauthorized",
            ApiError::SafetyLocked(_) => "SafetyLocked",
            ApiError::ActuationFailed(_) => "ActuationFailed",
            ApiError::ServiceUnavailable(_) => "ServiceUnavailable",
            ApiError::InternalError(_) => "InternalServerError",
        }
    }

    /// Machine-readable reason for control-surface failures
    fn reason(&self) -> Option<&'static str> {
        match self {
            ApiError::SafetyLocked(_) => Some("safety_locked"),
            ApiError::ActuationFailed(_) => Some("actuation_failed"),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            ApiError::InternalError(_) => {
                tracing::error!(error = %self, "API error occurred");
                "An internal error occurred".to_string()
            }
            ApiError::ActuationFailed(_) | ApiError::ServiceUnavailable(_) => {
                tracing::warn!(error = %self, "upstream failure");
                self.to_string()
            }
            _ => {
                tracing::debug!(error = %self, "Client error");
                self.to_string()
            }
        };

        let body = ErrorResponse {
            success: false,
            error: self.error_type(),
            reason: self.reason(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::InternalError(error.to_string())
    }
}

impl From<ControlError> for ApiError {
    fn from(error: ControlError) -> Self {
        match error {
            ControlError::UnknownLoad(load) => ApiError::BadRequest(format!("load {load} is not configured")),
            ControlError::ActuationFailed { .. } => ApiError::ActuationFailed(error.to_string()),
        }
    }
}

impl From<BroadcastError> for ApiError {
    fn from(error: BroadcastError) -> Self {
        ApiError::ServiceUnavailable(error.to_string())
    }
}
