//! Error types for the REM API
//!
//! Maps the core error taxonomy onto HTTP responses with stable codes.
//! All errors serialize as JSON bodies with the appropriate status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rem_core::RemError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Stable error code (matches `RemError::code`).
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Whether the caller can fix the request and retry.
    pub recoverable: bool,
    /// Login provider hint for authentication failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_hint: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recoverable: false,
            provider_hint: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            recoverable: true,
            ..Self::new("validation_error", message)
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            recoverable: true,
            ..Self::new("not_found", message)
        }
    }

    pub fn unauthorized(message: impl Into<String>, provider_hint: Option<String>) -> Self {
        Self {
            provider_hint,
            ..Self::new("auth_error", message)
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("query_execution_error", message)
    }

    /// HTTP status for this error's code.
    pub fn status_code(&self) -> StatusCode {
        match self.code.as_str() {
            "validation_error" | "field_not_found" | "embedding_field_not_found"
            | "content_field_not_found" => StatusCode::BAD_REQUEST,
            "not_found" => StatusCode::NOT_FOUND,
            "conflict" => StatusCode::CONFLICT,
            "auth_error" => StatusCode::UNAUTHORIZED,
            "provider_error" => StatusCode::BAD_GATEWAY,
            "agent_error" | "query_execution_error" | "config_error" => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<RemError> for ApiError {
    fn from(err: RemError) -> Self {
        // Storage internals stay out of client-facing messages.
        let message = match &err {
            RemError::QueryExecution { .. } => {
                tracing::error!(error = %err, "storage failure");
                "Storage operation failed".to_string()
            }
            other => other.to_string(),
        };
        let provider_hint = match &err {
            RemError::Auth { provider_hint, .. } => provider_hint.clone(),
            _ => None,
        };
        Self {
            code: err.code().to_string(),
            message,
            recoverable: err.is_recoverable(),
            provider_hint,
        }
    }
}

impl From<rem_core::ValidationError> for ApiError {
    fn from(err: rem_core::ValidationError) -> Self {
        ApiError::from(RemError::from(err))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::bad_request(format!("Invalid JSON: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rem_core::ValidationError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::bad_request("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::unauthorized("x", None).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_rem_error_conversion_keeps_code() {
        let err: RemError = ValidationError::UnknownTable {
            table: "widgets".to_string(),
        }
        .into();
        let api: ApiError = err.into();
        assert_eq!(api.code, "validation_error");
        assert!(api.recoverable);
        assert_eq!(api.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_storage_details_not_leaked() {
        let err = RemError::query_execution("connection to 10.0.0.5 failed");
        let api: ApiError = err.into();
        assert!(!api.message.contains("10.0.0.5"));
    }

    #[test]
    fn test_auth_error_carries_provider_hint() {
        let err = RemError::Auth {
            message: "no session".to_string(),
            provider_hint: Some("google".to_string()),
        };
        let api: ApiError = err.into();
        assert_eq!(api.provider_hint.as_deref(), Some("google"));
        assert_eq!(api.status_code(), StatusCode::UNAUTHORIZED);
    }
}
