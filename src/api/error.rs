use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::actor::SendError;
use crate::domain::{Command, ControllerState};

/// Failures a handler reports to the HTTP client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown state: {0}")]
    InvalidState(String),

    #[error("Unable to change state from {from} to {requested}")]
    TransitionRefused {
        from: ControllerState,
        requested: Command,
    },

    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("internal failure: {0}")]
    InternalError(String),

    #[error("controller unavailable: {0}")]
    ServiceUnavailable(String),
}

/// JSON body of every error reply.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidState(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::TransitionRefused { .. } => StatusCode::NOT_ACCEPTABLE,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::InvalidState(_) => "InvalidState",
            ApiError::TransitionRefused { .. } => "TransitionRefused",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::InternalError(_) => "InternalError",
            ApiError::ServiceUnavailable(_) => "ServiceUnavailable",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();

        let message = match &self {
            ApiError::InternalError(_) => {
                tracing::error!(error = %self, "request failed");
                "internal failure".to_string()
            }
            ApiError::ServiceUnavailable(_) => {
                tracing::warn!(error = %self, "controller not running");
                "controller not running".to_string()
            }
            _ => {
                tracing::debug!(error = %self, "request rejected");
                self.to_string()
            }
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message,
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<SendError> for ApiError {
    fn from(error: SendError) -> Self {
        ApiError::ServiceUnavailable(error.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::InternalError(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::InvalidState("solar".to_string()).status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            ApiError::TransitionRefused {
                from: ControllerState::Halt,
                requested: Command::Force
            }
            .status_code(),
            StatusCode::NOT_ACCEPTABLE
        );
        assert_eq!(
            ApiError::from(SendError::ActorStopped("controller")).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_display() {
        let error = ApiError::TransitionRefused {
            from: ControllerState::Halt,
            requested: Command::Force,
        };
        assert_eq!(error.to_string(), "Unable to change state from halt to force");
        assert_eq!(error.error_type(), "TransitionRefused");
    }
}
