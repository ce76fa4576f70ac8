//! Error types for the compliance API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use compliance_engine::EngineError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: &'static str,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::Engine(err) => match err {
                EngineError::BudgetExhausted(_) => {
                    (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED")
                }
                EngineError::InvalidInput(_) | EngineError::Validation(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_REQUEST")
                }
                EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                EngineError::NotPending { .. } => (StatusCode::CONFLICT, "NOT_PENDING"),
                EngineError::DuplicateRule(_) => (StatusCode::CONFLICT, "DUPLICATE_RULE"),
                EngineError::MissingCredential => {
                    (StatusCode::SERVICE_UNAVAILABLE, "CLASSIFIER_NOT_CONFIGURED")
                }
                EngineError::Remote(_) => (StatusCode::BAD_GATEWAY, "CLASSIFIER_ERROR"),
                EngineError::Store(_) | EngineError::Payload(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let error = if status.is_server_error() {
            tracing::error!(code, "Request failed: {}", self);
            match status {
                StatusCode::INTERNAL_SERVER_ERROR => "Internal error".to_string(),
                _ => self.to_string(),
            }
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            success: false,
            error,
            code,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_engine::{Budget, RemediationState};

    #[test]
    fn test_engine_errors_map_to_statuses() {
        let cases = [
            (
                ApiError::from(EngineError::BudgetExhausted(Budget::RuleRead)),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                ApiError::from(EngineError::NotFound {
                    entity: "action item",
                    id: "x".to_string(),
                }),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(EngineError::NotPending {
                    id: "x".to_string(),
                    state: RemediationState::Completed,
                }),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(EngineError::MissingCredential),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::InvalidRequest("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
