//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::RepositoryError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga or lifecycle error.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    let status = match &err {
        SagaError::OrderNotOwned => StatusCode::FORBIDDEN,
        SagaError::InvalidDeliveryStatus(_) | SagaError::NoOrdersCreated => {
            StatusCode::BAD_REQUEST
        }
        SagaError::GoodOutOfStock
        | SagaError::NoWorkingAutomats
        | SagaError::NoAvailableCell
        | SagaError::OrderNotReturnable
        | SagaError::Repository(RepositoryError::Conflict { .. })
        | SagaError::Repository(RepositoryError::InsufficientStock { .. }) => StatusCode::CONFLICT,
        SagaError::Messaging(_) | SagaError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    (status, err.to_string())
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        if err.is_not_found() {
            return ApiError::NotFound(err.to_string());
        }
        match err {
            SagaError::Repository(RepositoryError::Unavailable(_))
            | SagaError::Serialization(_)
            | SagaError::PartialPickupFailure { .. } => ApiError::Internal(err.to_string()),
            err => ApiError::Saga(err),
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        SagaError::Repository(err).into()
    }
}
