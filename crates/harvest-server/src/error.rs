use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use harvest_core::error::{AppError, ErrorCode};

use crate::dto::{ConflictResponse, ErrorResponse, FailureResponse};

/// Wrapper so we can implement `IntoResponse` for `AppError`.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Classified job failures keep their code on the wire.
        if let AppError::Transportable(e) = &self.0 {
            let status = match e.code {
                ErrorCode::ScrapeTimeout => StatusCode::REQUEST_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let body = FailureResponse {
                success: false,
                code: e.code.to_string(),
                error: e.message.clone(),
            };
            return (status, axum::Json(body)).into_response();
        }

        // Conflicts carry only the reason, as `{"error": ...}`.
        if let AppError::Conflict(reason) = &self.0 {
            let body = ConflictResponse {
                error: reason.clone(),
            };
            return (StatusCode::CONFLICT, axum::Json(body)).into_response();
        }

        let (status, error_type) = match &self.0 {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::NotConfigured(_) => (StatusCode::SERVICE_UNAVAILABLE, "not_configured"),
            AppError::DatabaseError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.0.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}
