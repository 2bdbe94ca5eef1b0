//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::intake::IntakeError;
use crate::triage::OrchestrationError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Upstream storage error: {0}")]
    Storage(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone()),
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone())
            }
            ApiError::PayloadTooLarge(detail) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                detail.clone(),
            ),
            ApiError::Storage(detail) => {
                tracing::error!(detail, "API storage error");
                (
                    StatusCode::BAD_GATEWAY,
                    "STORAGE_UNAVAILABLE",
                    "File storage is unavailable".to_string(),
                )
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::EmptyBatch | IntakeError::EmptyFile(_) => {
                ApiError::BadRequest(err.to_string())
            }
            IntakeError::Upload { .. } => ApiError::Storage(err.to_string()),
            IntakeError::Store(_) | IntakeError::Task(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<OrchestrationError> for ApiError {
    fn from(err: OrchestrationError) -> Self {
        match err {
            OrchestrationError::NotFound(id) => {
                ApiError::NotFound(format!("Triage request {id} not found"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn not_found_is_404_with_code() {
        let (status, json) = body_json(ApiError::NotFound("Triage request x not found".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["error"]["message"], "Triage request x not found");
    }

    #[tokio::test]
    async fn internal_hides_detail() {
        let (status, json) = body_json(ApiError::Internal("db path /secret".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn payload_too_large_is_413() {
        let (status, json) = body_json(ApiError::PayloadTooLarge("big.pdf".into())).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json["error"]["code"], "PAYLOAD_TOO_LARGE");
    }

    #[test]
    fn intake_validation_maps_to_bad_request() {
        assert!(matches!(
            ApiError::from(IntakeError::EmptyBatch),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from(IntakeError::EmptyFile("a.pdf".into())),
            ApiError::BadRequest(_)
        ));
    }
}
