//! Scan failures as structured JSON error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::pipeline::orchestrator::ScanError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
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
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Image could not be decoded: {0}")]
    DecodeFailure(String),
    #[error("Request body is empty")]
    EmptyBody,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::InvalidImage(detail) => {
                (StatusCode::BAD_REQUEST, "INVALID_IMAGE", detail.clone())
            }
            ApiError::DecodeFailure(detail) => (
                StatusCode::BAD_REQUEST,
                "DECODE_FAILURE",
                detail.clone(),
            ),
            ApiError::EmptyBody => (
                StatusCode::BAD_REQUEST,
                "EMPTY_BODY",
                "No image data received".to_string(),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "Scan internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            success: false,
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<ScanError> for ApiError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::InvalidImage(msg) => ApiError::InvalidImage(msg),
            ScanError::DecodeFailure(msg) => ApiError::DecodeFailure(msg),
            ScanError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}
