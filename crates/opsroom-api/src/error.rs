//! HTTP error responses.
//!
//! Every failure body has the shape `{"success": false, "error": "..."}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use opsroom_core::logging;

use crate::services::IngestError;

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    let body = Json(serde_json::json!({
        "success": false,
        "error": message.into(),
    }));
    (status, body).into_response()
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::MalformedRequest(msg) => failure(StatusCode::BAD_REQUEST, msg),
            IngestError::MissingSignature => {
                failure(StatusCode::UNAUTHORIZED, "Missing signature")
            }
            IngestError::InvalidSignature => {
                failure(StatusCode::UNAUTHORIZED, "Invalid signature")
            }
            IngestError::InvalidEventStructure(msg) => failure(
                StatusCode::BAD_REQUEST,
                format!("Invalid event structure: {}", msg),
            ),
            IngestError::Store(err) => {
                tracing::error!(
                    subsystem = logging::INGEST,
                    error_kind = "UpstreamUnavailable",
                    error = %err,
                    "Failed to store event"
                );
                failure(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

/// Errors of the authenticated JSON routes.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    NotFound(String),
    BadRequest(String),
    Internal(opsroom_core::Error),
}

impl From<opsroom_core::Error> for ApiError {
    fn from(err: opsroom_core::Error) -> Self {
        match err {
            opsroom_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            opsroom_core::Error::SessionNotFound(id) => {
                ApiError::NotFound(format!("Session not found: {}", id))
            }
            opsroom_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            // identity service failures never grant access
            opsroom_core::Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            opsroom_core::Error::UpstreamUnavailable(msg) => ApiError::Unauthorized(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(msg) => failure(StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => failure(StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => failure(StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "Request failed");
                failure(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

/// Refusals issued before a WebSocket upgrade.
#[derive(Debug)]
pub enum GatewayRejection {
    Unauthorized(String),
    CapacityExceeded,
}

impl IntoResponse for GatewayRejection {
    fn into_response(self) -> Response {
        match self {
            GatewayRejection::Unauthorized(msg) => failure(StatusCode::UNAUTHORIZED, msg),
            GatewayRejection::CapacityExceeded => failure(
                StatusCode::SERVICE_UNAVAILABLE,
                "Connection capacity exceeded",
            ),
        }
    }
}
