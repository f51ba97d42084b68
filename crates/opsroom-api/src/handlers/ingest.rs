//! `POST /operations/log`.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use opsroom_core::defaults::SIGNATURE_HEADER;

use crate::services::IngestError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub success: bool,
    pub event_id: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

/// Verify, store and apply one signed envelope.
///
/// The body is read raw so the signature check sees exactly what was sent.
pub async fn ingest_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestResponse>, IngestError> {
    let header_signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let receipt = state.ingestor.ingest(&body, header_signature).await?;
    Ok(Json(IngestResponse {
        success: true,
        event_id: receipt.event_id,
        duplicate: receipt.duplicate,
    }))
}

/// Any other method on the ingestion path.
pub async fn method_not_allowed() -> Response {
    let mut response = (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(serde_json::json!({
            "success": false,
            "error": "Method not allowed",
        })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static("POST"));
    response
}
