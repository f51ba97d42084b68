//! Bearer-token authentication for viewer routes.

use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use opsroom_core::logging;
use opsroom_core::UserIdentity;

use crate::error::ApiError;
use crate::AppState;

/// Extractor that requires a valid viewer token.
///
/// Usage:
/// ```ignore
/// async fn handler(RequireViewer(identity): RequireViewer) -> impl IntoResponse {
///     identity.user_id
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireViewer(pub UserIdentity);

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for RequireViewer {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;
        let identity = state.identity.authenticate(token).await.map_err(|e| {
            tracing::warn!(subsystem = logging::AUTH, error = %e, "Viewer authentication failed");
            ApiError::from(e)
        })?;
        Ok(RequireViewer(identity))
    }
}
