//! Session roster and repair routes. All require a viewer token.

use axum::extract::{Path, State};
use axum::Json;

use opsroom_core::logging;
use opsroom_core::{AgentSession, Error, OperationEvent};

use crate::error::ApiError;
use crate::middleware::RequireViewer;
use crate::services::ReplayReport;
use crate::AppState;

/// Sessions that are not terminated, most recently active first.
pub async fn list_active_sessions(
    RequireViewer(_viewer): RequireViewer,
    State(state): State<AppState>,
) -> Result<Json<Vec<AgentSession>>, ApiError> {
    Ok(Json(state.sessions.list_active().await?))
}

pub async fn get_session(
    RequireViewer(_viewer): RequireViewer,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<AgentSession>, ApiError> {
    let session = state
        .sessions
        .get(&session_id)
        .await?
        .ok_or(Error::SessionNotFound(session_id))?;
    Ok(Json(session))
}

/// Raw events of a session, oldest first.
pub async fn list_session_events(
    RequireViewer(_viewer): RequireViewer,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<OperationEvent>>, ApiError> {
    Ok(Json(state.events.list_for_session(&session_id).await?))
}

/// Re-apply the side effects of every stored event of a session.
pub async fn replay_session(
    RequireViewer(viewer): RequireViewer,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ReplayReport>, ApiError> {
    let report = state.ingestor.replay_session(&session_id).await?;
    if report.events == 0 {
        return Err(Error::SessionNotFound(session_id).into());
    }
    tracing::debug!(
        subsystem = logging::INGEST,
        op = "replay",
        session_id = %report.session_id,
        user_id = %viewer.user_id,
        "Replay requested by viewer"
    );
    Ok(Json(report))
}
