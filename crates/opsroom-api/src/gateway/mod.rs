//! Realtime fan-out gateway.
//!
//! `GET /ws?token=<bearer>` authenticates the viewer, reserves a connection
//! slot and upgrades. Each open socket is driven by [`connection::run`].

pub mod connection;
pub mod dedup;
pub mod registry;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use serde::Deserialize;
use tracing::warn;

use opsroom_core::logging;
use opsroom_core::Error;

use crate::error::GatewayRejection;
use crate::AppState;

pub use dedup::DedupCache;
pub use registry::{ConnectionInfo, ConnectionRegistry, SlotGuard};

/// Query string of the upgrade request.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Authenticate, reserve a slot, then upgrade.
///
/// Nothing is registered when the request is refused.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Result<Response, GatewayRejection> {
    let token = params
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| GatewayRejection::Unauthorized("Missing token".to_string()))?;

    let identity = state
        .identity
        .authenticate(token)
        .await
        .map_err(|e| match e {
            Error::UpstreamUnavailable(msg) => {
                warn!(
                    subsystem = logging::GATEWAY,
                    error_kind = "UpstreamUnavailable",
                    error = %msg,
                    "Identity service unavailable; refusing connection"
                );
                GatewayRejection::Unauthorized("Authentication unavailable".to_string())
            }
            other => GatewayRejection::Unauthorized(other.to_string()),
        })?;

    let slot = state.registry.try_reserve().ok_or_else(|| {
        warn!(
            subsystem = logging::GATEWAY,
            error_kind = "ConnectionCapacityExceeded",
            user_id = %identity.user_id,
            max_connections = state.registry.max_connections(),
            "Connection refused at capacity"
        );
        GatewayRejection::CapacityExceeded
    })?;

    let hub = state.hub.clone();
    let config = state.gateway.clone();
    Ok(ws.on_upgrade(move |socket| connection::run(socket, identity, hub, config, slot)))
}
