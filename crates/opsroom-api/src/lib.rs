//! # opsroom-api
//!
//! HTTP surface of the Operations Room:
//!
//! - `POST /operations/log`: signed event ingestion
//! - `GET /ws?token=`: realtime fan-out gateway
//! - `GET /operations/sessions[...]`: roster reads and replay for viewers
//! - `GET /health`
//!
//! The binary in `main.rs` wires configuration, the store and tracing around
//! [`build_router`].

pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod services;
pub mod state;

pub use config::{GatewayConfig, IdentityConfig, RouterConfig, ServerConfig};
pub use error::{ApiError, GatewayRejection};
pub use identity::{HttpIdentityProvider, StaticIdentityProvider};
pub use state::AppState;

use axum::http::{header, HeaderName, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use opsroom_core::defaults::{INGEST_PATH, SIGNATURE_HEADER};

use crate::handlers::{health, ingest, sessions};
use crate::middleware::MakeRequestUuidV7;

/// Assemble every route and the shared middleware stack.
pub fn build_router(state: AppState, config: &RouterConfig) -> Router {
    let ingest_route = post(ingest::ingest_event)
        .fallback(ingest::method_not_allowed)
        .layer(RequestBodyLimitLayer::new(config.ingest_max_body_bytes));

    Router::new()
        .route("/health", get(health::health_check))
        .route(INGEST_PATH, ingest_route)
        .route("/ws", get(gateway::ws_handler))
        .route("/operations/sessions", get(sessions::list_active_sessions))
        .route("/operations/sessions/:session_id", get(sessions::get_session))
        .route(
            "/operations/sessions/:session_id/events",
            get(sessions::list_session_events),
        )
        .route(
            "/operations/sessions/:session_id/replay",
            post(sessions::replay_session),
        )
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(config.allowed_origins.clone()))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    HeaderName::from_static(SIGNATURE_HEADER),
                ])
                .allow_credentials(true)
                .max_age(std::time::Duration::from_secs(3600)),
        )
        .layer(CatchPanicLayer::new())
        .with_state(state)
}
