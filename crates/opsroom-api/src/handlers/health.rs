use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "active_connections": state.registry.active_connections(),
    }))
}
