pub mod admin;
pub mod auth;
pub mod bootstrap;
pub mod cases;
pub mod feedback;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::time::Duration;

use crate::AppState;

const DB_PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Liveness probe: the process is up.
pub async fn health_live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok", "probe": "live"})))
}

/// Readiness probe: 200 only when the database answers a ping within the
/// timeout.
pub async fn health_ready(State(state): State<AppState>) -> impl IntoResponse {
    match tokio::time::timeout(DB_PING_TIMEOUT, sqlx::query("SELECT 1").execute(&state.db)).await {
        Ok(Ok(_)) => (
            StatusCode::OK,
            Json(json!({"status": "ok", "probe": "ready", "db": "reachable"})),
        ),
        Ok(Err(err)) => {
            tracing::error!(error = %err, "health_ready: db unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "error", "probe": "ready", "db": "unreachable"})),
            )
        }
        Err(_) => {
            tracing::error!("health_ready: db ping timed out");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "error", "probe": "ready", "db": "timeout"})),
            )
        }
    }
}

pub async fn version() -> impl IntoResponse {
    Json(json!({
        "api_version": env!("CARGO_PKG_VERSION"),
        "engine_version": "deterministic-v1",
    }))
}
