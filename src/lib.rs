pub mod audit;
pub mod cli;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod tenant;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::core::scoring::ScoringEngine;
use crate::middleware::rate_limit::TenantRateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Arc<Config>,
    pub rate_limiter: Arc<TenantRateLimiter>,
    pub scoring: Arc<dyn ScoringEngine>,
}

impl AppState {
    pub fn new(db: sqlx::PgPool, config: Config, scoring: Arc<dyn ScoringEngine>) -> Self {
        let rate_limiter = Arc::new(TenantRateLimiter::new(
            config.rate_limit_per_minute,
            std::time::Duration::from_secs(60),
        ));
        AppState {
            db,
            config: Arc::new(config),
            rate_limiter,
            scoring,
        }
    }
}

/// Middleware order is fixed: correlation id (outermost), then the rate gate,
/// then tenant-bound handlers.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(handlers::health_live))
        .route("/health/ready", get(handlers::health_ready))
        .route("/version", get(handlers::version))
        .route("/bootstrap", post(handlers::bootstrap::bootstrap_tenant))
        .route("/auth/api-keys/rotate", post(handlers::auth::rotate_api_key))
        .route("/admin/usage", get(handlers::admin::usage))
        .route("/admin/api-keys", get(handlers::admin::list_api_keys))
        .route(
            "/admin/api-keys/revoke/:key_id",
            post(handlers::admin::revoke_api_key),
        )
        .route("/cases", post(handlers::cases::create_case))
        .route("/cases/:case_id", get(handlers::cases::get_case))
        .route("/cases/:case_id/finalize", post(handlers::cases::finalize_case))
        .route(
            "/cases/:case_id/verify-replay",
            post(handlers::cases::verify_replay),
        )
        .route("/mcare/feedback", post(handlers::feedback::post_feedback))
        .route(
            "/mcare/feedback/summary",
            get(handlers::feedback::feedback_summary),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit,
        ))
        .layer(axum_middleware::from_fn(
            middleware::request_id::request_context,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
