use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use shared::jwt::{JwtConfig, JwtError};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{
    metrics_handler, metrics_middleware, rate_limit_middleware, require_user_auth,
    security_headers_middleware, trace_id, RateLimiterState,
};
use crate::routes::{exports, health};
use crate::services::ExportService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub exports: Arc<ExportService>,
    /// Present when a Postgres backend is configured.
    pub pool: Option<PgPool>,
    pub jwt: Arc<JwtConfig>,
    pub rate_limiter: Option<Arc<RateLimiterState>>,
}

impl AppState {
    pub fn new(
        config: Config,
        exports: Arc<ExportService>,
        pool: Option<PgPool>,
    ) -> Result<Self, JwtError> {
        let jwt = JwtConfig::new(
            &config.jwt.private_key,
            &config.jwt.public_key,
            config.jwt.access_token_expiry_secs,
            config.jwt.leeway_secs,
        )?;

        // None when rate_limit_per_minute is 0
        let rate_limiter =
            RateLimiterState::new(config.security.rate_limit_per_minute).map(Arc::new);

        Ok(Self {
            config: Arc::new(config),
            exports,
            pool,
            jwt: Arc::new(jwt),
            rate_limiter,
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    let config = state.config.clone();

    // Build CORS layer based on configuration
    let cors = if config.security.cors_origins.is_empty() {
        // Default: allow any origin (for development)
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        use tower_http::cors::AllowOrigin;
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Export routes that act on behalf of the JWT user.
    // Middleware order: auth runs first, then rate limiting (which needs the user id)
    let user_routes = Router::new()
        .route("/api/v1/exports", post(exports::submit_export))
        .route("/api/v1/exports/stream", get(exports::stream_export))
        .route("/api/v1/exports/metrics", get(exports::list_performance))
        .route(
            "/api/v1/exports/metrics/summary",
            get(exports::performance_summary),
        )
        .route("/api/v1/exports/:id", get(exports::get_export))
        .route("/api/v1/exports/:id/token", post(exports::refresh_token))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_user_auth,
        ));

    // The download token is the credential here, so no JWT
    let download_routes = Router::new().route(
        "/api/v1/exports/:id/download",
        get(exports::download_export),
    );

    let export_routes = Router::new()
        .merge(user_routes)
        .merge(download_routes)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            exports::require_exports_enabled,
        ));

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(export_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
