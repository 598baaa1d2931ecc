use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::{
        predicate::{DefaultPredicate, NotForContentType, Predicate},
        CompressionLayer,
    },
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware, trace_id};
use crate::routes::{exports, health};
use crate::services::ExportService;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub exports: Arc<ExportService>,
}

pub fn create_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Archives are already deflated
    let compression = CompressionLayer::new().compress_when(
        DefaultPredicate::new().and(NotForContentType::new("application/zip")),
    );

    let export_routes = Router::new()
        .route(
            "/api/v1/exports",
            post(exports::submit_export).get(exports::list_exports),
        )
        .route("/api/v1/exports/validate", post(exports::validate_export))
        .route("/api/v1/exports/:job_id", get(exports::get_export))
        .route(
            "/api/v1/exports/:job_id/result",
            get(exports::get_export_result),
        )
        .route(
            "/api/v1/exports/:job_id/download",
            get(exports::download_export),
        )
        .route(
            "/api/v1/exports/:job_id/cancel",
            post(exports::cancel_export),
        )
        .layer(DefaultBodyLimit::max(config.server.max_body_size));

    // Public routes (no caller identity required)
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(export_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(compression)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
