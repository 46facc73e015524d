//! Route configuration.

use crate::auth::{require_admin, trace_middleware};
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        // Health check (unauthenticated for load balancers/k8s probes)
        .route("/v1/health", get(handlers::health_check))
        .route("/robots.txt", get(handlers::robots_txt))
        .route("/api/v1/download", get(handlers::download))
        .route("/api/v1/revision", get(handlers::get_revision))
        .route("/api/v1/package", get(handlers::get_package))
        .route("/api/v1/stats", get(handlers::get_stats))
        .route("/badge/{*import_path}", get(handlers::badge));

    let admin_routes = Router::new()
        .route("/api/admin/package/block", post(handlers::block_package))
        .route(
            "/api/admin/package/revision/large",
            get(handlers::list_large_revisions),
        )
        .route(
            "/api/admin/block/entries",
            get(handlers::list_block_entries).post(handlers::create_block_entry),
        )
        .route(
            "/api/admin/block/entries/{entry_id}",
            delete(handlers::delete_block_entry),
        )
        .route(
            "/api/admin/block/rules",
            get(handlers::list_block_rules).post(handlers::create_block_rule),
        )
        .route(
            "/api/admin/block/rules/{rule_id}",
            delete(handlers::delete_block_rule),
        )
        .route(
            "/api/admin/block/rules/{rule_id}/run",
            post(handlers::run_block_rule),
        )
        .route("/api/admin/tiering/upload", post(handlers::trigger_upload))
        .route("/api/admin/tiering/expire", post(handlers::trigger_expire))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let mut router = Router::new().merge(public_routes).merge(admin_routes);

    // When enabled, this endpoint must be network-restricted to the
    // Prometheus scrapers.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Layers run outermost first: TraceLayer, then the trace ID span.
    router
        .layer(middleware::from_fn(trace_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
