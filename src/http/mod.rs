pub mod health;
pub mod liquidations;
pub mod stream;

use std::sync::Arc;

use axum::middleware as axum_mw;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::middleware::timing;
use crate::AppState;

/// Builds the full Axum `Router` (spec 6, "HTTP endpoints"). Route nesting
/// and middleware ordering follow the same shape as the rest of the
/// ecosystem: state injected once at the leaves, CORS applied globally.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/liquidations", get(liquidations::list))
        .route("/liquidations/recent", get(liquidations::recent_handler))
        .route("/liquidations/stats/all", get(liquidations::stats_all))
        .route("/liquidations/chart-data", get(liquidations::chart_data))
        .route("/liquidations/data", get(liquidations::data))
        .route("/liquidations/stream", get(stream::stream))
        .route("/liquidations/stream/stats", get(stream::stream_stats))
        .route("/healthz", get(health::healthz))
        .with_state(state)
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(CorsLayer::permissive())
}
