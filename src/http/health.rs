use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::cache::keys;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub cache_reachable: bool,
    pub last_refresh_age_ms: Option<i64>,
}

/// Liveness/readiness probe (spec 6): cache reachability plus the age of the
/// last successful refresh pass. Not itself part of the business spec — the
/// ambient-stack addition every produced HTTP surface needs for operators.
pub async fn healthz(State(state): State<Arc<AppState>>) -> (axum::http::StatusCode, Json<HealthBody>) {
    let cache_reachable = state
        .cache
        .get::<i64>(keys::LAST_OBSERVED_ID)
        .await
        .is_ok();

    let now_ms = chrono::Utc::now().timestamp_millis();
    let last_refresh_age_ms = state.refresh.last_success_age_ms(now_ms);

    let status = if cache_reachable {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthBody {
            cache_reachable,
            last_refresh_age_ms,
        }),
    )
}
