use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::cache::keys;
use crate::domain::{AllPeriods, Event, Period, PeriodView, StatsAll};
use crate::error::AppError;
use crate::recent;
use crate::upstream::types::{clamp_limit, Cursor, Order, PageFilter};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LiquidationsQuery {
    coin: Option<String>,
    user: Option<String>,
    start_time: Option<i64>,
    end_time: Option<i64>,
    amount_dollars: Option<f64>,
    limit: Option<u32>,
    cursor: Option<String>,
    order: Option<Order>,
}

#[derive(Debug, Serialize)]
pub struct PageResponse {
    pub data: Vec<Event>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub execution_time_ms: f64,
}

/// `GET /liquidations` — pass-through pagination against upstream (spec 6).
/// Filter combinations are unbounded, so this never touches the cache: the
/// cache is reserved for the composite/derived blobs and the `recent`
/// convenience path (spec 9, "cache-as-truth vs cache-as-accelerator").
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LiquidationsQuery>,
) -> Result<Json<PageResponse>, AppError> {
    let filter = PageFilter {
        coin: q.coin,
        user: q.user,
        start_time: q.start_time,
        end_time: q.end_time,
        amount_dollars: q.amount_dollars,
    };
    let limit = clamp_limit(q.limit.unwrap_or(100));
    let order = q.order.unwrap_or(Order::Desc);
    let cursor = q.cursor.map(Cursor);

    let page = state
        .upstream
        .fetch_page(&filter, cursor.as_ref(), limit, order)
        .await?;

    Ok(Json(PageResponse {
        data: page.events,
        next_cursor: page.next_cursor.map(|c| c.0),
        has_more: page.has_more,
        execution_time_ms: page.execution_time_ms,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    coin: Option<String>,
    user: Option<String>,
    hours: Option<u32>,
    limit: Option<u32>,
    cursor: Option<String>,
    order: Option<Order>,
}

/// `GET /liquidations/recent` (spec 6). Default `hours=2`. The cache only
/// covers the cursorless case (one blob per `hours`/`limit` pair); a request
/// carrying a `cursor` walks upstream directly instead, since a cursor
/// implies the caller wants a specific page beyond what the cached blob
/// represents.
pub async fn recent_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<RecentQuery>,
) -> Result<Json<PageResponse>, AppError> {
    let hours = q.hours.unwrap_or(2);
    let limit = clamp_limit(q.limit.unwrap_or(100));
    let order = q.order.unwrap_or(Order::Desc);

    let (mut events, next_cursor, has_more, execution_time_ms) = if let Some(cursor) = q.cursor {
        let page = state
            .upstream
            .fetch_recent_page(hours, Some(&Cursor(cursor)), limit, order)
            .await?;
        (
            page.events,
            page.next_cursor.map(|c| c.0),
            page.has_more,
            page.execution_time_ms,
        )
    } else {
        let events = recent::fetch_recent(
            &state.cache,
            &state.upstream,
            hours,
            limit,
            state.settings.recent_ttl,
        )
        .await?;
        (events, None, false, 0.0)
    };

    if let Some(coin) = &q.coin {
        events.retain(|e| e.coin.eq_ignore_ascii_case(coin));
    }
    if let Some(user) = &q.user {
        events.retain(|e| e.liquidated_user.eq_ignore_ascii_case(user));
    }

    Ok(Json(PageResponse {
        data: events,
        next_cursor,
        has_more,
        execution_time_ms,
    }))
}

/// `GET /liquidations/stats/all`. The composite keys are cache-as-truth
/// (spec 4.4): a miss means "refresh has not yet completed" and is surfaced
/// as `UpstreamUnavailable`, never papered over with a live rebuild.
pub async fn stats_all(State(state): State<Arc<AppState>>) -> Result<Json<StatsAll>, AppError> {
    state
        .cache
        .get::<StatsAll>(keys::STATS_ALL)
        .await?
        .map(Json)
        .ok_or(AppError::UpstreamUnavailable)
}

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    period: String,
}

pub async fn chart_data(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ChartQuery>,
) -> Result<Json<PeriodView>, AppError> {
    let period = Period::parse(&q.period).ok_or_else(|| AppError::ValidationFailed {
        field: "period".into(),
        message: "must be one of 2h, 4h, 8h, 12h, 24h".into(),
    })?;

    state
        .cache
        .get::<PeriodView>(&keys::chart(period))
        .await?
        .map(Json)
        .ok_or(AppError::UpstreamUnavailable)
}

pub async fn data(State(state): State<Arc<AppState>>) -> Result<Json<AllPeriods>, AppError> {
    state
        .cache
        .get::<AllPeriods>(keys::ALL_PERIODS)
        .await?
        .map(Json)
        .ok_or(AppError::UpstreamUnavailable)
}
