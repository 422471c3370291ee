//! Shared "recent" pass-through logic: cache as accelerator, with a single
//! upstream fallback on miss (spec 9, "cache-as-truth vs cache-as-accelerator").
//! Used by both the `/liquidations/recent` HTTP handler and the subscriber
//! registry's resume-replay procedure.

use std::sync::Arc;

use crate::cache::keys;
use crate::cache::SnapshotCache;
use crate::domain::Event;
use crate::error::AppError;
use crate::upstream::types::Order;
use crate::upstream::UpstreamClient;

pub async fn fetch_recent(
    cache: &SnapshotCache,
    upstream: &Arc<UpstreamClient>,
    hours: u32,
    limit: u32,
    recent_ttl: std::time::Duration,
) -> Result<Vec<Event>, AppError> {
    let key = keys::recent(hours, limit);

    if let Some(events) = cache.get::<Vec<Event>>(&key).await.unwrap_or(None) {
        return Ok(events);
    }

    let page = upstream
        .fetch_recent_page(hours, None, limit, Order::Desc)
        .await?;

    // Best-effort cache population; a failure here must not fail the read.
    let _ = cache.set(&key, &page.events, recent_ttl).await;

    Ok(page.events)
}
