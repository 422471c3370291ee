//! Component B: the refresh loop (spec 4.2). The single writer — the only
//! task allowed to call the upstream client — that drains the rolling
//! window, detects the new-events delta, rebuilds every derived view in one
//! pass, and hands the delta to the broadcast bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::BroadcastMessage;
use crate::cache::keys;
use crate::cache::SnapshotCache;
use crate::config::Settings;
use crate::domain::{Event, Period};
use crate::error::AppError;
use crate::upstream::types::{Cursor, Order};
use crate::upstream::UpstreamClient;
use crate::views_builder;

/// `{Idle, Refreshing}` with a coalesce guard (spec 4.2, 5 "coalescing"). A
/// plain `AtomicBool` is enough: the only concurrent access is "is a pass
/// already running" from the single timer task, and "did a pass complete"
/// from readers of `/healthz`.
pub struct RefreshLoop {
    cache: SnapshotCache,
    upstream: Arc<UpstreamClient>,
    settings: Settings,
    refreshing: AtomicBool,
    last_success_ms: parking_lot::Mutex<Option<i64>>,
}

impl RefreshLoop {
    pub fn new(cache: SnapshotCache, upstream: Arc<UpstreamClient>, settings: Settings) -> Self {
        Self {
            cache,
            upstream,
            settings,
            refreshing: AtomicBool::new(false),
            last_success_ms: parking_lot::Mutex::new(None),
        }
    }

    pub fn last_success_age_ms(&self, now_ms: i64) -> Option<i64> {
        self.last_success_ms.lock().map(|t| now_ms - t)
    }

    /// Runs forever on the configured cadence: an initial 5s delay, then the
    /// steady-state interval (spec 4.2 step 6). Exits only on shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
            _ = shutdown.recv() => return,
        }

        loop {
            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.settings.refresh_interval) => {}
                _ = shutdown.recv() => {
                    tracing::info!("refresh loop shutting down");
                    return;
                }
            }
        }
    }

    async fn tick(&self) {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("refresh tick skipped: previous pass still running");
            return;
        }

        let result = self.pass().await;
        self.refreshing.store(false, Ordering::Release);

        match result {
            Ok(Some(published)) => {
                tracing::debug!(
                    events = published,
                    "refresh pass completed with new events"
                );
            }
            Ok(None) => tracing::debug!("refresh pass completed, no new events"),
            Err(e) => tracing::warn!(error = ?e, "refresh pass failed, state unchanged"),
        }
    }

    /// The pass algorithm (spec 4.2). Returns `Ok(Some(n))` with the number
    /// of newly broadcast events, `Ok(None)` when nothing new was observed,
    /// or `Err` when the *entire* pass failed and nothing was written.
    async fn pass(&self) -> Result<Option<usize>, AppError> {
        let last_observed_id: i64 = self
            .cache
            .get(keys::LAST_OBSERVED_ID)
            .await
            .unwrap_or(None)
            .unwrap_or(0);

        let drain = self.drain_window().await;
        let (window, partial) = match drain {
            Ok(w) => (w, false),
            Err((w, _)) if !w.is_empty() => (w, true),
            Err((_, e)) => return Err(e),
        };

        if partial {
            tracing::warn!(
                events = window.len(),
                "refresh pass paginated partially; proceeding with partial window"
            );
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let all_periods = views_builder::build(&window, now_ms);

        // A transient cache failure on any one of these keys must not throw
        // away the window `W` we just spent the upstream rate budget fetching
        // (spec 7, TransientCacheError: "continue without caching (log)") —
        // the delta computation, broadcast publish, and marker advance below
        // must still run even if every write here fails.
        if let Err(e) = self
            .cache
            .set(keys::ALL_PERIODS, &all_periods, self.settings.derived_ttl)
            .await
        {
            tracing::warn!(error = ?e, key = keys::ALL_PERIODS, "failed to cache derived view");
        }
        if let Err(e) = self
            .cache
            .set(
                keys::STATS_ALL,
                &all_periods.stats_only(),
                self.settings.derived_ttl,
            )
            .await
        {
            tracing::warn!(error = ?e, key = keys::STATS_ALL, "failed to cache derived view");
        }
        for period in Period::ALL {
            if let Some(view) = all_periods.get(period) {
                let key = keys::chart(period);
                if let Err(e) = self.cache.set(&key, view, self.settings.derived_ttl).await {
                    tracing::warn!(error = ?e, key, "failed to cache derived view");
                }
            }
        }

        let mut delta: Vec<Event> = window
            .iter()
            .filter(|e| e.tid > last_observed_id)
            .cloned()
            .collect();
        delta.sort_by_key(|e| e.tid);

        let published = if !delta.is_empty() {
            let message = BroadcastMessage {
                events: delta.clone(),
                timestamp_ms: now_ms,
            };
            // Publish failure must not block advancing the marker — a missed
            // broadcast is recoverable on the next pass, a stuck marker is not.
            if let Err(e) = self.cache.publish(keys::BROADCAST_CHANNEL, &message).await {
                tracing::warn!(error = ?e, "failed to publish broadcast message");
            }
            let max_tid = window.iter().map(|e| e.tid).max().unwrap_or(last_observed_id);
            // I2: never decreasing, even for a partial window (spec 4.2 step 7).
            let marker = max_tid.max(last_observed_id);
            self.cache.set_persistent(keys::LAST_OBSERVED_ID, &marker).await?;
            Some(delta.len())
        } else {
            None
        };

        *self.last_success_ms.lock() = Some(now_ms);
        Ok(published)
    }

    /// Drains the 24h rolling window via `fetchRecentPage`, paginating with
    /// `nextCursor` up to `P_max` pages with an inter-page delay (spec 4.2
    /// step 1). On a mid-pagination failure, returns the partial window
    /// alongside the error rather than discarding everything already fetched.
    async fn drain_window(&self) -> Result<Vec<Event>, (Vec<Event>, AppError)> {
        let mut window = Vec::new();
        let mut cursor: Option<Cursor> = None;
        let mut pages = 0u32;
        let mut dropped = 0u32;

        loop {
            let page = match self
                .upstream
                .fetch_recent_page(24, cursor.as_ref(), 1000, Order::Desc)
                .await
            {
                Ok(p) => p,
                Err(e) => return Err((window, e)),
            };

            dropped += page.dropped;
            window.extend(page.events);
            pages += 1;

            if !page.has_more || pages >= self.settings.refresh_max_pages {
                break;
            }
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
            tokio::time::sleep(self.settings.refresh_inter_page_delay).await;
        }

        if dropped > 0 {
            tracing::warn!(dropped, "refresh pass dropped malformed upstream events");
        }

        // I4: dedupe by tid only, keeping the first occurrence seen.
        let mut seen = std::collections::HashSet::new();
        window.retain(|e| seen.insert(e.tid));

        Ok(window)
    }
}
