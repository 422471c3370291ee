use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    extract::{ConnectInfo, Query, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    Json,
};
use futures_util::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::{Filter, Frame, SessionsStats};
use crate::error::AppError;
use crate::recent;
use crate::registry::SubscriberRegistry;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    coin: Option<String>,
    min_amount_dollars: Option<f64>,
    user: Option<String>,
    last_event_id: Option<i64>,
}

/// `GET /liquidations/stream` (spec 6, 4.6). Honors `last_event_id` in the
/// query string and, per SSE convention, the `Last-Event-ID` request header
/// — the query parameter wins if both are present.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: axum::http::HeaderMap,
    Query(q): Query<StreamQuery>,
) -> Result<(axum::http::HeaderMap, Sse<SessionStream>), AppError> {
    let filter = Filter {
        coin: q.coin,
        min_notional: q.min_amount_dollars,
        user: q.user,
    };

    let resume_from_id = q.last_event_id.or_else(|| {
        headers
            .get("Last-Event-ID")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    });

    let (id, rx) = state.registry.attach(addr.ip(), filter, resume_from_id)?;

    if let Some(from_id) = resume_from_id {
        match recent::fetch_recent(
            &state.cache,
            &state.upstream,
            1,
            state.settings.sse_missed_data_limit as u32,
            state.settings.recent_ttl,
        )
        .await
        {
            Ok(candidates) => state.registry.replay_missed(id, &candidates, from_id),
            Err(e) => {
                tracing::warn!(error = ?e, session_id = %id, "resume replay: recent window unavailable");
                // No historical candidates to replay, but the session must
                // still leave its `replaying` state — otherwise it would
                // buffer live events forever instead of receiving them
                // (registry::replay_missed is what clears the flag).
                state.registry.replay_missed(id, &[], from_id);
            }
        }
    }

    let stream = SessionStream {
        id,
        registry: state.registry.clone(),
        rx,
    };

    // Response headers (spec 6, "stream wire format"): flushed immediately on
    // accept so intermediaries don't buffer the stream. `Content-Type` is set
    // by `Sse` itself; the rest are this spec's explicit requirements.
    let mut response_headers = axum::http::HeaderMap::new();
    response_headers.insert("Cache-Control", axum::http::HeaderValue::from_static("no-cache"));
    response_headers.insert("Connection", axum::http::HeaderValue::from_static("keep-alive"));
    response_headers.insert("X-Accel-Buffering", axum::http::HeaderValue::from_static("no"));

    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.settings.sse_heartbeat_interval)
            .text("keep-alive"),
    );

    Ok((response_headers, sse))
}

pub async fn stream_stats(State(state): State<Arc<AppState>>) -> Json<SessionsStats> {
    Json(state.registry.stats())
}

/// Bridges a session's frame channel into an SSE byte stream, detaching the
/// session from the registry the moment the stream is dropped — covers both
/// client disconnect and any other early termination (spec 4.6, "destroyed
/// on ... client close").
pub struct SessionStream {
    id: Uuid,
    registry: Arc<SubscriberRegistry>,
    rx: mpsc::Receiver<Frame>,
}

impl Stream for SessionStream {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame_to_sse(frame)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.registry.detach(self.id);
    }
}

fn frame_to_sse(frame: Frame) -> SseEvent {
    let mut event = SseEvent::default().event(frame.event);
    if let Some(id) = frame.id {
        event = event.id(id.to_string());
    }
    match event.json_data(frame.data) {
        Ok(event) => event,
        Err(_) => SseEvent::default().event("error").data("{}"),
    }
}
