//! Component E: the broadcast bus. Publishing is fire-and-forget from the
//! refresh loop via `SnapshotCache::publish` (spec 4.4/4.5); this module is
//! the subscribing side — every process instance subscribes independently
//! and fans new events out to its own locally-attached sessions (spec 9,
//! "pub/sub vs direct dispatch").

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::cache::keys::BROADCAST_CHANNEL;
use crate::domain::Event;
use crate::registry::SubscriberRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessage {
    /// Ascending by `tid` (spec 4.5 ordering guarantee).
    pub events: Vec<Event>,
    pub timestamp_ms: i64,
}

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Subscribes to the broadcast channel and forwards every message to the
/// registry's local fan-out, for the lifetime of the process (spec 9,
/// "pub/sub vs direct dispatch"). Every instance must stay subscribed for as
/// long as the process runs, so a connect failure or a stream that ends is
/// treated as transient: reconnect with exponential backoff rather than
/// permanently disabling live delivery.
pub async fn run(
    redis_url: String,
    registry: Arc<SubscriberRegistry>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match subscribe_and_forward(&redis_url, &registry, &mut shutdown, &mut backoff).await {
            Outcome::ShuttingDown => {
                tracing::info!("broadcast bus shutting down");
                return;
            }
            Outcome::Disconnected(reason) => {
                tracing::warn!(
                    error = %reason,
                    backoff_ms = backoff.as_millis() as u64,
                    "broadcast bus disconnected, reconnecting"
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.recv() => {
                tracing::info!("broadcast bus shutting down");
                return;
            }
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

enum Outcome {
    ShuttingDown,
    Disconnected(String),
}

/// One connect-subscribe-consume cycle. Returns when the connection drops,
/// fails to establish, or `shutdown` fires.
async fn subscribe_and_forward(
    redis_url: &str,
    registry: &Arc<SubscriberRegistry>,
    shutdown: &mut tokio::sync::broadcast::Receiver<()>,
    backoff: &mut Duration,
) -> Outcome {
    let client = match redis::Client::open(redis_url) {
        Ok(c) => c,
        Err(e) => return Outcome::Disconnected(format!("invalid Redis URL: {e}")),
    };

    let mut pubsub = match client.get_async_pubsub().await {
        Ok(p) => p,
        Err(e) => return Outcome::Disconnected(format!("failed to open pub/sub connection: {e}")),
    };

    if let Err(e) = pubsub.subscribe(BROADCAST_CHANNEL).await {
        return Outcome::Disconnected(format!("failed to subscribe: {e}"));
    }

    *backoff = INITIAL_BACKOFF;
    let mut stream = pubsub.on_message();
    tracing::info!(channel = BROADCAST_CHANNEL, "broadcast bus subscribed");

    loop {
        tokio::select! {
            _ = shutdown.recv() => return Outcome::ShuttingDown,
            maybe_msg = stream.next() => {
                let Some(msg) = maybe_msg else {
                    return Outcome::Disconnected("pub/sub stream ended".into());
                };
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "broadcast bus: non-UTF8 payload");
                        continue;
                    }
                };
                match serde_json::from_str::<BroadcastMessage>(&payload) {
                    Ok(message) => registry.broadcast_local(&message.events),
                    Err(e) => tracing::warn!(error = %e, "broadcast bus: malformed message"),
                }
            }
        }
    }
}
