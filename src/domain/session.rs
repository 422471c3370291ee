use std::net::IpAddr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Event;

/// Per-subscriber filter. All provided fields are ANDed (spec 4.6).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Filter {
    pub coin: Option<String>,
    pub min_notional: Option<f64>,
    pub user: Option<String>,
}

impl Filter {
    /// Pure projection (I5): whether `event` passes this filter, independent
    /// of any session's `lastEventId` bookkeeping.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(coin) = &self.coin {
            if !event.coin.eq_ignore_ascii_case(coin) {
                return false;
            }
        }
        if let Some(min) = self.min_notional {
            if event.notional < min {
                return false;
            }
        }
        if let Some(user) = &self.user {
            if !event.liquidated_user.eq_ignore_ascii_case(user) {
                return false;
            }
        }
        true
    }
}

/// A single framed record sent down an attached stream. `id` becomes the SSE
/// `id:` field (the event's `tid`) when present.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: Option<i64>,
    pub event: &'static str,
    pub data: serde_json::Value,
}

impl Frame {
    pub fn connected(session_id: Uuid) -> Self {
        Frame {
            id: None,
            event: "connected",
            data: serde_json::json!({ "sessionId": session_id }),
        }
    }

    pub fn liquidation(event: &Event) -> Self {
        Frame {
            id: Some(event.tid),
            event: "liquidation",
            data: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn heartbeat() -> Self {
        Frame {
            id: None,
            event: "heartbeat",
            data: serde_json::json!({}),
        }
    }

    pub fn truncated(missed: usize, limit: usize) -> Self {
        Frame {
            id: None,
            event: "truncated",
            data: serde_json::json!({ "missed": missed, "limit": limit }),
        }
    }

    pub fn error(message: &str) -> Self {
        Frame {
            id: None,
            event: "error",
            data: serde_json::json!({ "message": message }),
        }
    }
}

/// An attached streaming session. Created on attach, mutated only by the
/// owning registry, destroyed on disconnect or admission revocation.
pub struct Session {
    pub id: Uuid,
    pub filter: Filter,
    pub last_event_id: i64,
    pub ip: IpAddr,
    pub connected_at: Instant,
    pub sender: tokio::sync::mpsc::Sender<Frame>,
    /// Set while a resume replay is pending for this session (attach was
    /// given a resume point). While true, `broadcast_local` buffers matching
    /// live events into `pending_live` instead of sending them, so a live
    /// event can never jump ahead of the still-in-flight historical replay
    /// (spec 5 ordering guarantees, P3, S4). Cleared once the replay flushes.
    pub replaying: bool,
    pub pending_live: Vec<Event>,
}

impl Session {
    /// Whether this session should receive `event` right now (I5 + duplicate
    /// suppression from 4.5): the filter must match AND the event must be
    /// newer than anything already delivered.
    pub fn wants(&self, event: &Event) -> bool {
        event.tid > self.last_event_id && self.filter.matches(event)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsStats {
    pub total_connections: usize,
    pub unique_ips: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;
    use chrono::Utc;

    fn event(tid: i64, coin: &str, notional: f64, user: &str) -> Event {
        Event {
            tid,
            time: Utc::now(),
            time_ms: 0,
            coin: coin.into(),
            dir: Direction::Long,
            notional,
            mark_price: 1.0,
            liquidated_user: user.into(),
            liquidators: vec![],
        }
    }

    #[test]
    fn filter_is_case_insensitive_and_anded() {
        let f = Filter {
            coin: Some("btc".into()),
            min_notional: Some(100.0),
            user: Some("0xABC".into()),
        };
        assert!(f.matches(&event(1, "BTC", 150.0, "0xabc")));
        assert!(!f.matches(&event(1, "ETH", 150.0, "0xabc")));
        assert!(!f.matches(&event(1, "BTC", 50.0, "0xabc")));
        assert!(!f.matches(&event(1, "BTC", 150.0, "0xdef")));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::default().matches(&event(1, "XRP", 0.0, "u")));
    }
}
