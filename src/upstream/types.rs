use serde::{Deserialize, Serialize};

use crate::domain::event::RawEvent;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn as_query_str(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// Parameters for `fetchPage` — the historical, filterable endpoint.
#[derive(Debug, Clone, Default)]
pub struct PageFilter {
    pub coin: Option<String>,
    pub user: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub amount_dollars: Option<f64>,
}

/// Opaque keyset cursor. The spec mandates treating `"<time_ms>:<tid>"` as
/// opaque — it is only ever round-tripped, never parsed by this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor(pub String);

#[derive(Debug, Deserialize)]
struct RawPageResponse {
    data: Vec<RawEvent>,
    next_cursor: Option<String>,
    has_more: bool,
    execution_time_ms: f64,
}

/// Result of one paginated fetch. Malformed individual records are dropped
/// (not fatal to the page) and counted in `dropped`.
#[derive(Debug, Clone)]
pub struct Page {
    pub events: Vec<crate::domain::Event>,
    pub next_cursor: Option<Cursor>,
    pub has_more: bool,
    pub execution_time_ms: f64,
    pub dropped: u32,
}

impl Page {
    pub(crate) fn from_wire(body: &[u8]) -> Result<Self, AppError> {
        let raw: RawPageResponse = serde_json::from_slice(body).map_err(|_| {
            AppError::ValidationFailed {
                field: "response_body".into(),
                message: "upstream response was not valid JSON".into(),
            }
        })?;

        let mut events = Vec::with_capacity(raw.data.len());
        let mut dropped = 0u32;
        for raw_event in raw.data {
            match crate::domain::Event::try_from_raw(raw_event) {
                Ok(e) => events.push(e),
                Err(_) => dropped += 1,
            }
        }

        Ok(Page {
            events,
            next_cursor: raw.next_cursor.map(Cursor),
            has_more: raw.has_more,
            execution_time_ms: raw.execution_time_ms,
            dropped,
        })
    }
}

pub fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, 1000)
}

pub fn validate_hours(hours: u32) -> Result<u32, AppError> {
    if (1..=168).contains(&hours) {
        Ok(hours)
    } else {
        Err(AppError::ValidationFailed {
            field: "hours".into(),
            message: "must be between 1 and 168".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_limit_stays_within_bounds() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(5000), 1000);
        assert_eq!(clamp_limit(250), 250);
    }

    #[test]
    fn validate_hours_rejects_out_of_range() {
        assert!(validate_hours(0).is_err());
        assert!(validate_hours(169).is_err());
        assert!(validate_hours(1).is_ok());
        assert!(validate_hours(168).is_ok());
    }

    #[test]
    fn parses_page_response_and_drops_malformed_events() {
        let body = br#"{
            "data": [
                {"tid": 1, "time": "2026-01-01T00:00:00Z", "coin": "BTC", "dir": "long", "notional": 1.0, "mark_price": 1.0, "liquidated_user": "0x1", "liquidators": []},
                {"tid": 0, "time": "2026-01-01T00:00:00Z", "coin": "BTC", "dir": "long", "notional": 1.0, "mark_price": 1.0, "liquidated_user": "0x1", "liquidators": []}
            ],
            "next_cursor": "1767225600000:1",
            "has_more": false,
            "execution_time_ms": 12.5
        }"#;
        let page = Page::from_wire(body).unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.dropped, 1);
        assert_eq!(page.next_cursor, Some(Cursor("1767225600000:1".into())));
    }
}
