use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

/// Wire shape as received from the upstream indexer, before normalization.
/// `time_ms` is intentionally untyped here (`time` is authoritative — see
/// [`Event::try_from_raw`]).
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub tid: i64,
    pub time: String,
    #[serde(default)]
    pub time_ms: Option<i64>,
    pub coin: String,
    pub dir: Direction,
    pub notional: f64,
    pub mark_price: f64,
    pub liquidated_user: String,
    #[serde(default)]
    pub liquidators: Vec<String>,
}

/// A single observed liquidation. Immutable once constructed — every field is
/// validated and `time_ms` is always recomputed from `time`, never trusted
/// from upstream (it has been observed corrupted there).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub tid: i64,
    pub time: DateTime<Utc>,
    pub time_ms: i64,
    pub coin: String,
    pub dir: Direction,
    pub notional: f64,
    pub mark_price: f64,
    pub liquidated_user: String,
    pub liquidators: Vec<String>,
}

impl Event {
    /// Normalizes and validates a raw upstream record. Returns `Err` for any
    /// malformed entry; callers are expected to drop the entry and bump a
    /// counter rather than fail the whole pass.
    pub fn try_from_raw(raw: RawEvent) -> Result<Self, AppError> {
        if raw.tid <= 0 {
            return Err(AppError::ValidationFailed {
                field: "tid".into(),
                message: "must be a positive integer".into(),
            });
        }
        if raw.coin.trim().is_empty() {
            return Err(AppError::ValidationFailed {
                field: "coin".into(),
                message: "must not be empty".into(),
            });
        }
        if !raw.notional.is_finite() || raw.notional < 0.0 {
            return Err(AppError::ValidationFailed {
                field: "notional".into(),
                message: "must be a finite, non-negative number".into(),
            });
        }
        if raw.liquidated_user.trim().is_empty() {
            return Err(AppError::ValidationFailed {
                field: "liquidated_user".into(),
                message: "must not be empty".into(),
            });
        }

        let time: DateTime<Utc> = raw.time.parse().map_err(|_| AppError::ValidationFailed {
            field: "time".into(),
            message: format!("not a valid ISO-8601 timestamp: {}", raw.time),
        })?;

        // time_ms is always recomputed from time (I4 note in spec section 3):
        // the upstream field has been observed corrupted.
        let time_ms = time.timestamp_millis();

        Ok(Event {
            tid: raw.tid,
            time,
            time_ms,
            coin: raw.coin,
            dir: raw.dir,
            notional: raw.notional,
            mark_price: raw.mark_price,
            liquidated_user: raw.liquidated_user,
            liquidators: raw.liquidators,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(tid: i64, time: &str, notional: f64) -> RawEvent {
        RawEvent {
            tid,
            time: time.into(),
            time_ms: Some(1), // deliberately wrong — must be ignored
            coin: "BTC".into(),
            dir: Direction::Long,
            notional,
            mark_price: 50_000.0,
            liquidated_user: "0xabc".into(),
            liquidators: vec!["0xdef".into()],
        }
    }

    #[test]
    fn recomputes_time_ms_from_time_ignoring_upstream_value() {
        let e = Event::try_from_raw(raw(1, "2026-01-01T00:00:00Z", 100.0)).unwrap();
        assert_eq!(e.time_ms, 1767225600000);
    }

    #[test]
    fn rejects_non_positive_tid() {
        assert!(Event::try_from_raw(raw(0, "2026-01-01T00:00:00Z", 100.0)).is_err());
        assert!(Event::try_from_raw(raw(-5, "2026-01-01T00:00:00Z", 100.0)).is_err());
    }

    #[test]
    fn rejects_negative_or_non_finite_notional() {
        assert!(Event::try_from_raw(raw(1, "2026-01-01T00:00:00Z", -1.0)).is_err());
        assert!(Event::try_from_raw(raw(1, "2026-01-01T00:00:00Z", f64::NAN)).is_err());
    }

    #[test]
    fn rejects_malformed_timestamp() {
        assert!(Event::try_from_raw(raw(1, "not-a-time", 100.0)).is_err());
    }
}
