use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Period;

/// Statistics record for a single period. `count = 0` is represented
/// explicitly (not `null`/omitted) per the spec's zero-valued-record edge case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_volume: f64,
    pub count: u64,
    pub long_count: u64,
    pub short_count: u64,
    pub long_volume: f64,
    pub short_volume: f64,
    pub top_coin: String,
    pub top_coin_volume: f64,
    pub avg_size: f64,
    pub max_liq: f64,
}

impl Stats {
    pub fn zero() -> Self {
        Self {
            total_volume: 0.0,
            count: 0,
            long_count: 0,
            short_count: 0,
            long_volume: 0.0,
            short_volume: 0.0,
            top_coin: "N/A".into(),
            top_coin_volume: 0.0,
            avg_size: 0.0,
            max_liq: 0.0,
        }
    }
}

/// One fixed-width time slice within a period's chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub timestamp_ms: i64,
    pub total_volume: f64,
    pub count: u64,
    pub long_volume: f64,
    pub short_volume: f64,
    pub long_count: u64,
    pub short_count: u64,
}

/// The derived blob for a single period: its statistics plus its ordered,
/// dimensionally-stable bucket list (always `Period::bucket_count()` entries,
/// even over an empty window).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodView {
    pub stats: Stats,
    pub buckets: Vec<Bucket>,
}

/// The composite "all periods" blob (I1: every period here is derived from
/// the same single scan of the same event list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllPeriods {
    pub periods: BTreeMap<&'static str, PeriodView>,
    pub generated_at_ms: i64,
}

impl AllPeriods {
    pub fn get(&self, period: Period) -> Option<&PeriodView> {
        self.periods.get(period.as_str())
    }

    /// Projects the stats-only view used by `/liquidations/stats/all`,
    /// keeping `stats-all` a lighter cache entry than the full `all-periods`
    /// blob (spec 3, "Snapshot entry").
    pub fn stats_only(&self) -> StatsAll {
        StatsAll {
            periods: self
                .periods
                .iter()
                .map(|(k, v)| (*k, v.stats.clone()))
                .collect(),
            generated_at_ms: self.generated_at_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsAll {
    pub periods: BTreeMap<&'static str, Stats>,
    pub generated_at_ms: i64,
}
