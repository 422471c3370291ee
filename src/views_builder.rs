//! Component D: the derived-view builder. A pure function from a rolling
//! window of events to the set of cached blobs (stats + buckets) for every
//! configured period, computed in a single pass per period (spec 4.3).

use std::collections::BTreeMap;

use crate::domain::views::{AllPeriods, Bucket, PeriodView, Stats};
use crate::domain::{Event, Period};

/// Builds every period's stats and buckets from `events` as observed at
/// `now_ms`. `events` need not be sorted or deduplicated by the caller —
/// the builder only reads them, once, per period.
pub fn build(events: &[Event], now_ms: i64) -> AllPeriods {
    let mut periods = BTreeMap::new();
    for period in Period::ALL {
        periods.insert(period.as_str(), build_period(events, now_ms, period));
    }
    AllPeriods {
        periods,
        generated_at_ms: now_ms,
    }
}

fn build_period(events: &[Event], now_ms: i64, period: Period) -> PeriodView {
    let start_ms = now_ms - period.hours() * 3600 * 1000;
    let width_ms = period.bucket_width_ms();
    let bucket_count = period.bucket_count();

    let mut buckets: Vec<Bucket> = (0..bucket_count)
        .map(|i| Bucket {
            timestamp_ms: start_ms + i as i64 * width_ms,
            total_volume: 0.0,
            count: 0,
            long_volume: 0.0,
            short_volume: 0.0,
            long_count: 0,
            short_count: 0,
        })
        .collect();

    let mut stats = Stats::zero();
    let mut coin_volume: BTreeMap<&str, f64> = BTreeMap::new();

    for e in events {
        // Cutoff policy fixed per the spec's open question: inclusive `>= cutoff`.
        if e.time_ms < start_ms {
            continue;
        }

        stats.total_volume += e.notional;
        stats.count += 1;
        match e.dir {
            crate::domain::Direction::Long => {
                stats.long_count += 1;
                stats.long_volume += e.notional;
            }
            crate::domain::Direction::Short => {
                stats.short_count += 1;
                stats.short_volume += e.notional;
            }
        }
        if e.notional > stats.max_liq {
            stats.max_liq = e.notional;
        }
        *coin_volume.entry(e.coin.as_str()).or_insert(0.0) += e.notional;

        let i = (e.time_ms - start_ms) / width_ms;
        if i >= 0 && (i as usize) < bucket_count {
            let b = &mut buckets[i as usize];
            b.total_volume += e.notional;
            b.count += 1;
            match e.dir {
                crate::domain::Direction::Long => {
                    b.long_volume += e.notional;
                    b.long_count += 1;
                }
                crate::domain::Direction::Short => {
                    b.short_volume += e.notional;
                    b.short_count += 1;
                }
            }
        }
    }

    if stats.count > 0 {
        stats.avg_size = stats.total_volume / stats.count as f64;
        // topCoin: largest accumulated volume; ties broken lexicographically
        // by coin (BTreeMap iteration is already lexicographic, so the first
        // maximum encountered in key order is the correct tie-break winner).
        let mut top: Option<(&str, f64)> = None;
        for (coin, volume) in &coin_volume {
            match top {
                Some((_, top_volume)) if volume <= &top_volume => {}
                _ => top = Some((coin, *volume)),
            }
        }
        if let Some((coin, volume)) = top {
            stats.top_coin = coin.to_string();
            stats.top_coin_volume = round2(volume);
        }
    }

    stats.total_volume = round2(stats.total_volume);
    stats.long_volume = round2(stats.long_volume);
    stats.short_volume = round2(stats.short_volume);
    stats.max_liq = round2(stats.max_liq);
    stats.avg_size = round2(stats.avg_size);
    for b in &mut buckets {
        b.total_volume = round2(b.total_volume);
        b.long_volume = round2(b.long_volume);
        b.short_volume = round2(b.short_volume);
    }

    PeriodView { stats, buckets }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;
    use chrono::{DateTime, Utc};

    fn ev(tid: i64, coin: &str, dir: Direction, notional: f64, time_ms: i64) -> Event {
        Event {
            tid,
            time: DateTime::<Utc>::from_timestamp_millis(time_ms).unwrap(),
            time_ms,
            coin: coin.into(),
            dir,
            notional,
            mark_price: 1.0,
            liquidated_user: "0xabc".into(),
            liquidators: vec![],
        }
    }

    const NOW_MS: i64 = 1_767_225_600_000; // 2026-01-01T00:00:00Z

    #[test]
    fn s1_empty_window_produces_zero_stats_and_stable_bucket_dimensions() {
        let all = build(&[], NOW_MS);
        for period in Period::ALL {
            let view = all.get(period).unwrap();
            assert_eq!(view.stats, Stats::zero());
            assert_eq!(view.buckets.len(), period.bucket_count());
            assert!(view.buckets.iter().all(|b| b.total_volume == 0.0 && b.count == 0));
        }
        assert_eq!(all.get(Period::TwoH).unwrap().buckets.len(), 24);
        assert_eq!(all.get(Period::FourH).unwrap().buckets.len(), 48);
        assert_eq!(all.get(Period::EightH).unwrap().buckets.len(), 32);
        assert_eq!(all.get(Period::TwelveH).unwrap().buckets.len(), 48);
        assert_eq!(all.get(Period::TwentyFourH).unwrap().buckets.len(), 48);
    }

    #[test]
    fn s2_single_large_long() {
        let ten_min_ago = NOW_MS - 10 * 60 * 1000;
        let events = vec![ev(10, "BTC", Direction::Long, 1_234_567.89, ten_min_ago)];
        let all = build(&events, NOW_MS);
        let view = all.get(Period::TwoH).unwrap();

        assert_eq!(view.stats.total_volume, 1_234_567.89);
        assert_eq!(view.stats.count, 1);
        assert_eq!(view.stats.long_count, 1);
        assert_eq!(view.stats.short_count, 0);
        assert_eq!(view.stats.top_coin, "BTC");
        assert_eq!(view.stats.top_coin_volume, 1_234_567.89);
        assert_eq!(view.stats.avg_size, 1_234_567.89);
        assert_eq!(view.stats.max_liq, 1_234_567.89);
        assert_eq!(view.stats.long_volume, 1_234_567.89);
        assert_eq!(view.stats.short_volume, 0.0);

        let non_zero: Vec<usize> = view
            .buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| b.count > 0)
            .map(|(i, _)| i)
            .collect();
        // i = floor((time_ms - start_ms) / width_ms); start_ms is 2h before
        // now, the event is 10m before now, so its offset from start is
        // 110m = 6_600_000ms, and 6_600_000 / 300_000 = 22.
        assert_eq!(non_zero, vec![22]);
    }

    #[test]
    fn s3_topcoin_tie_break_is_lexicographic() {
        let events = vec![
            ev(1, "BTC", Direction::Long, 100.0, NOW_MS),
            ev(2, "ALT", Direction::Long, 100.0, NOW_MS),
        ];
        let all = build(&events, NOW_MS);
        assert_eq!(all.get(Period::TwoH).unwrap().stats.top_coin, "ALT");
    }

    #[test]
    fn p6_long_short_partition_sums_to_totals() {
        let events = vec![
            ev(1, "BTC", Direction::Long, 100.0, NOW_MS),
            ev(2, "BTC", Direction::Short, 50.0, NOW_MS),
            ev(3, "ETH", Direction::Short, 25.0, NOW_MS),
        ];
        let all = build(&events, NOW_MS);
        let stats = &all.get(Period::TwoH).unwrap().stats;
        assert_eq!(stats.long_count + stats.short_count, stats.count);
        assert_eq!(stats.long_volume + stats.short_volume, stats.total_volume);
    }

    #[test]
    fn p5_bucket_volume_sums_equal_stats_total_up_to_rounding() {
        let events: Vec<Event> = (0..20)
            .map(|i| ev(i, "BTC", Direction::Long, 33.33, NOW_MS - i * 60_000))
            .collect();
        let all = build(&events, NOW_MS);
        let view = all.get(Period::TwoH).unwrap();
        let bucket_sum: f64 = view.buckets.iter().map(|b| b.total_volume).sum();
        assert!((bucket_sum - view.stats.total_volume).abs() < 0.01 * events.len() as f64);
    }

    #[test]
    fn events_outside_the_cutoff_are_excluded() {
        let three_hours_ago = NOW_MS - 3 * 3600 * 1000;
        let events = vec![ev(1, "BTC", Direction::Long, 999.0, three_hours_ago)];
        let all = build(&events, NOW_MS);
        // older than the 2h window's cutoff
        assert_eq!(all.get(Period::TwoH).unwrap().stats.count, 0);
        // but within the 4h and 8h windows
        assert_eq!(all.get(Period::FourH).unwrap().stats.count, 1);
        assert_eq!(all.get(Period::EightH).unwrap().stats.count, 1);
    }
}
