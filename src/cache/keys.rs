use crate::domain::Period;

pub const ALL_PERIODS: &str = "liquidations:all-data";
pub const STATS_ALL: &str = "liquidations:stats:all";
pub const LAST_OBSERVED_ID: &str = "liquidations:sse:lastTimeMs";
pub const BROADCAST_CHANNEL: &str = "liquidations:sse:broadcast";

pub fn chart(period: Period) -> String {
    format!("liquidations:chart:{}", period.as_str())
}

pub fn recent(hours: u32, limit: u32) -> String {
    format!("liquidations:recent:{hours}h:{limit}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_builders_match_the_spec_naming_scheme() {
        assert_eq!(chart(Period::TwoH), "liquidations:chart:2h");
        assert_eq!(recent(2, 100), "liquidations:recent:2h:100");
    }
}
