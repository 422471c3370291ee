use std::fmt;

/// The closed set of five sliding windows the derived-view builder computes
/// in a single pass. Order matches the spec table and is used for iteration
/// when building the composite "all periods" blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Period {
    TwoH,
    FourH,
    EightH,
    TwelveH,
    TwentyFourH,
}

impl Period {
    pub const ALL: [Period; 5] = [
        Period::TwoH,
        Period::FourH,
        Period::EightH,
        Period::TwelveH,
        Period::TwentyFourH,
    ];

    pub fn hours(self) -> i64 {
        match self {
            Period::TwoH => 2,
            Period::FourH => 4,
            Period::EightH => 8,
            Period::TwelveH => 12,
            Period::TwentyFourH => 24,
        }
    }

    /// Fixed bucket width per the period table: {2h,4h -> 5m; 8h,12h -> 15m; 24h -> 30m}.
    pub fn bucket_width_minutes(self) -> i64 {
        match self {
            Period::TwoH | Period::FourH => 5,
            Period::EightH | Period::TwelveH => 15,
            Period::TwentyFourH => 30,
        }
    }

    pub fn bucket_width_ms(self) -> i64 {
        self.bucket_width_minutes() * 60 * 1000
    }

    /// `k = ceil(h * 3600 * 1000 / width_ms)`, which divides evenly for every
    /// configured period (this is stated as an invariant, not computed as a
    /// defensive ceiling, but `div_ceil` is still correct if that ever changes).
    pub fn bucket_count(self) -> usize {
        let span_ms = self.hours() * 3600 * 1000;
        ((span_ms + self.bucket_width_ms() - 1) / self.bucket_width_ms()) as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::TwoH => "2h",
            Period::FourH => "4h",
            Period::EightH => "8h",
            Period::TwelveH => "12h",
            Period::TwentyFourH => "24h",
        }
    }

    pub fn parse(s: &str) -> Option<Period> {
        match s {
            "2h" => Some(Period::TwoH),
            "4h" => Some(Period::FourH),
            "8h" => Some(Period::EightH),
            "12h" => Some(Period::TwelveH),
            "24h" => Some(Period::TwentyFourH),
            _ => None,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_counts_match_the_period_table() {
        assert_eq!(Period::TwoH.bucket_count(), 24);
        assert_eq!(Period::FourH.bucket_count(), 48);
        assert_eq!(Period::EightH.bucket_count(), 32);
        assert_eq!(Period::TwelveH.bucket_count(), 48);
        assert_eq!(Period::TwentyFourH.bucket_count(), 48);
    }

    #[test]
    fn wire_strings_round_trip() {
        for p in Period::ALL {
            assert_eq!(Period::parse(p.as_str()), Some(p));
        }
        assert_eq!(Period::parse("banana"), None);
    }
}
