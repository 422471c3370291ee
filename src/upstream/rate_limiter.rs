use std::num::NonZeroU32;

use governor::clock::Clock;
use governor::{Quota, RateLimiter as GovernorLimiter};

use crate::error::AppError;

type DirectLimiter = GovernorLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Token-bucket rate limiter keyed by client (spec 4.1): one limiter per
/// `UpstreamClient` instance, parameterized by max weight per minute and
/// charged `request_weight` tokens per call.
pub struct RateLimiter {
    inner: DirectLimiter,
    request_weight: NonZeroU32,
}

impl RateLimiter {
    pub fn new(max_weight_per_minute: u32, request_weight: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(max_weight_per_minute.max(1)).unwrap());
        Self {
            inner: GovernorLimiter::direct(quota),
            request_weight: NonZeroU32::new(request_weight.max(1)).unwrap(),
        }
    }

    /// Returns `Ok(())` if the call may proceed, or `UpstreamRateLimited`
    /// with a retry hint if the bucket is currently exhausted. Never blocks
    /// — callers decide whether to retry-with-backoff or propagate.
    pub fn check(&self) -> Result<(), AppError> {
        match self.inner.check_n(self.request_weight) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(not_until)) => {
                let retry_after_secs = not_until.wait_time_from(governor::clock::DefaultClock::default().now()).as_secs().max(1);
                Err(AppError::UpstreamRateLimited { retry_after_secs })
            }
            Err(_) => {
                // The request's weight exceeds the bucket's entire capacity —
                // it can never succeed. Surface as unavailable rather than
                // rate-limited, since retrying will never help.
                Err(AppError::UpstreamUnavailable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_calls_within_budget() {
        let limiter = RateLimiter::new(60, 1);
        for _ in 0..5 {
            assert!(limiter.check().is_ok());
        }
    }

    #[test]
    fn blocks_once_budget_is_exhausted() {
        let limiter = RateLimiter::new(2, 1);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(matches!(
            limiter.check(),
            Err(AppError::UpstreamRateLimited { .. })
        ));
    }
}
