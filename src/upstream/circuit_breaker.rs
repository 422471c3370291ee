use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Per-client circuit breaker (spec 4.1). Three states: `Closed` (calls
/// flow), `Open` (calls fail fast with `UpstreamUnavailable`), `HalfOpen`
/// (one trial call is allowed after the cooldown; success closes, failure
/// reopens). Transitions drive observability only — callers never get
/// silently-stale data out of this type, only a permit/deny decision.
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Allow,
    AllowTrial,
    Deny,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Call before attempting an upstream request. `AllowTrial` means the
    /// breaker is half-open and this call is the single permitted probe;
    /// the result must be reported via `on_success`/`on_failure`.
    pub fn acquire(&self) -> Permit {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed => Permit::Allow,
            State::HalfOpen => Permit::Deny, // a trial is already in flight
            State::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooldown {
                    inner.state = State::HalfOpen;
                    tracing::debug!("circuit breaker half-open, allowing trial call");
                    Permit::AllowTrial
                } else {
                    Permit::Deny
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != State::Closed {
            tracing::debug!("circuit breaker closed after successful call");
        }
        inner.state = State::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            State::HalfOpen => {
                tracing::warn!("circuit breaker trial call failed, reopening");
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
            }
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    tracing::warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opening after consecutive failures"
                    );
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            State::Open => {}
        }
    }

    #[cfg(test)]
    fn is_open(&self) -> bool {
        self.inner.lock().state == State::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_consecutive_failure_threshold() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        assert_eq!(cb.acquire(), Permit::Allow);
        cb.on_failure();
        cb.on_failure();
        assert!(!cb.is_open());
        cb.on_failure();
        assert!(cb.is_open());
        assert_eq!(cb.acquire(), Permit::Deny);
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(60));
        cb.on_failure();
        cb.on_success();
        cb.on_failure();
        assert!(!cb.is_open());
    }

    #[test]
    fn half_opens_after_cooldown_and_closes_on_trial_success() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(1));
        cb.on_failure();
        assert!(cb.is_open());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.acquire(), Permit::AllowTrial);
        cb.on_success();
        assert!(!cb.is_open());
        assert_eq!(cb.acquire(), Permit::Allow);
    }

    #[test]
    fn half_open_trial_failure_reopens() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(1));
        cb.on_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.acquire(), Permit::AllowTrial);
        cb.on_failure();
        assert!(cb.is_open());
    }
}
