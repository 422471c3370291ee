use std::env;
use std::time::Duration;

/// Process-wide configuration, loaded once at startup from the environment
/// (optionally seeded by a `.env` file). Invalid configuration is a `Fatal`
/// error — the process never starts in a half-configured state.
#[derive(Debug, Clone)]
pub struct Settings {
    pub upstream_api_url: String,
    pub upstream_api_key: Option<String>,
    pub redis_url: String,
    pub bind_addr: String,

    pub refresh_interval: Duration,
    pub derived_ttl: Duration,
    pub recent_ttl: Duration,

    pub sse_max_total: usize,
    pub sse_max_per_ip: usize,
    pub sse_heartbeat_interval: Duration,
    pub sse_write_timeout: Duration,
    pub sse_missed_data_limit: usize,

    pub upstream_max_weight_per_minute: u32,
    pub upstream_request_weight: u32,
    pub upstream_breaker_failure_threshold: u32,
    pub upstream_breaker_cooldown: Duration,
    pub upstream_request_timeout: Duration,

    pub refresh_max_pages: u32,
    pub refresh_inter_page_delay: Duration,
}

impl Settings {
    /// Loads settings from the process environment. Reads a `.env` file first
    /// if present (development convenience); real deployments set the
    /// environment directly.
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        let _ = dotenvy::dotenv();

        let upstream_api_url = require_env("UPSTREAM_API_URL")?;
        let upstream_api_key = env::var("UPSTREAM_API_KEY").ok();
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());

        let refresh_interval =
            Duration::from_secs(env_u64("REFRESH_INTERVAL_SECS", 60)?);
        // Derived blob TTLs must be >= the refresh interval (I6); default to
        // a comfortable multiple so a slow tick never races a read against a
        // just-expired key.
        let derived_ttl = Duration::from_secs(
            env_u64("DERIVED_TTL_SECS", (refresh_interval.as_secs() * 3).max(180))?,
        );
        let recent_ttl = Duration::from_secs(env_u64("RECENT_TTL_SECS", 60)?);

        let sse_max_total = env_u64("SSE_MAX_TOTAL", 1000)? as usize;
        let sse_max_per_ip = env_u64("SSE_MAX_PER_IP", 3)? as usize;
        let sse_heartbeat_interval =
            Duration::from_secs(env_u64("SSE_HEARTBEAT_SECS", 30)?);
        let sse_write_timeout = Duration::from_millis(env_u64("SSE_WRITE_TIMEOUT_MS", 1000)?);
        let sse_missed_data_limit = env_u64("SSE_MISSED_DATA_LIMIT", 100)? as usize;

        let upstream_max_weight_per_minute =
            env_u64("UPSTREAM_MAX_WEIGHT_PER_MINUTE", 1200)? as u32;
        let upstream_request_weight = env_u64("UPSTREAM_REQUEST_WEIGHT", 1)? as u32;
        let upstream_breaker_failure_threshold =
            env_u64("UPSTREAM_BREAKER_FAILURE_THRESHOLD", 5)? as u32;
        let upstream_breaker_cooldown =
            Duration::from_secs(env_u64("UPSTREAM_BREAKER_COOLDOWN_SECS", 30)?);
        let upstream_request_timeout =
            Duration::from_millis(env_u64("UPSTREAM_REQUEST_TIMEOUT_MS", 5000)?);

        let refresh_max_pages = env_u64("REFRESH_MAX_PAGES", 5)? as u32;
        let refresh_inter_page_delay =
            Duration::from_millis(env_u64("REFRESH_INTER_PAGE_DELAY_MS", 400)?);

        if sse_max_per_ip == 0 || sse_max_total == 0 {
            return Err(crate::error::AppError::Fatal(
                "SSE_MAX_TOTAL and SSE_MAX_PER_IP must be positive".into(),
            ));
        }

        Ok(Self {
            upstream_api_url,
            upstream_api_key,
            redis_url,
            bind_addr,
            refresh_interval,
            derived_ttl,
            recent_ttl,
            sse_max_total,
            sse_max_per_ip,
            sse_heartbeat_interval,
            sse_write_timeout,
            sse_missed_data_limit,
            upstream_max_weight_per_minute,
            upstream_request_weight,
            upstream_breaker_failure_threshold,
            upstream_breaker_cooldown,
            upstream_request_timeout,
            refresh_max_pages,
            refresh_inter_page_delay,
        })
    }
}

fn require_env(key: &str) -> Result<String, crate::error::AppError> {
    env::var(key).map_err(|_| {
        crate::error::AppError::Fatal(format!("missing required environment variable {key}"))
    })
}

fn env_u64(key: &str, default: u64) -> Result<u64, crate::error::AppError> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| crate::error::AppError::Fatal(format!("{key} must be an integer"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_u64_falls_back_to_default_when_unset() {
        std::env::remove_var("LIQ_TEST_MISSING_KEY");
        assert_eq!(env_u64("LIQ_TEST_MISSING_KEY", 42).unwrap(), 42);
    }

    #[test]
    fn env_u64_rejects_non_integer() {
        std::env::set_var("LIQ_TEST_BAD_KEY", "not-a-number");
        assert!(env_u64("LIQ_TEST_BAD_KEY", 1).is_err());
        std::env::remove_var("LIQ_TEST_BAD_KEY");
    }
}
