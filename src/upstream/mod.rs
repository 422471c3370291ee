pub mod circuit_breaker;
pub mod rate_limiter;
pub mod types;

use std::time::Duration;

use circuit_breaker::{CircuitBreaker, Permit};
use rate_limiter::RateLimiter;
use types::{clamp_limit, validate_hours, Cursor, Order, Page, PageFilter};

use crate::config::Settings;
use crate::error::AppError;

/// The liquidations upstream client (spec 4.1). Composes three capabilities
/// around a plain `reqwest::Client`: a circuit breaker gate, a rate-limit
/// gate, and a bounded-timeout fetch — rather than an inheritance hierarchy
/// of API clients, per the design notes.
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    request_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(settings: &Settings) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(settings.upstream_request_timeout)
            .build()
            .map_err(|e| AppError::Fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: settings.upstream_api_url.clone(),
            api_key: settings.upstream_api_key.clone(),
            breaker: CircuitBreaker::new(
                settings.upstream_breaker_failure_threshold,
                settings.upstream_breaker_cooldown,
            ),
            limiter: RateLimiter::new(
                settings.upstream_max_weight_per_minute,
                settings.upstream_request_weight,
            ),
            request_timeout: settings.upstream_request_timeout,
        })
    }

    /// `fetchPage`: historical, filterable pagination.
    pub async fn fetch_page(
        &self,
        filter: &PageFilter,
        cursor: Option<&Cursor>,
        limit: u32,
        order: Order,
    ) -> Result<Page, AppError> {
        let limit = clamp_limit(limit);
        let mut query: Vec<(&str, String)> = vec![
            ("limit", limit.to_string()),
            ("order", order.as_query_str().to_string()),
        ];
        if let Some(coin) = &filter.coin {
            query.push(("coin", coin.clone()));
        }
        if let Some(user) = &filter.user {
            query.push(("user", user.clone()));
        }
        if let Some(start) = filter.start_time {
            query.push(("start_time", start.to_string()));
        }
        if let Some(end) = filter.end_time {
            query.push(("end_time", end.to_string()));
        }
        if let Some(amount) = filter.amount_dollars {
            query.push(("amount_dollars", amount.to_string()));
        }
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.0.clone()));
        }

        self.get("/liquidations/", &query).await
    }

    /// `fetchRecentPage`: the rolling-window endpoint used by the refresh
    /// loop. `hours` is encoded as `start_time = now - hours*3600s` rather
    /// than forwarded literally (spec 4.1 time parameter encoding).
    pub async fn fetch_recent_page(
        &self,
        hours: u32,
        cursor: Option<&Cursor>,
        limit: u32,
        order: Order,
    ) -> Result<Page, AppError> {
        let hours = validate_hours(hours)?;
        let limit = clamp_limit(limit);
        let start_time = chrono::Utc::now().timestamp() - hours as i64 * 3600;

        let mut query: Vec<(&str, String)> = vec![
            ("start_time", start_time.to_string()),
            ("limit", limit.to_string()),
            ("order", order.as_query_str().to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.0.clone()));
        }

        self.get("/liquidations/recent", &query).await
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Page, AppError> {
        match self.breaker.acquire() {
            Permit::Deny => {
                tracing::debug!(path, "circuit open, failing fast");
                return Err(AppError::UpstreamUnavailable);
            }
            Permit::Allow | Permit::AllowTrial => {}
        }

        self.limiter.check()?;

        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.get(&url).query(query).timeout(self.request_timeout);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let result = request.send().await;
        match result {
            Ok(response) if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                self.breaker.on_failure();
                Err(AppError::UpstreamRateLimited {
                    retry_after_secs: response
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(5),
                })
            }
            Ok(response) if !response.status().is_success() => {
                self.breaker.on_failure();
                Err(AppError::UpstreamUnavailable)
            }
            Ok(response) => match response.bytes().await {
                Ok(body) => match Page::from_wire(&body) {
                    Ok(page) => {
                        self.breaker.on_success();
                        Ok(page)
                    }
                    Err(e) => {
                        self.breaker.on_failure();
                        Err(e)
                    }
                },
                Err(_) => {
                    self.breaker.on_failure();
                    Err(AppError::UpstreamUnavailable)
                }
            },
            Err(_) => {
                self.breaker.on_failure();
                Err(AppError::UpstreamUnavailable)
            }
        }
    }
}
