use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Tower-compatible middleware that records per-request latency. Adds
/// `X-Response-Time-Us`/`Server-Timing` response headers and logs a
/// `debug`-level line via `tracing` (the streaming endpoint is long-lived by
/// design, so it is logged once on connect rather than once on response).
pub async fn timing_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();
    let us = elapsed.as_micros();

    if let Ok(val) = us.to_string().parse() {
        response.headers_mut().insert("X-Response-Time-Us", val);
    }

    let server_timing = format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = server_timing.parse() {
        response.headers_mut().insert("Server-Timing", val);
    }

    tracing::debug!(
        %method,
        path,
        status = response.status().as_u16(),
        latency_us = us as u64,
        "request completed"
    );

    response
}
