use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// The error taxonomy shared by every component. Component boundaries convert
/// their internal failures into one of these kinds; nothing upstream of a
/// boundary ever sees a raw `redis::RedisError` or `reqwest::Error`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("upstream unavailable")]
    UpstreamUnavailable,

    #[error("upstream rate limited, retry after {retry_after_secs}s")]
    UpstreamRateLimited { retry_after_secs: u64 },

    #[error("validation failed: {field}: {message}")]
    ValidationFailed { field: String, message: String },

    #[error("stream admission denied: {reason}")]
    AdmissionDenied { reason: String },

    #[error("cache unreachable")]
    TransientCacheError,

    #[error("fatal startup error: {0}")]
    Fatal(String),
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            AppError::UpstreamRateLimited { .. } => "UPSTREAM_RATE_LIMITED",
            AppError::ValidationFailed { .. } => "VALIDATION_FAILED",
            AppError::AdmissionDenied { .. } => "SSE_CONNECTION_LIMIT",
            AppError::TransientCacheError => "TRANSIENT_CACHE_ERROR",
            AppError::Fatal(_) => "FATAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::UpstreamRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
            AppError::AdmissionDenied { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::TransientCacheError => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    correlation_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let status = self.status();
        let code = self.code();

        // Internal messages never reach the client verbatim beyond the taxonomy's
        // own display text, which is already boundary-safe (no raw driver errors).
        tracing::warn!(correlation_id, code, "{}", self);

        let mut response = (
            status,
            Json(ErrorBody {
                code,
                message: self.to_string(),
                correlation_id,
            }),
        )
            .into_response();

        if let AppError::UpstreamRateLimited { retry_after_secs } = self {
            if let Ok(val) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", val);
            }
        }

        response
    }
}
