// API Error Taxonomy
//
// Every caller-visible failure maps to one of these variants; the
// IntoResponse impl renders the structured JSON envelope so handlers
// never leak raw error strings or stack traces.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::validation::FieldError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or incomplete input. Carries every failing field so
    /// the form can render all errors at once. Not a system fault.
    #[error("validation failed")]
    Validation(Vec<FieldError>),

    /// Malformed query parameters (e.g. bad date format).
    #[error("{0}")]
    BadRequest(String),

    /// Caller exceeded the fixed-window limit; carries retry timing.
    #[error("rate limit exceeded")]
    RateLimited {
        remaining: u32,
        reset_at: DateTime<Utc>,
    },

    /// x-api-key mismatch on a protected endpoint.
    #[error("unauthorized")]
    Unauthorized,

    /// An integration is not configured (missing credentials). Distinct
    /// from a failed query so operators can tell the two apart.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// A synchronous upstream call (analytics query) failed.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// Persistence failure; fatal to the request.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "message": "Validation error",
                    "errors": errors,
                })),
            )
                .into_response(),

            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "message": message })),
            )
                .into_response(),

            ApiError::RateLimited {
                remaining,
                reset_at,
            } => {
                let retry_after_secs = (reset_at - Utc::now()).num_seconds().max(0) + 1;
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({
                        "success": false,
                        "error": "Too Many Requests",
                        "message": "Rate limit exceeded. Please try again later.",
                        "remaining": remaining,
                        "resetAt": reset_at.to_rfc3339(),
                    })),
                )
                    .into_response();

                let headers = response.headers_mut();
                insert_header(headers, header::RETRY_AFTER, &retry_after_secs.to_string());
                insert_header(headers, "x-ratelimit-remaining", &remaining.to_string());
                insert_header(headers, "x-ratelimit-reset", &reset_at.to_rfc3339());
                response
            }

            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Unauthorized" })),
            )
                .into_response(),

            ApiError::NotConfigured(what) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "Analytics not configured",
                    "message": format!("{what} is not configured"),
                })),
            )
                .into_response(),

            ApiError::Upstream(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to fetch analytics data",
                    "message": message,
                })),
            )
                .into_response(),

            ApiError::Database(err) => {
                tracing::error!("database error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "success": false,
                        "message": "Internal server error",
                    })),
                )
                    .into_response()
            }
        }
    }
}

fn insert_header<K>(headers: &mut axum::http::HeaderMap, key: K, value: &str)
where
    K: axum::http::header::IntoHeaderName,
{
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limited_response_carries_retry_headers() {
        let reset_at = Utc::now() + chrono::Duration::seconds(120);
        let response = ApiError::RateLimited {
            remaining: 0,
            reset_at,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        let retry_after: i64 = headers[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
        assert!((1..=121).contains(&retry_after));
        assert_eq!(headers["x-ratelimit-remaining"], "0");
    }

    #[test]
    fn not_configured_is_distinct_from_upstream() {
        let configured = ApiError::NotConfigured("Google Analytics");
        let upstream = ApiError::Upstream("quota exceeded".into());
        assert_eq!(
            configured.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            upstream.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
