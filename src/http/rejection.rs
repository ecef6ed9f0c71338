//! Responses for requests the pipeline refuses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::ratelimit::RateLimitVerdict;
use crate::security::ThreatKind;

/// Why a request was short-circuited before reaching its handler.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Rejection {
    #[error("rate limit exceeded for class {}", .0.class)]
    QuotaExceeded(RateLimitVerdict),

    #[error("security violation: {0:?}")]
    SecurityViolation(Vec<ThreatKind>),

    #[error("counter store unavailable")]
    StoreUnavailable { retry_after_secs: u64 },
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        match self {
            Rejection::QuotaExceeded(verdict) => {
                let retry_after = verdict.retry_after_secs.unwrap_or_default();
                let body = Json(json!({
                    "message": "Too many requests. Please try again later.",
                    "retry_after": retry_after,
                }));
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, HeaderValue::from(retry_after))],
                    body,
                )
                    .into_response();
                // Lets the decorator add the rate limit headers
                response.extensions_mut().insert(verdict);
                response
            }
            Rejection::SecurityViolation(kinds) => {
                let attacks: Vec<&str> = kinds.iter().map(ThreatKind::as_str).collect();
                let body = Json(json!({
                    "error": "Security violation detected",
                    "type": "security_block",
                    "attacks": attacks,
                }));
                (StatusCode::FORBIDDEN, body).into_response()
            }
            Rejection::StoreUnavailable { retry_after_secs } => {
                let body = Json(json!({
                    "message": "Service temporarily unavailable. Please try again later.",
                    "retry_after": retry_after_secs,
                }));
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    [(header::RETRY_AFTER, HeaderValue::from(retry_after_secs))],
                    body,
                )
                    .into_response()
            }
        }
    }
}
