//! The pipeline stages, as axum middleware.
//!
//! Each stage reads the [`RequestContext`] that `establish_context` stored
//! in the request extensions.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use tracing::{debug, info, warn};

use crate::context::RequestContext;
use crate::ratelimit::{Decision, FailMode, RateLimitVerdict};
use crate::security::{threat_kinds, Observation, Payload};

use super::decorator::{response_headers, ResponseMeta};
use super::rejection::Rejection;
use super::state::GuardState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Form,
}

fn inspectable_body(req: &Request, limit: usize) -> Option<BodyKind> {
    let headers = req.headers();
    let length = headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse::<usize>()
        .ok()?;
    if length == 0 || length > limit {
        return None;
    }

    let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    if mime == "application/json" || mime.ends_with("+json") {
        Some(BodyKind::Json)
    } else if mime == "application/x-www-form-urlencoded" {
        Some(BodyKind::Form)
    } else {
        None
    }
}

/// Reject requests the security monitor flags, then record an observation
/// of whatever response went out.
pub async fn security_gate(
    State(state): State<Arc<GuardState>>,
    Extension(ctx): Extension<RequestContext>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let limit = state.monitor.config().max_inspected_body_bytes;

    let (req, body) = match inspectable_body(&req, limit) {
        Some(kind) => {
            let (parts, body) = req.into_parts();
            let bytes = match axum::body::to_bytes(body, limit).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(request_id = %ctx.request_id, error = %e, "Unreadable request body");
                    return (StatusCode::BAD_REQUEST, "Invalid request body").into_response();
                }
            };
            (Request::from_parts(parts, Body::from(bytes.clone())), Some((kind, bytes)))
        }
        None => (req, None),
    };

    let payload = body.as_ref().map(|(kind, bytes)| match kind {
        BodyKind::Json => Payload::Json(bytes),
        BodyKind::Form => Payload::Form(bytes),
    });
    let findings = state.monitor.inspect(&ctx, payload).await;

    let response = if findings.is_empty() {
        next.run(req).await
    } else {
        let kinds = threat_kinds(&findings);
        warn!(
            request_id = %ctx.request_id,
            network_address = %ctx.network_address,
            attacks = ?kinds,
            "Rejected request by security monitor"
        );
        Rejection::SecurityViolation(kinds).into_response()
    };

    let observation =
        Observation::from_context(&ctx, response.status().as_u16(), started.elapsed())
            .with_route_class(&state.policy.class_for(&ctx.path));
    state.monitor.observe(observation);
    response
}

/// Apply the rate limit policy. Allowed verdicts ride along in the response
/// extensions for the decorator.
pub async fn rate_limit_gate(
    State(state): State<Arc<GuardState>>,
    Extension(ctx): Extension<RequestContext>,
    req: Request,
    next: Next,
) -> Response {
    match state.policy.check(&ctx).await {
        Decision::Verdict(verdict) if verdict.is_allowed() => {
            let mut response = next.run(req).await;
            response.extensions_mut().insert(verdict);
            response
        }
        Decision::Verdict(verdict) => {
            info!(
                request_id = %ctx.request_id,
                class = %verdict.class,
                network_address = %ctx.network_address,
                identity = ?ctx.identity,
                "Rate limit exceeded"
            );
            Rejection::QuotaExceeded(verdict).into_response()
        }
        Decision::StoreUnavailable {
            fail_mode: FailMode::Open,
            ..
        } => next.run(req).await,
        Decision::StoreUnavailable {
            retry_after_secs, ..
        } => Rejection::StoreUnavailable { retry_after_secs }.into_response(),
    }
}

/// Add cache, security and rate limit headers to every response.
pub async fn decorate_response(
    State(state): State<Arc<GuardState>>,
    Extension(ctx): Extension<RequestContext>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let mut response = next.run(req).await;

    let verdict = response.extensions().get::<RateLimitVerdict>().cloned();
    let status = response.status().as_u16();
    let meta = ResponseMeta {
        path: &ctx.path,
        status,
        verdict: verdict.as_ref(),
        request_id: Some(&ctx.request_id),
    };
    let headers = response.headers_mut();
    for (name, value) in response_headers(&meta, &state.settings) {
        headers.insert(name, value);
    }

    info!(
        request_id = %ctx.request_id,
        method = %ctx.method,
        path = %ctx.path,
        status,
        latency_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );
    response
}
