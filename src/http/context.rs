//! Builds the [`RequestContext`] at the HTTP boundary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::trace;

use crate::context::RequestContext;

use super::state::GuardState;

/// Headers copied into the context for inspection.
const CONTEXT_HEADERS: &[&str] = &["user-agent", "referer", "x-forwarded-host"];

const MAX_REQUEST_ID_LEN: usize = 128;

/// Resolve identity, client address and request id, and store the context
/// in the request extensions for the layers below.
pub async fn establish_context(
    State(state): State<Arc<GuardState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let headers = req.headers();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let address = client_address(headers, peer, state.trust_forwarded_for);

    let mut ctx = RequestContext::new(address, req.method().as_str(), req.uri().path())
        .with_query(req.uri().query().unwrap_or_default())
        .with_request_id(request_id(headers));

    if let Some(user) = bearer_token(headers).and_then(|token| state.sessions.resolve(token)) {
        ctx = ctx.with_identity(user);
    }
    for name in CONTEXT_HEADERS {
        if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            ctx = ctx.with_header(name, value);
        }
    }

    trace!(
        request_id = %ctx.request_id,
        network_address = %ctx.network_address,
        identity = ?ctx.identity,
        "Established request context"
    );
    req.extensions_mut().insert(ctx);
    next.run(req).await
}

/// The client address: the first `X-Forwarded-For` hop when trusted, the
/// peer address otherwise.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> IpAddr {
    let forwarded = trust_forwarded
        .then(|| headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|hop| hop.trim().parse::<IpAddr>().ok());

    forwarded
        .or(peer.map(|addr| addr.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// The client-supplied request id if it is reasonable, a fresh uuid otherwise.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| {
            !id.is_empty()
                && id.len() <= MAX_REQUEST_ID_LEN
                && id.bytes().all(|b| b.is_ascii_graphic())
        })
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
