//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::context::RequestContext;
use crate::error::Result;

use super::auth::login;
use super::context::establish_context;
use super::middleware::{decorate_response, rate_limit_gate, security_gate};
use super::state::GuardState;

/// Wrap a router in the guard pipeline.
///
/// Requests pass through, outermost first: tracing, context, response
/// decoration, security monitor, rate limit policy.
pub fn protect(router: Router, state: Arc<GuardState>) -> Router {
    router
        .layer(from_fn_with_state(state.clone(), rate_limit_gate))
        .layer(from_fn_with_state(state.clone(), security_gate))
        .layer(from_fn_with_state(state.clone(), decorate_response))
        .layer(from_fn_with_state(state, establish_context))
        .layer(TraceLayer::new_for_http())
}

/// The host application's routes, protected by the pipeline.
pub fn build_router(state: Arc<GuardState>) -> Router {
    let routes = Router::new()
        .route("/health", get(health))
        .route("/api/ping", get(ping))
        .route("/auth/login", post(login))
        .with_state(state.clone());
    protect(routes, state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn ping(Extension(ctx): Extension<RequestContext>) -> Json<Value> {
    Json(json!({
        "message": "pong",
        "user_id": ctx.identity,
        "request_id": ctx.request_id,
    }))
}

/// HTTP server hosting the protected routes.
pub struct GuardServer {
    /// Address to bind to
    addr: SocketAddr,
    state: Arc<GuardState>,
}

impl GuardServer {
    pub fn new(addr: SocketAddr, state: Arc<GuardState>) -> Self {
        Self { addr, state }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %listener.local_addr()?, "Starting HTTP server");

        let app = build_router(self.state).into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                e
            })?;

        info!("HTTP server stopped");
        Ok(())
    }
}
