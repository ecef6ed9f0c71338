//! HTTP boundary: axum middleware for the guard pipeline and the host
//! application's routes.

mod auth;
mod context;
mod decorator;
mod middleware;
mod rejection;
mod server;
mod state;

pub use auth::{login, LoginRequest, LoginResponse, SessionRegistry};
pub use context::{bearer_token, client_address, establish_context, request_id};
pub use decorator::{
    cache_policy, classify_resource, response_headers, DecoratorSettings, ResourceClass,
    ResponseMeta,
};
pub use middleware::{decorate_response, rate_limit_gate, security_gate};
pub use rejection::Rejection;
pub use server::{build_router, protect, GuardServer};
pub use state::GuardState;
