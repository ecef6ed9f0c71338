//! Minimal bearer-token sessions and the login handler.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::config::AccountConfig;
use crate::context::{RequestContext, UserId};

use super::state::GuardState;

/// Known accounts and the tokens issued to them.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    accounts: Vec<AccountConfig>,
    tokens: DashMap<String, UserId>,
}

impl SessionRegistry {
    pub fn new(accounts: Vec<AccountConfig>) -> Self {
        Self {
            accounts,
            tokens: DashMap::new(),
        }
    }

    /// Check credentials. Emails compare case-insensitively.
    pub fn authenticate(&self, email: &str, password: &str) -> Option<UserId> {
        let email = email.trim();
        self.accounts
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .filter(|a| constant_time_eq(a.password.as_bytes(), password.as_bytes()))
            .map(|a| UserId::new(a.user_id.clone()))
    }

    /// Issue a new opaque token for a user.
    pub fn issue(&self, user: UserId) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        self.tokens.insert(token.clone(), user);
        token
    }

    pub fn resolve(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).map(|entry| entry.value().clone())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: UserId,
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<Arc<GuardState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<LoginRequest>,
) -> Response {
    if let Some(user_id) = state.sessions.authenticate(&request.email, &request.password) {
        let token = state.sessions.issue(user_id.clone());
        info!(user_id = %user_id, network_address = %ctx.network_address, "Login succeeded");
        return Json(LoginResponse { token, user_id }).into_response();
    }

    match state.login.record_failure(&request.email, ctx.network_address).await {
        Ok(record) => info!(
            network_address = %ctx.network_address,
            address_failures = record.address_failures,
            identity_failures = record.identity_failures,
            blocked = record.blocked,
            "Login failed"
        ),
        Err(e) => error!(
            target: "chms_guard::ops",
            error = %e,
            "Failed to record failed login"
        ),
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": "Invalid credentials" })),
    )
        .into_response()
}
