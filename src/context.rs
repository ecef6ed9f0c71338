//! Per-request context handed to the policy layers.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Identifier of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the rate limiter and security monitor know about a request.
///
/// Built once at the HTTP boundary and passed down by reference, so the
/// policy code never reaches back into framework types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Authenticated user, if any
    pub identity: Option<UserId>,
    /// Client network address
    pub network_address: IpAddr,
    /// HTTP method in upper case
    pub method: String,
    /// Raw request path (still percent-encoded)
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
    /// Request headers selected for inspection, names in lower case
    pub headers: Vec<(String, String)>,
    /// Correlation id echoed back in `X-Request-Id`
    pub request_id: String,
}

impl RequestContext {
    /// Create a context for an anonymous request.
    pub fn new(network_address: IpAddr, method: &str, path: &str) -> Self {
        Self {
            identity: None,
            network_address,
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query: None,
            headers: Vec::new(),
            request_id: String::new(),
        }
    }

    pub fn with_identity(mut self, identity: UserId) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_query(mut self, query: &str) -> Self {
        if !query.is_empty() {
            self.query = Some(query.to_string());
        }
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Look up an inspected header by (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The client's `User-Agent`, used as its signature in access tracking.
    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }
}
