//! Rate limit key derivation.

use std::fmt;

use crate::context::RequestContext;

use super::rules::KeyStrategy;

/// The entity a counter is partitioned by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    /// An authenticated user id
    User(String),
    /// A client network address
    Address(String),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::User(id) => write!(f, "user:{}", id),
            Subject::Address(addr) => write!(f, "ip:{}", addr),
        }
    }
}

/// A key that uniquely identifies a rate limit counter.
///
/// The key is composed of the route class and the throttled subject, so
/// the same user gets independent budgets for different route classes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The route class this key belongs to
    pub class: String,
    /// The throttled subject
    pub subject: Subject,
}

impl RateLimitKey {
    /// Derive the key for a request under the given strategy.
    pub fn derive(class: &str, strategy: KeyStrategy, ctx: &RequestContext) -> Self {
        let subject = match (strategy, &ctx.identity) {
            (KeyStrategy::ByUser, Some(user)) => Subject::User(user.to_string()),
            _ => Subject::Address(ctx.network_address.to_string()),
        };

        Self {
            class: class.to_string(),
            subject,
        }
    }

    /// Convert the key to the string used in the counter store.
    pub fn to_store_key(&self) -> String {
        format!("ratelimit:{}:{}", self.class, self.subject)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UserId;

    fn anonymous() -> RequestContext {
        RequestContext::new("203.0.113.5".parse().unwrap(), "GET", "/api/members")
    }

    #[test]
    fn test_by_user_prefers_identity() {
        let ctx = anonymous().with_identity(UserId::new("userA"));
        let key = RateLimitKey::derive("api", KeyStrategy::ByUser, &ctx);

        assert_eq!(key.subject, Subject::User("userA".to_string()));
        assert_eq!(key.to_store_key(), "ratelimit:api:user:userA");
    }

    #[test]
    fn test_by_user_falls_back_to_address() {
        let key = RateLimitKey::derive("api", KeyStrategy::ByUser, &anonymous());
        assert_eq!(key.to_store_key(), "ratelimit:api:ip:203.0.113.5");
    }

    #[test]
    fn test_by_network_address_ignores_identity() {
        let ctx = anonymous().with_identity(UserId::new("userA"));
        let key = RateLimitKey::derive("auth", KeyStrategy::ByNetworkAddress, &ctx);

        assert_eq!(key.subject, Subject::Address("203.0.113.5".to_string()));
        assert_eq!(key.to_string(), "ratelimit:auth:ip:203.0.113.5");
    }

    #[test]
    fn test_key_equality() {
        let a = RateLimitKey::derive("api", KeyStrategy::ByUser, &anonymous());
        let b = RateLimitKey::derive("api", KeyStrategy::ByUser, &anonymous());
        let c = RateLimitKey::derive("other", KeyStrategy::ByUser, &anonymous());

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
