//! Core rate limit policy.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, trace};

use crate::context::RequestContext;
use crate::store::CounterStore;
use crate::telemetry;

use super::key::RateLimitKey;
use super::rules::{FailMode, RateLimitRules};

/// Whether a request fits in its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Allowed,
    Denied,
}

/// The outcome of a rate limit check for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitVerdict {
    /// Allowed or denied
    pub status: VerdictStatus,
    /// Route class that was applied
    pub class: String,
    /// Ceiling of the window
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Epoch seconds at which the current window resets
    pub reset_at: i64,
    /// Seconds the client should wait before retrying (denials only)
    pub retry_after_secs: Option<u64>,
}

impl RateLimitVerdict {
    pub fn is_allowed(&self) -> bool {
        self.status == VerdictStatus::Allowed
    }
}

/// The decision for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The counter store answered; the verdict says allow or deny
    Verdict(RateLimitVerdict),
    /// The counter store failed; the class's fail mode applies
    StoreUnavailable {
        class: String,
        fail_mode: FailMode,
        retry_after_secs: u64,
    },
}

impl Decision {
    /// Whether the request may proceed to the handler.
    pub fn admits(&self) -> bool {
        match self {
            Decision::Verdict(verdict) => verdict.is_allowed(),
            Decision::StoreUnavailable { fail_mode, .. } => *fail_mode == FailMode::Open,
        }
    }
}

/// Fixed-window admission control per route class and identity.
///
/// The policy itself is stateless and reentrant; counters live in the
/// injected store. Rules can be swapped at runtime.
pub struct RateLimitPolicy {
    /// Shared counter store
    store: Arc<dyn CounterStore>,
    /// Route classes and their limits
    rules: RwLock<RateLimitRules>,
}

impl RateLimitPolicy {
    /// Create a new policy with the given rules.
    pub fn new(store: Arc<dyn CounterStore>, rules: RateLimitRules) -> Self {
        Self {
            store,
            rules: RwLock::new(rules),
        }
    }

    /// Replace the rule set.
    pub fn set_rules(&self, rules: RateLimitRules) {
        let mut current = self.rules.write();
        *current = rules;
    }

    /// Get the current rules.
    pub fn rules(&self) -> RateLimitRules {
        self.rules.read().clone()
    }

    /// Name of the route class a path falls into.
    pub fn class_for(&self, path: &str) -> String {
        self.rules.read().classify(path).class.clone()
    }

    /// Check and count a request.
    ///
    /// A request is admitted while the window's count is below the ceiling;
    /// admitted requests increment the counter, denied requests do not.
    pub async fn check(&self, ctx: &RequestContext) -> Decision {
        let rule = self.rules.read().classify(&ctx.path).clone();
        let key = RateLimitKey::derive(&rule.class, rule.key_strategy, ctx);
        let window = Duration::from_secs(rule.window_secs);

        trace!(
            key = %key,
            ceiling = rule.ceiling,
            window_secs = rule.window_secs,
            "Checking rate limit"
        );

        let admission = match self
            .store
            .increment_below(&key.to_store_key(), rule.ceiling, window)
            .await
        {
            Ok(admission) => admission,
            Err(e) => {
                error!(
                    target: "chms_guard::ops",
                    class = %rule.class,
                    fail_mode = ?rule.fail_mode,
                    error = %e,
                    "Counter store unavailable for rate limiting"
                );
                telemetry::record_store_failure("rate_limit");
                return Decision::StoreUnavailable {
                    class: rule.class,
                    fail_mode: rule.fail_mode,
                    retry_after_secs: rule.window_secs,
                };
            }
        };

        let reset_at = reset_epoch(admission.ttl.unwrap_or(window));

        if admission.admitted {
            Decision::Verdict(RateLimitVerdict {
                status: VerdictStatus::Allowed,
                class: rule.class,
                limit: rule.ceiling,
                remaining: rule.ceiling.saturating_sub(admission.count),
                reset_at,
                retry_after_secs: None,
            })
        } else {
            debug!(
                key = %key,
                count = admission.count,
                ceiling = rule.ceiling,
                "Rate limit exceeded"
            );
            telemetry::record_rate_limited(&rule.class);
            Decision::Verdict(RateLimitVerdict {
                status: VerdictStatus::Denied,
                class: rule.class,
                limit: rule.ceiling,
                remaining: 0,
                reset_at,
                retry_after_secs: Some(rule.window_secs),
            })
        }
    }
}

/// Epoch seconds at which a window with `ttl` left will reset.
fn reset_epoch(ttl: Duration) -> i64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    Utc::now().timestamp() + secs as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UserId;
    use crate::ratelimit::rules::{KeyStrategy, RouteRule};
    use crate::store::testing::UnavailableStore;
    use crate::store::MemoryCounterStore;

    fn ctx(path: &str) -> RequestContext {
        RequestContext::new("203.0.113.5".parse().unwrap(), "GET", path)
    }

    fn policy() -> RateLimitPolicy {
        RateLimitPolicy::new(Arc::new(MemoryCounterStore::new()), RateLimitRules::default())
    }

    fn verdict(decision: Decision) -> RateLimitVerdict {
        match decision {
            Decision::Verdict(v) => v,
            other => panic!("expected a verdict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ceiling_plus_one_is_denied() {
        let policy = policy();

        for i in 1..=60u64 {
            let v = verdict(policy.check(&ctx("/api/members")).await);
            assert!(v.is_allowed(), "request {} should be allowed", i);
            assert_eq!(v.limit, 60);
            assert_eq!(v.remaining, 60 - i);
        }

        let v = verdict(policy.check(&ctx("/api/members")).await);
        assert_eq!(v.status, VerdictStatus::Denied);
        assert_eq!(v.remaining, 0);
        assert_eq!(v.retry_after_secs, Some(60));
    }

    #[tokio::test]
    async fn test_auth_scenario_for_user() {
        // userA hitting an auth route keyed by user
        let mut rules = RateLimitRules::default();
        rules.routes[0] = RouteRule::new("auth", "auth", 5, 60)
            .with_key_strategy(KeyStrategy::ByUser);
        let policy = RateLimitPolicy::new(Arc::new(MemoryCounterStore::new()), rules);
        let request = ctx("/auth/refresh").with_identity(UserId::new("userA"));

        for _ in 0..5 {
            assert!(policy.check(&request).await.admits());
        }

        let v = verdict(policy.check(&request).await);
        assert!(!v.is_allowed());
        assert_eq!(v.retry_after_secs, Some(60));

        // Another user on the same address still has budget
        let other = ctx("/auth/refresh").with_identity(UserId::new("userB"));
        assert!(policy.check(&other).await.admits());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_restores_budget() {
        let policy = policy();

        for _ in 0..5 {
            assert!(policy.check(&ctx("/auth/login")).await.admits());
        }
        assert!(!policy.check(&ctx("/auth/login")).await.admits());

        tokio::time::advance(Duration::from_secs(60)).await;

        let v = verdict(policy.check(&ctx("/auth/login")).await);
        assert!(v.is_allowed());
        // Fresh counter starts at one
        assert_eq!(v.remaining, 4);
    }

    #[tokio::test]
    async fn test_remaining_stays_within_bounds() {
        let policy = policy();

        for _ in 0..20 {
            let v = verdict(policy.check(&ctx("/auth/login")).await);
            assert!(v.remaining <= v.limit);
        }
    }

    #[tokio::test]
    async fn test_reset_is_in_the_future() {
        let policy = policy();
        let now = Utc::now().timestamp();

        let v = verdict(policy.check(&ctx("/dashboard")).await);
        assert_eq!(v.class, "default");
        assert!(v.reset_at > now);
        assert!(v.reset_at <= now + 61);
    }

    #[tokio::test]
    async fn test_classes_have_separate_budgets() {
        let policy = policy();

        for _ in 0..5 {
            policy.check(&ctx("/auth/login")).await;
        }
        assert!(!policy.check(&ctx("/auth/login")).await.admits());
        assert!(policy.check(&ctx("/api/members")).await.admits());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_burst_never_overshoots() {
        let policy = Arc::new(policy());
        let burst = 40;

        let tasks: Vec<_> = (0..burst)
            .map(|_| {
                let policy = policy.clone();
                tokio::spawn(async move { policy.check(&ctx("/auth/login")).await.admits() })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let allowed = results.iter().filter(|r| *r.as_ref().unwrap()).count();

        assert_eq!(allowed, 5);
        assert_eq!(burst - allowed, 35);
    }

    #[tokio::test]
    async fn test_store_failure_follows_fail_mode() {
        let policy =
            RateLimitPolicy::new(Arc::new(UnavailableStore), RateLimitRules::default());

        let auth = policy.check(&ctx("/auth/login")).await;
        assert!(!auth.admits());
        assert_eq!(
            auth,
            Decision::StoreUnavailable {
                class: "auth".to_string(),
                fail_mode: FailMode::Closed,
                retry_after_secs: 60,
            }
        );

        let api = policy.check(&ctx("/api/members")).await;
        assert!(api.admits());
    }

    #[test]
    fn test_class_for_collapses_arbitrary_paths() {
        let policy = policy();

        assert_eq!(policy.class_for("/auth/login"), "auth");
        assert_eq!(policy.class_for("/api/members/1%27--/x9f"), "api");
        assert_eq!(policy.class_for("/wp-admin/setup.php"), "default");
        assert_eq!(policy.class_for("/apiary"), "default");
    }

    #[tokio::test]
    async fn test_set_rules_takes_effect() {
        let policy = policy();
        let mut rules = RateLimitRules::default();
        rules.fallback.ceiling = 1;
        policy.set_rules(rules);

        assert_eq!(policy.rules().fallback.ceiling, 1);
        assert!(policy.check(&ctx("/dashboard")).await.admits());
        assert!(!policy.check(&ctx("/dashboard")).await.admits());
    }
}
