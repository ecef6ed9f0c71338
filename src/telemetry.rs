//! Metric names and recording helpers.
//!
//! Metrics go through the `metrics` facade. No exporter is installed by this
//! crate; an embedding application can install one, otherwise every call is
//! a no-op.

use std::time::Duration;

use metrics::{counter, histogram};

pub const REQUESTS_TOTAL: &str = "chms_guard_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "chms_guard_request_duration_seconds";
pub const RATE_LIMITED_TOTAL: &str = "chms_guard_rate_limited_total";
pub const SECURITY_FINDINGS_TOTAL: &str = "chms_guard_security_findings_total";
pub const UNUSUAL_ACCESS_TOTAL: &str = "chms_guard_unusual_access_total";
pub const STORE_FAILURES_TOTAL: &str = "chms_guard_store_failures_total";
pub const LOGIN_FAILURES_TOTAL: &str = "chms_guard_login_failures_total";

/// Record a completed request.
///
/// `route_class` must come from the configured rule set, never from the raw
/// request path, to keep label cardinality bounded.
pub fn record_request(route_class: &str, method: &str, status: u16, latency: Duration) {
    counter!(
        REQUESTS_TOTAL,
        "route_class" => route_class.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(REQUEST_DURATION_SECONDS, "route_class" => route_class.to_string())
        .record(latency.as_secs_f64());
}

/// Record a request denied by the rate limiter.
pub fn record_rate_limited(class: &str) {
    counter!(RATE_LIMITED_TOTAL, "class" => class.to_string()).increment(1);
}

/// Record a security finding by classification.
pub fn record_finding(kind: &'static str) {
    counter!(SECURITY_FINDINGS_TOTAL, "kind" => kind).increment(1);
}

/// Record an identity crossing the unusual-access threshold.
pub fn record_unusual_access(route_class: &str) {
    counter!(UNUSUAL_ACCESS_TOTAL, "route_class" => route_class.to_string()).increment(1);
}

/// Record a failed counter store call.
pub fn record_store_failure(component: &'static str) {
    counter!(STORE_FAILURES_TOTAL, "component" => component).increment(1);
}

/// Record a failed login attempt.
pub fn record_login_failure() {
    counter!(LOGIN_FAILURES_TOTAL).increment(1);
}
