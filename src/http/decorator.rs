//! Response decoration.
//!
//! Computes the headers added to every outgoing response from the request
//! path, the response status, the rate limit verdict and the request id.
//! The computation is pure and never fails; headers whose input is missing
//! or not representable are left out.

use axum::http::{HeaderName, HeaderValue};

use crate::config::SecurityConfig;
use crate::ratelimit::RateLimitVerdict;

const STATIC_EXTENSIONS: &[&str] = &[
    "css", "js", "png", "jpg", "jpeg", "gif", "svg", "ico", "woff", "woff2",
];

const PERMISSIONS_POLICY: &str = "camera=(), microphone=(), geolocation=(), payment=()";
const HSTS: &str = "max-age=31536000; includeSubDomains";

/// Resource classes that get distinct cache policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    StaticAsset,
    /// API and authentication endpoints
    Private,
    Health,
    Page,
}

/// Classify a request path for caching.
pub fn classify_resource(path: &str) -> ResourceClass {
    let path = path.split('?').next().unwrap_or_default().trim_start_matches('/');
    let under = |prefix: &str| path == prefix || path.starts_with(&format!("{}/", prefix));

    let extension = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    if extension.is_some_and(|ext| STATIC_EXTENSIONS.contains(&ext.as_str())) {
        ResourceClass::StaticAsset
    } else if under("api") || under("auth") {
        ResourceClass::Private
    } else if under("health") {
        ResourceClass::Health
    } else {
        ResourceClass::Page
    }
}

/// `Cache-Control` value for a response.
pub fn cache_policy(path: &str, status: u16) -> &'static str {
    if status >= 400 {
        return "no-store";
    }
    match classify_resource(path) {
        ResourceClass::StaticAsset => "public, max-age=31536000, immutable",
        ResourceClass::Private => "no-store, private",
        ResourceClass::Health => "no-cache",
        ResourceClass::Page => "no-cache, private",
    }
}

/// Configurable parts of the security header set.
#[derive(Debug, Clone)]
pub struct DecoratorSettings {
    pub hsts: bool,
    pub content_security_policy: String,
}

impl DecoratorSettings {
    pub fn from_config(config: &SecurityConfig) -> Self {
        Self {
            hsts: config.hsts,
            content_security_policy: config.content_security_policy.clone(),
        }
    }
}

impl Default for DecoratorSettings {
    fn default() -> Self {
        Self::from_config(&SecurityConfig::default())
    }
}

/// Inputs to the decorator.
#[derive(Debug, Clone, Copy)]
pub struct ResponseMeta<'a> {
    pub path: &'a str,
    pub status: u16,
    pub verdict: Option<&'a RateLimitVerdict>,
    pub request_id: Option<&'a str>,
}

/// Compute the headers to set on a response.
pub fn response_headers(
    meta: &ResponseMeta<'_>,
    settings: &DecoratorSettings,
) -> Vec<(HeaderName, HeaderValue)> {
    let mut headers = vec![
        (
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static(cache_policy(meta.path, meta.status)),
        ),
        (
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ),
        (
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ),
        (
            HeaderName::from_static("x-xss-protection"),
            HeaderValue::from_static("1; mode=block"),
        ),
        (
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ),
        (
            HeaderName::from_static("permissions-policy"),
            HeaderValue::from_static(PERMISSIONS_POLICY),
        ),
    ];

    if let Ok(csp) = HeaderValue::from_str(&settings.content_security_policy) {
        headers.push((HeaderName::from_static("content-security-policy"), csp));
    }
    if settings.hsts {
        headers.push((
            HeaderName::from_static("strict-transport-security"),
            HeaderValue::from_static(HSTS),
        ));
    }

    if let Some(verdict) = meta.verdict {
        let remaining = verdict.remaining.min(verdict.limit);
        headers.push((
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderValue::from(verdict.limit),
        ));
        headers.push((
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderValue::from(remaining),
        ));
        headers.push((
            HeaderName::from_static("x-ratelimit-reset"),
            HeaderValue::from(verdict.reset_at.max(0)),
        ));
        if let Some(retry_after) = verdict.retry_after_secs.filter(|_| !verdict.is_allowed()) {
            headers.push((
                HeaderName::from_static("retry-after"),
                HeaderValue::from(retry_after),
            ));
        }
    }

    if let Some(id) = meta.request_id.filter(|id| !id.is_empty()) {
        if let Ok(value) = HeaderValue::from_str(id) {
            headers.push((HeaderName::from_static("x-request-id"), value));
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::VerdictStatus;

    fn verdict(status: VerdictStatus, remaining: u64) -> RateLimitVerdict {
        RateLimitVerdict {
            status,
            class: "api".to_string(),
            limit: 60,
            remaining,
            reset_at: 1_700_000_060,
            retry_after_secs: (status == VerdictStatus::Denied).then_some(60),
        }
    }

    fn header<'a>(headers: &'a [(HeaderName, HeaderValue)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .and_then(|(_, v)| v.to_str().ok())
    }

    #[test]
    fn test_cache_policy_by_resource() {
        assert_eq!(cache_policy("/assets/app.css", 200), "public, max-age=31536000, immutable");
        assert_eq!(cache_policy("/img/Logo.PNG", 200), "public, max-age=31536000, immutable");
        assert_eq!(cache_policy("/api/members", 200), "no-store, private");
        assert_eq!(cache_policy("/auth/login", 200), "no-store, private");
        assert_eq!(cache_policy("/health", 200), "no-cache");
        assert_eq!(cache_policy("/members/42", 200), "no-cache, private");
        assert_eq!(cache_policy("/apiary", 200), "no-cache, private");
    }

    #[test]
    fn test_error_statuses_are_never_cached() {
        assert_eq!(cache_policy("/assets/app.js", 404), "no-store");
        assert_eq!(cache_policy("/health", 503), "no-store");
        assert_eq!(cache_policy("/api/members", 429), "no-store");
    }

    #[test]
    fn test_allowed_verdict_headers() {
        let verdict = verdict(VerdictStatus::Allowed, 59);
        let meta = ResponseMeta {
            path: "/api/ping",
            status: 200,
            verdict: Some(&verdict),
            request_id: Some("req-1"),
        };
        let headers = response_headers(&meta, &DecoratorSettings::default());

        assert_eq!(header(&headers, "x-ratelimit-limit"), Some("60"));
        assert_eq!(header(&headers, "x-ratelimit-remaining"), Some("59"));
        assert_eq!(header(&headers, "x-ratelimit-reset"), Some("1700000060"));
        assert_eq!(header(&headers, "retry-after"), None);
        assert_eq!(header(&headers, "x-request-id"), Some("req-1"));
        assert_eq!(header(&headers, "x-content-type-options"), Some("nosniff"));
        assert_eq!(header(&headers, "x-frame-options"), Some("DENY"));
        assert!(header(&headers, "strict-transport-security").is_some());
        assert!(header(&headers, "content-security-policy").is_some());
    }

    #[test]
    fn test_denied_verdict_adds_retry_after() {
        let verdict = verdict(VerdictStatus::Denied, 0);
        let meta = ResponseMeta {
            path: "/api/ping",
            status: 429,
            verdict: Some(&verdict),
            request_id: None,
        };
        let headers = response_headers(&meta, &DecoratorSettings::default());

        assert_eq!(header(&headers, "retry-after"), Some("60"));
        assert_eq!(header(&headers, "x-ratelimit-remaining"), Some("0"));
        assert_eq!(header(&headers, "cache-control"), Some("no-store"));
        assert_eq!(header(&headers, "x-request-id"), None);
    }

    #[test]
    fn test_remaining_is_clamped() {
        let verdict = verdict(VerdictStatus::Allowed, 500);
        let meta = ResponseMeta {
            path: "/api/ping",
            status: 200,
            verdict: Some(&verdict),
            request_id: None,
        };
        let headers = response_headers(&meta, &DecoratorSettings::default());
        assert_eq!(header(&headers, "x-ratelimit-remaining"), Some("60"));
    }

    #[test]
    fn test_missing_inputs_are_omitted() {
        let settings = DecoratorSettings {
            hsts: false,
            content_security_policy: "bad\nvalue".to_string(),
        };
        let meta = ResponseMeta {
            path: "/",
            status: 200,
            verdict: None,
            request_id: Some("bad\nid"),
        };
        let headers = response_headers(&meta, &settings);

        assert_eq!(header(&headers, "x-ratelimit-limit"), None);
        assert_eq!(header(&headers, "strict-transport-security"), None);
        assert_eq!(header(&headers, "content-security-policy"), None);
        assert_eq!(header(&headers, "x-request-id"), None);
        assert_eq!(header(&headers, "cache-control"), Some("no-cache, private"));
    }
}
