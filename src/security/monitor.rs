//! Request inspection and post-response observation.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use url::form_urlencoded;

use crate::config::SecurityConfig;
use crate::context::{RequestContext, UserId};
use crate::error::Result;
use crate::store::{CounterStore, StoreResult};
use crate::telemetry;

use super::finding::{Location, SecurityFinding, ThreatKind};
use super::signatures::SignatureSet;
use super::{abuse_flag_key, block_key, is_set};

/// Headers whose values are matched against content signatures.
const INSPECTED_HEADERS: &[&str] = &["user-agent", "referer", "x-forwarded-host"];

/// A buffered request body, tagged by how it should be parsed.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Json(&'a [u8]),
    Form(&'a [u8]),
}

/// What happened to a request, recorded after the response was produced.
#[derive(Debug, Clone)]
pub struct Observation {
    pub endpoint: String,
    /// Rate limit class of the endpoint, the only route label on metrics
    pub route_class: String,
    pub method: String,
    pub status: u16,
    pub latency: Duration,
    pub identity: Option<UserId>,
    pub network_address: IpAddr,
    /// Client user agent
    pub client_signature: Option<String>,
}

impl Observation {
    pub fn from_context(ctx: &RequestContext, status: u16, latency: Duration) -> Self {
        Self {
            endpoint: ctx.path.clone(),
            route_class: "other".to_string(),
            method: ctx.method.clone(),
            status,
            latency,
            identity: ctx.identity.clone(),
            network_address: ctx.network_address,
            client_signature: ctx.user_agent().map(str::to_string),
        }
    }

    pub fn with_route_class(mut self, class: &str) -> Self {
        self.route_class = class.to_string();
        self
    }
}

/// Inspects requests for attacks and tracks client behaviour over time.
pub struct SecurityMonitor {
    signatures: SignatureSet,
    store: Arc<dyn CounterStore>,
    config: SecurityConfig,
}

impl SecurityMonitor {
    pub fn new(store: Arc<dyn CounterStore>, config: &SecurityConfig) -> Result<Self> {
        Ok(Self {
            signatures: SignatureSet::new(config)?,
            store,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Inspect a request. Any finding means the request must be rejected.
    ///
    /// Blocked addresses are always rejected, even with signature
    /// inspection disabled. Store failures during reputation checks are
    /// logged and the check is skipped.
    pub async fn inspect(
        &self,
        ctx: &RequestContext,
        payload: Option<Payload<'_>>,
    ) -> Vec<SecurityFinding> {
        let mut findings = self.reputation(ctx.network_address).await;
        if self.config.enabled {
            findings.extend(self.scan_request(ctx, payload));
        }

        let mut seen = HashSet::new();
        findings.retain(|f| seen.insert((f.kind, f.location.clone())));

        for finding in &findings {
            warn!(
                request_id = %ctx.request_id,
                network_address = %ctx.network_address,
                method = %ctx.method,
                path = %ctx.path,
                kind = %finding.kind,
                severity = %finding.severity,
                location = %finding.location,
                evidence = %finding.evidence,
                "Security finding"
            );
            telemetry::record_finding(finding.kind.as_str());
        }
        findings
    }

    /// Match the request against content signatures only.
    pub fn scan_request(
        &self,
        ctx: &RequestContext,
        payload: Option<Payload<'_>>,
    ) -> Vec<SecurityFinding> {
        let mut findings = Vec::new();

        let path = percent_decode_str(&ctx.path).decode_utf8_lossy();
        findings.extend(self.signatures.scan(&Location::Path, &path));

        if let Some(query) = &ctx.query {
            for (name, value) in form_urlencoded::parse(query.as_bytes()) {
                let location = Location::Query(name.to_string());
                findings.extend(self.signatures.scan(&location, &name));
                findings.extend(self.signatures.scan(&location, &value));
            }
        }

        for name in INSPECTED_HEADERS {
            if let Some(value) = ctx.header(name) {
                findings.extend(self.signatures.scan(&Location::Header(name.to_string()), value));
            }
        }
        if let Some(agent) = ctx.user_agent() {
            findings.extend(self.signatures.scan_user_agent(agent));
        }

        match payload {
            Some(Payload::Json(body)) => self.scan_json(body, &mut findings),
            Some(Payload::Form(body)) => {
                for (name, value) in form_urlencoded::parse(body) {
                    findings.extend(self.signatures.scan(&Location::Body, &name));
                    findings.extend(self.signatures.scan(&Location::Body, &value));
                }
            }
            None => {}
        }

        findings
    }

    fn scan_json(&self, body: &[u8], findings: &mut Vec<SecurityFinding>) {
        let root = match serde_json::from_slice::<Value>(body) {
            Ok(value) => value,
            Err(_) => {
                // Not valid JSON, inspect it as text
                let text = String::from_utf8_lossy(body);
                findings.extend(self.signatures.scan(&Location::Body, &text));
                return;
            }
        };

        let mut pending = vec![&root];
        while let Some(value) = pending.pop() {
            match value {
                Value::String(s) => findings.extend(self.signatures.scan(&Location::Body, s)),
                Value::Array(items) => pending.extend(items),
                Value::Object(fields) => {
                    for (key, item) in fields {
                        findings.extend(self.signatures.scan(&Location::Body, key));
                        pending.push(item);
                    }
                }
                _ => {}
            }
        }
    }

    async fn reputation(&self, address: IpAddr) -> Vec<SecurityFinding> {
        let mut findings = Vec::new();
        let evidence = address.to_string();

        match is_set(self.store.as_ref(), &block_key(&address)).await {
            Ok(true) => findings.push(SecurityFinding::new(
                ThreatKind::BlockedAddress,
                Location::Client,
                &evidence,
            )),
            Ok(false) => {}
            Err(e) => self.store_failed("block lookup", &e),
        }

        if self.config.enabled {
            match is_set(self.store.as_ref(), &abuse_flag_key(&address)).await {
                Ok(true) => findings.push(SecurityFinding::new(
                    ThreatKind::AbusiveClient,
                    Location::Client,
                    &evidence,
                )),
                Ok(false) => {}
                Err(e) => self.store_failed("abuse lookup", &e),
            }
        }

        findings
    }

    fn store_failed(&self, operation: &str, err: &crate::error::StoreError) {
        error!(
            target: "chms_guard::ops",
            operation,
            error = %err,
            "Counter store failure in security monitor, skipping check"
        );
        telemetry::record_store_failure("security");
    }

    /// Record performance and error-rate data for a finished request.
    ///
    /// Returns `true` when this observation newly flagged the address as
    /// abusive.
    pub async fn record_api_usage(&self, obs: &Observation) -> StoreResult<bool> {
        let endpoint = normalize_endpoint(&obs.endpoint);
        telemetry::record_request(&obs.route_class, &obs.method, obs.status, obs.latency);

        if obs.latency > Duration::from_millis(self.config.slow_request_ms) {
            warn!(
                endpoint = %endpoint,
                method = %obs.method,
                status = obs.status,
                latency_ms = obs.latency.as_millis() as u64,
                "Slow request"
            );
        }

        if obs.status < 400 {
            return Ok(false);
        }

        let errors = self
            .store
            .increment(
                &error_count_key(&obs.network_address),
                Duration::from_secs(self.config.abuse_window_secs),
            )
            .await?;
        if errors.count <= self.config.abuse_error_threshold {
            return Ok(false);
        }

        // Set-if-absent: a lost write is retried by the next error
        let flagged = self
            .store
            .increment_below(
                &abuse_flag_key(&obs.network_address),
                1,
                Duration::from_secs(self.config.abuse_flag_secs),
            )
            .await?;
        if !flagged.admitted {
            return Ok(false);
        }
        warn!(
            network_address = %obs.network_address,
            errors = errors.count,
            window_secs = self.config.abuse_window_secs,
            flag_secs = self.config.abuse_flag_secs,
            "Flagged address as abusive"
        );
        Ok(true)
    }

    /// Track how often a client hits one endpoint.
    ///
    /// Returns `true` on the request that crosses the unusual-access
    /// threshold, which happens at most once per window.
    pub async fn record_access(&self, obs: &Observation) -> StoreResult<bool> {
        let endpoint = normalize_endpoint(&obs.endpoint);
        let subject = match &obs.identity {
            Some(user) => format!("user:{}", user),
            None => format!("ip:{}", obs.network_address),
        };
        let key = format!("security:access:{}:{}:{}", subject, obs.method, endpoint);

        let hits = self
            .store
            .increment(&key, Duration::from_secs(self.config.unusual_access_window_secs))
            .await?;
        if hits.count != self.config.unusual_access_threshold + 1 {
            return Ok(false);
        }

        warn!(
            subject = %subject,
            method = %obs.method,
            endpoint = %endpoint,
            hits = hits.count,
            window_secs = self.config.unusual_access_window_secs,
            client_signature = obs.client_signature.as_deref().unwrap_or("-"),
            "Unusual access pattern"
        );
        telemetry::record_unusual_access(&obs.route_class);
        Ok(true)
    }

    /// Record an observation in the background. Failures are logged only.
    pub fn observe(self: &Arc<Self>, obs: Observation) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let (usage, access) =
                futures::join!(monitor.record_api_usage(&obs), monitor.record_access(&obs));
            for result in [usage, access] {
                if let Err(e) = result {
                    error!(
                        target: "chms_guard::ops",
                        endpoint = %obs.endpoint,
                        error = %e,
                        "Failed to record request observation"
                    );
                    telemetry::record_store_failure("observation");
                }
            }
            debug!(endpoint = %obs.endpoint, status = obs.status, "Recorded observation");
        })
    }
}

fn error_count_key(address: &IpAddr) -> String {
    format!("security:errors:{}", address)
}

/// Collapse identifiers in a path so counters group by route.
///
/// Numeric segments become `{id}` and UUID segments become `{uuid}`.
pub fn normalize_endpoint(path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();
    let segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            if segment.bytes().all(|b| b.is_ascii_digit()) {
                "{id}"
            } else if segment.len() == 36 && uuid::Uuid::parse_str(segment).is_ok() {
                "{uuid}"
            } else {
                segment
            }
        })
        .collect();
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{FailOnceStore, UnavailableStore};
    use crate::store::MemoryCounterStore;

    fn addr() -> IpAddr {
        "198.51.100.7".parse().unwrap()
    }

    fn monitor_with(config: SecurityConfig) -> (SecurityMonitor, Arc<MemoryCounterStore>) {
        let store = Arc::new(MemoryCounterStore::new());
        let monitor = SecurityMonitor::new(store.clone(), &config).unwrap();
        (monitor, store)
    }

    fn monitor() -> (SecurityMonitor, Arc<MemoryCounterStore>) {
        monitor_with(SecurityConfig::default())
    }

    fn kinds(findings: &[SecurityFinding]) -> Vec<ThreatKind> {
        findings.iter().map(|f| f.kind).collect()
    }

    fn observation(endpoint: &str, status: u16) -> Observation {
        let ctx = RequestContext::new(addr(), "GET", endpoint).with_header("User-Agent", "curl/8.0");
        Observation::from_context(&ctx, status, Duration::from_millis(12))
    }

    #[tokio::test]
    async fn test_benign_request_passes() {
        let (monitor, _) = monitor();
        let ctx = RequestContext::new(addr(), "GET", "/api/members/42")
            .with_query("page=2&sort=last_name")
            .with_header("User-Agent", "Mozilla/5.0 (X11; Linux x86_64)")
            .with_header("Referer", "https://church.example.org/members");
        let body = br#"{"first_name": "John", "last_name": "O'Neil", "tags": ["choir", "usher"]}"#;

        assert!(monitor.inspect(&ctx, Some(Payload::Json(body))).await.is_empty());
    }

    #[tokio::test]
    async fn test_sql_injection_in_query() {
        let (monitor, _) = monitor();
        let ctx = RequestContext::new(addr(), "GET", "/api/members")
            .with_query("id=1%27%20OR%20%271%27%3D%271");

        let findings = monitor.inspect(&ctx, None).await;
        assert_eq!(kinds(&findings), vec![ThreatKind::SqlInjection]);
        assert_eq!(findings[0].location, Location::Query("id".to_string()));
    }

    #[tokio::test]
    async fn test_encoded_path_traversal() {
        let (monitor, _) = monitor();
        let ctx = RequestContext::new(addr(), "GET", "/files/%2e%2e/%2e%2e/etc/passwd");

        let findings = monitor.inspect(&ctx, None).await;
        assert_eq!(kinds(&findings), vec![ThreatKind::PathTraversal]);
        assert_eq!(findings[0].location, Location::Path);
    }

    #[tokio::test]
    async fn test_nested_json_body() {
        let (monitor, _) = monitor();
        let ctx = RequestContext::new(addr(), "POST", "/api/notes");
        let body = br#"{"note": {"lines": ["hello", "<script>alert(1)</script>"]}, "x": "<svg onload=1>"}"#;

        let findings = monitor.inspect(&ctx, Some(Payload::Json(body))).await;
        // Both hits share a location and collapse into one finding
        assert_eq!(kinds(&findings), vec![ThreatKind::Xss]);
        assert_eq!(findings[0].location, Location::Body);
    }

    #[tokio::test]
    async fn test_form_body() {
        let (monitor, _) = monitor();
        let ctx = RequestContext::new(addr(), "POST", "/members/search");

        let findings = monitor
            .inspect(&ctx, Some(Payload::Form(b"name=x&cmd=a%3B+cat+%2Fetc%2Fhosts")))
            .await;
        assert!(kinds(&findings).contains(&ThreatKind::CommandInjection));
    }

    #[tokio::test]
    async fn test_scanner_user_agent() {
        let (monitor, _) = monitor();
        let ctx = RequestContext::new(addr(), "GET", "/").with_header("User-Agent", "sqlmap/1.7.2");

        let findings = monitor.inspect(&ctx, None).await;
        assert_eq!(kinds(&findings), vec![ThreatKind::Scanner]);
    }

    #[tokio::test]
    async fn test_blocked_address_rejected_even_when_disabled() {
        let (monitor, store) = monitor_with(SecurityConfig {
            enabled: false,
            ..SecurityConfig::default()
        });
        store
            .put_with_ttl(&block_key(&addr()), 1, Duration::from_secs(3600))
            .await
            .unwrap();

        let ctx = RequestContext::new(addr(), "POST", "/auth/login").with_query("q=<script>");
        let findings = monitor.inspect(&ctx, None).await;
        assert_eq!(kinds(&findings), vec![ThreatKind::BlockedAddress]);
        assert_eq!(findings[0].location, Location::Client);
    }

    #[tokio::test]
    async fn test_error_rate_flags_abusive_client() {
        let (monitor, _) = monitor_with(SecurityConfig {
            abuse_error_threshold: 3,
            ..SecurityConfig::default()
        });
        let ctx = RequestContext::new(addr(), "GET", "/api/ping");

        for _ in 0..3 {
            assert!(!monitor.record_api_usage(&observation("/api/missing", 404)).await.unwrap());
        }
        // Successes do not count
        assert!(!monitor.record_api_usage(&observation("/api/ping", 200)).await.unwrap());
        assert!(monitor.inspect(&ctx, None).await.is_empty());

        assert!(monitor.record_api_usage(&observation("/api/missing", 500)).await.unwrap());
        assert_eq!(kinds(&monitor.inspect(&ctx, None).await), vec![ThreatKind::AbusiveClient]);

        // Already flagged for this window
        assert!(!monitor.record_api_usage(&observation("/api/missing", 404)).await.unwrap());
    }

    #[tokio::test]
    async fn test_lost_abuse_flag_write_is_retried() {
        let store = Arc::new(FailOnceStore::new("security:abusive:", 1));
        let config = SecurityConfig {
            abuse_error_threshold: 2,
            ..SecurityConfig::default()
        };
        let monitor = SecurityMonitor::new(store, &config).unwrap();

        for _ in 0..2 {
            assert!(!monitor.record_api_usage(&observation("/api/missing", 404)).await.unwrap());
        }
        // The crossing write fails
        assert!(monitor.record_api_usage(&observation("/api/missing", 404)).await.is_err());

        assert!(monitor.record_api_usage(&observation("/api/missing", 404)).await.unwrap());
        let ctx = RequestContext::new(addr(), "GET", "/api/ping");
        assert_eq!(kinds(&monitor.inspect(&ctx, None).await), vec![ThreatKind::AbusiveClient]);
        assert!(!monitor.record_api_usage(&observation("/api/missing", 404)).await.unwrap());
    }

    #[test]
    fn test_request_metrics_labelled_by_route_class() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let (monitor, _) = monitor();

        let hostile = observation("/api/members/1'--/random-8f3a", 200).with_route_class("api");
        let unlabelled = observation("/wp-admin/setup.php", 200);
        metrics::with_local_recorder(&recorder, || {
            futures::executor::block_on(async {
                monitor.record_api_usage(&hostile).await.unwrap();
                monitor.record_api_usage(&unlabelled).await.unwrap();
            })
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"route_class="api""#));
        assert!(rendered.contains(r#"route_class="other""#));
        assert!(!rendered.contains("members"));
        assert!(!rendered.contains("wp-admin"));
    }

    #[tokio::test]
    async fn test_unusual_access_fires_once_per_window() {
        let (monitor, _) = monitor_with(SecurityConfig {
            unusual_access_threshold: 2,
            ..SecurityConfig::default()
        });

        // Different ids normalize to one endpoint
        assert!(!monitor.record_access(&observation("/api/members/1", 200)).await.unwrap());
        assert!(!monitor.record_access(&observation("/api/members/2", 200)).await.unwrap());
        assert!(monitor.record_access(&observation("/api/members/3", 200)).await.unwrap());
        assert!(!monitor.record_access(&observation("/api/members/4", 200)).await.unwrap());

        assert!(!monitor.record_access(&observation("/api/households", 200)).await.unwrap());
    }

    #[tokio::test]
    async fn test_observe_runs_in_background() {
        let store = Arc::new(MemoryCounterStore::new());
        let config = SecurityConfig {
            abuse_error_threshold: 0,
            ..SecurityConfig::default()
        };
        let monitor = Arc::new(SecurityMonitor::new(store, &config).unwrap());

        monitor.observe(observation("/api/missing", 404)).await.unwrap();

        let ctx = RequestContext::new(addr(), "GET", "/api/ping");
        assert_eq!(kinds(&monitor.inspect(&ctx, None).await), vec![ThreatKind::AbusiveClient]);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_signature_checks() {
        let monitor =
            Arc::new(SecurityMonitor::new(Arc::new(UnavailableStore), &SecurityConfig::default()).unwrap());

        let clean = RequestContext::new(addr(), "GET", "/api/ping");
        assert!(monitor.inspect(&clean, None).await.is_empty());

        let hostile = RequestContext::new(addr(), "GET", "/api/ping").with_query("q=<script>");
        assert_eq!(kinds(&monitor.inspect(&hostile, None).await), vec![ThreatKind::Xss]);

        assert!(monitor.record_api_usage(&observation("/x", 500)).await.is_err());
        // Background failures are swallowed
        monitor.observe(observation("/x", 500)).await.unwrap();
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("/api/members/42"), "/api/members/{id}");
        assert_eq!(
            normalize_endpoint("/api/households/3f2504e0-4f89-11d3-9a0c-0305e82c3301/members"),
            "/api/households/{uuid}/members"
        );
        assert_eq!(normalize_endpoint("/api/ping?x=1"), "/api/ping");
        assert_eq!(normalize_endpoint("/"), "/");
        assert_eq!(normalize_endpoint("/api/v2/"), "/api/v2");
    }
}
