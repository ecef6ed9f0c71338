//! Failed-login escalation.
//!
//! Every failed login bumps two independent counters: one per network
//! address and one per account email. An address that exceeds its threshold
//! is blocked for a while and raises a high-severity alert; an account that
//! exceeds its threshold only raises a warning. Counters reset by expiring,
//! there is no explicit transition back to normal.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::LoginConfig;
use crate::store::{CounterStore, StoreResult};
use crate::telemetry;

use super::alert::{AlertSink, AlertSubject, EscalationAlert};
use super::finding::Severity;
use super::{block_key, is_set};

/// Where a subject stands relative to its failure threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    /// No failures in the current window
    Normal,
    /// Failures seen, threshold not exceeded
    Warned,
    /// Threshold exceeded within the window
    Escalated,
}

/// Classify a failure count against a threshold.
pub fn classify(count: u64, threshold: u64) -> ThreatLevel {
    match count {
        0 => ThreatLevel::Normal,
        c if c > threshold => ThreatLevel::Escalated,
        _ => ThreatLevel::Warned,
    }
}

/// Snapshot of the counters after recording a failed login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedLoginRecord {
    pub email: String,
    pub network_address: IpAddr,
    pub address_failures: u64,
    pub identity_failures: u64,
    pub address_level: ThreatLevel,
    pub identity_level: ThreatLevel,
    /// Whether the address is under a block after this failure
    pub blocked: bool,
}

/// Tracks failed logins and escalates brute-force attempts.
pub struct LoginGuard {
    store: Arc<dyn CounterStore>,
    alerts: Arc<dyn AlertSink>,
    config: LoginConfig,
}

impl LoginGuard {
    pub fn new(store: Arc<dyn CounterStore>, alerts: Arc<dyn AlertSink>, config: LoginConfig) -> Self {
        Self {
            store,
            alerts,
            config,
        }
    }

    /// Record a failed login for `email` from `address`.
    ///
    /// The address and identity counters are tracked independently; a store
    /// failure on one does not stop the other from escalating. While a
    /// counter is over its threshold, every failure re-asserts the block or
    /// warning marker, and the alert is raised only when the marker is new,
    /// so alerts fire once per window even if an earlier write was lost.
    pub async fn record_failure(&self, email: &str, address: IpAddr) -> StoreResult<FailedLoginRecord> {
        let email = email.trim().to_lowercase();
        telemetry::record_login_failure();

        let by_address = self.track_address(address).await;
        let by_identity = self.track_identity(&email).await;
        let (address_failures, blocked) = by_address?;
        let identity_failures = by_identity?;

        let address_level = classify(address_failures, self.config.address_threshold);
        let identity_level = classify(identity_failures, self.config.identity_threshold);

        debug!(
            network_address = %address,
            address_failures,
            identity_failures,
            ?address_level,
            ?identity_level,
            "Recorded failed login"
        );

        Ok(FailedLoginRecord {
            email,
            network_address: address,
            address_failures,
            identity_failures,
            address_level,
            identity_level,
            blocked,
        })
    }

    /// Count the failure against the address and block it once escalated.
    async fn track_address(&self, address: IpAddr) -> StoreResult<(u64, bool)> {
        let failures = self
            .store
            .increment(
                &address_key(&address),
                Duration::from_secs(self.config.address_window_secs),
            )
            .await?
            .count;
        if failures <= self.config.address_threshold {
            return Ok((failures, false));
        }

        // Set-if-absent, so only the first successful write raises the alert
        let placed = self
            .store
            .increment_below(
                &block_key(&address),
                1,
                Duration::from_secs(self.config.block_secs),
            )
            .await?;
        if placed.admitted {
            self.alerts
                .raise(EscalationAlert {
                    subject: AlertSubject::BruteForceAddress {
                        network_address: address,
                    },
                    severity: Severity::High,
                    failures,
                    window_secs: self.config.address_window_secs,
                    block_secs: Some(self.config.block_secs),
                    raised_at: Utc::now(),
                })
                .await;
            info!(
                network_address = %address,
                block_secs = self.config.block_secs,
                "Blocked address after repeated failed logins"
            );
        }
        Ok((failures, true))
    }

    /// Count the failure against the account and warn once escalated.
    async fn track_identity(&self, email: &str) -> StoreResult<u64> {
        let window = Duration::from_secs(self.config.identity_window_secs);
        let failures = self.store.increment(&identity_key(email), window).await?.count;
        if failures <= self.config.identity_threshold {
            return Ok(failures);
        }

        let marked = self
            .store
            .increment_below(&identity_warned_key(email), 1, window)
            .await?;
        if marked.admitted {
            self.alerts
                .raise(EscalationAlert {
                    subject: AlertSubject::TargetedIdentity {
                        email: email.to_string(),
                    },
                    severity: Severity::Medium,
                    failures,
                    window_secs: self.config.identity_window_secs,
                    block_secs: None,
                    raised_at: Utc::now(),
                })
                .await;
        }
        Ok(failures)
    }

    /// Check whether an address is currently blocked.
    pub async fn is_blocked(&self, address: IpAddr) -> StoreResult<bool> {
        is_set(self.store.as_ref(), &block_key(&address)).await
    }

    /// Current threat level of an address.
    pub async fn address_level(&self, address: IpAddr) -> StoreResult<ThreatLevel> {
        let count = self
            .store
            .get(&address_key(&address))
            .await?
            .map_or(0, |v| v.count);
        Ok(classify(count, self.config.address_threshold))
    }
}

fn address_key(address: &IpAddr) -> String {
    format!("login:failed:ip:{}", address)
}

fn identity_key(email: &str) -> String {
    format!("login:failed:email:{}", email)
}

fn identity_warned_key(email: &str) -> String {
    format!("login:warned:email:{}", email)
}
