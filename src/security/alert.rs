//! Escalation alerts raised by the failed-login guard.

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, warn};

use super::finding::Severity;

/// What triggered an escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertSubject {
    /// Too many failed logins from one network address
    BruteForceAddress { network_address: IpAddr },
    /// Too many failed logins against one account
    TargetedIdentity { email: String },
}

/// An internal signal that a brute-force threshold was crossed.
///
/// Alerts are never returned to API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscalationAlert {
    #[serde(flatten)]
    pub subject: AlertSubject,
    pub severity: Severity,
    /// Failures counted in the window when the alert fired
    pub failures: u64,
    pub window_secs: u64,
    /// Length of the block applied, if any
    pub block_secs: Option<u64>,
    pub raised_at: DateTime<Utc>,
}

/// Destination for escalation alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver an alert. Delivery failures are the sink's own concern.
    async fn raise(&self, alert: EscalationAlert);
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn raise(&self, alert: EscalationAlert) {
        let subject = match &alert.subject {
            AlertSubject::BruteForceAddress { network_address } => network_address.to_string(),
            AlertSubject::TargetedIdentity { email } => email.clone(),
        };

        if alert.severity >= Severity::High {
            error!(
                target: "chms_guard::alerts",
                subject = %subject,
                severity = %alert.severity,
                failures = alert.failures,
                window_secs = alert.window_secs,
                block_secs = ?alert.block_secs,
                "Brute-force login activity escalated"
            );
        } else {
            warn!(
                target: "chms_guard::alerts",
                subject = %subject,
                severity = %alert.severity,
                failures = alert.failures,
                window_secs = alert.window_secs,
                "Repeated failed logins for account"
            );
        }
    }
}

/// Keeps alerts in memory, for embedding applications that poll and for tests.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<EscalationAlert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every alert raised so far.
    pub fn alerts(&self) -> Vec<EscalationAlert> {
        self.alerts.lock().clone()
    }

    /// Remove and return all alerts.
    pub fn drain(&self) -> Vec<EscalationAlert> {
        std::mem::take(&mut *self.alerts.lock())
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    async fn raise(&self, alert: EscalationAlert) {
        self.alerts.lock().push(alert);
    }
}
