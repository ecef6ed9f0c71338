//! Security monitoring.
//!
//! The [`SecurityMonitor`] inspects requests for attack signatures and
//! consults the counter store for client reputation. The [`LoginGuard`]
//! escalates repeated failed logins into alerts and address blocks, which
//! the monitor then enforces on every request.

mod alert;
mod finding;
mod login;
mod monitor;
mod signatures;

pub use alert::{AlertSink, AlertSubject, EscalationAlert, MemoryAlertSink, TracingAlertSink};
pub use finding::{threat_kinds, Location, SecurityFinding, Severity, ThreatKind};
pub use login::{classify, FailedLoginRecord, LoginGuard, ThreatLevel};
pub use monitor::{normalize_endpoint, Observation, Payload, SecurityMonitor};
pub use signatures::SignatureSet;

use std::net::IpAddr;

use crate::store::{CounterStore, StoreResult};

/// Store key marking an address as blocked after failed logins.
pub(crate) fn block_key(address: &IpAddr) -> String {
    format!("security:block:{}", address)
}

/// Store key marking an address as abusive after repeated error responses.
pub(crate) fn abuse_flag_key(address: &IpAddr) -> String {
    format!("security:abusive:{}", address)
}

/// Whether a flag key is present and unexpired.
pub(crate) async fn is_set(store: &dyn CounterStore, key: &str) -> StoreResult<bool> {
    Ok(store.get(key).await?.is_some_and(|v| v.count > 0))
}
