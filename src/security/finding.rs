//! Security findings produced by the monitor.

use std::fmt;

use serde::Serialize;

/// Severity of a finding or alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Classification of a detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatKind {
    SqlInjection,
    Xss,
    PathTraversal,
    CommandInjection,
    /// Known vulnerability scanner user agent
    Scanner,
    /// Address under a failed-login block
    BlockedAddress,
    /// Address flagged by earlier error-rate observations
    AbusiveClient,
}

impl ThreatKind {
    /// Stable name reported to clients and used as a metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatKind::SqlInjection => "sql_injection",
            ThreatKind::Xss => "xss",
            ThreatKind::PathTraversal => "path_traversal",
            ThreatKind::CommandInjection => "command_injection",
            ThreatKind::Scanner => "scanner",
            ThreatKind::BlockedAddress => "blocked_address",
            ThreatKind::AbusiveClient => "abusive_client",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ThreatKind::SqlInjection | ThreatKind::CommandInjection => Severity::Critical,
            ThreatKind::Xss | ThreatKind::PathTraversal | ThreatKind::BlockedAddress => {
                Severity::High
            }
            ThreatKind::Scanner | ThreatKind::AbusiveClient => Severity::Medium,
        }
    }
}

impl fmt::Display for ThreatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in the request a finding was made.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Path,
    Query(String),
    Header(String),
    Body,
    /// Reputation of the client itself
    Client,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Path => f.write_str("path"),
            Location::Query(name) => write!(f, "query:{}", name),
            Location::Header(name) => write!(f, "header:{}", name),
            Location::Body => f.write_str("body"),
            Location::Client => f.write_str("client"),
        }
    }
}

/// Longest evidence fragment kept for server-side logs.
const MAX_EVIDENCE_LEN: usize = 80;

/// A detected anomaly in a request.
///
/// Evidence is for server-side logs only and never serialized to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityFinding {
    pub kind: ThreatKind,
    pub severity: Severity,
    pub location: Location,
    pub evidence: String,
}

impl SecurityFinding {
    pub fn new(kind: ThreatKind, location: Location, evidence: &str) -> Self {
        let evidence = evidence.chars().take(MAX_EVIDENCE_LEN).collect();
        Self {
            kind,
            severity: kind.severity(),
            location,
            evidence,
        }
    }
}

/// Unique classifications in order of first appearance.
pub fn threat_kinds(findings: &[SecurityFinding]) -> Vec<ThreatKind> {
    let mut kinds = Vec::new();
    for finding in findings {
        if !kinds.contains(&finding.kind) {
            kinds.push(finding.kind);
        }
    }
    kinds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evidence_is_truncated() {
        let long = "x".repeat(500);
        let finding = SecurityFinding::new(ThreatKind::Xss, Location::Body, &long);
        assert_eq!(finding.evidence.len(), MAX_EVIDENCE_LEN);
        assert_eq!(finding.severity, Severity::High);
    }

    #[test]
    fn test_threat_kinds_are_deduplicated() {
        let findings = vec![
            SecurityFinding::new(ThreatKind::SqlInjection, Location::Path, "a"),
            SecurityFinding::new(ThreatKind::Xss, Location::Body, "b"),
            SecurityFinding::new(ThreatKind::SqlInjection, Location::Query("id".into()), "c"),
        ];
        assert_eq!(
            threat_kinds(&findings),
            vec![ThreatKind::SqlInjection, ThreatKind::Xss]
        );
    }

    #[test]
    fn test_names_are_stable() {
        assert_eq!(ThreatKind::SqlInjection.to_string(), "sql_injection");
        assert_eq!(
            serde_json::to_string(&ThreatKind::BlockedAddress).unwrap(),
            "\"blocked_address\""
        );
        assert_eq!(Location::Query("id".into()).to_string(), "query:id");
        assert!(Severity::Critical > Severity::Medium);
    }
}
