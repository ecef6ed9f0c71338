//! Attack signature matching.
//!
//! Signatures are case-insensitive regular expressions compiled once when
//! the monitor is built. Inputs are expected to be percent-decoded already.

use regex::Regex;

use crate::config::SecurityConfig;
use crate::error::{GuardError, Result};

use super::finding::{Location, SecurityFinding, ThreatKind};

const SQL_INJECTION: &[&str] = &[
    r"\bunion\b(\s|/\*.*?\*/)+(all\s+)?select\b",
    r"'\s*(or|and)\s+'?\w+'?\s*(=|like)\s*'?\w+",
    r"\b(or|and)\s+\d+\s*=\s*\d+",
    r";\s*(drop|delete|insert|update|truncate|alter|create|exec)\b",
    r"\b(sleep|benchmark|pg_sleep)\s*\(",
    r"\bwaitfor\s+delay\b",
    r"\binformation_schema\b",
    r"'\s*(--|#)",
    r"\bexec(\s|\+)+(s|x)p_\w+",
];

const XSS: &[&str] = &[
    r"<\s*/?\s*script\b",
    r"(javascript|vbscript)\s*:",
    r"\bon(error|load|click|mouseover|focus|blur|submit|change)\s*=",
    r"<\s*(iframe|object|embed|svg)\b",
    r"document\.(cookie|location)",
    r"\beval\s*\(",
];

const PATH_TRAVERSAL: &[&str] = &[
    r"\.\.[/\\]",
    r"%2e%2e",
    r"%252e",
    r"/etc/(passwd|shadow|hosts)\b",
    r"\b(boot|win)\.ini\b",
    r"\x00",
];

const COMMAND_INJECTION: &[&str] = &[
    r"(;|\|\|?|&&)\s*(cat|ls|rm|wget|curl|bash|sh|nc|netcat|whoami|uname|id|chmod|python|perl)\b",
    r"`[^`]+`",
    r"\$\([^)]*\)",
    r"\$\{IFS\}",
];

const SCANNER_AGENTS: &[&str] = &[
    r"\b(sqlmap|nikto|nmap|masscan|acunetix|nessus|w3af|dirbuster|gobuster|wpscan|havij|zgrab)\b",
];

/// A compiled signature for one threat class.
#[derive(Debug)]
struct Signature {
    kind: ThreatKind,
    pattern: Regex,
}

impl Signature {
    fn compile(kind: ThreatKind, alternatives: &[&str]) -> Result<Self> {
        let source = format!("(?i)(?:{})", alternatives.join(")|(?:"));
        let pattern = Regex::new(&source).map_err(|e| {
            GuardError::Config(format!("invalid {} signature: {}", kind, e))
        })?;
        Ok(Self { kind, pattern })
    }
}

/// The set of enabled content signatures plus the scanner user-agent check.
#[derive(Debug)]
pub struct SignatureSet {
    content: Vec<Signature>,
    scanners: Option<Signature>,
}

impl SignatureSet {
    /// Compile the signatures enabled in the configuration.
    pub fn new(config: &SecurityConfig) -> Result<Self> {
        let mut content = Vec::new();
        if config.detect_sql_injection {
            content.push(Signature::compile(ThreatKind::SqlInjection, SQL_INJECTION)?);
        }
        if config.detect_xss {
            content.push(Signature::compile(ThreatKind::Xss, XSS)?);
        }
        if config.detect_path_traversal {
            content.push(Signature::compile(ThreatKind::PathTraversal, PATH_TRAVERSAL)?);
        }
        if config.detect_command_injection {
            content.push(Signature::compile(
                ThreatKind::CommandInjection,
                COMMAND_INJECTION,
            )?);
        }

        let scanners = if config.detect_scanners {
            Some(Signature::compile(ThreatKind::Scanner, SCANNER_AGENTS)?)
        } else {
            None
        };

        Ok(Self { content, scanners })
    }

    /// Scan one input, returning at most one finding per threat class.
    pub fn scan(&self, location: &Location, input: &str) -> Vec<SecurityFinding> {
        if input.is_empty() {
            return Vec::new();
        }
        self.content
            .iter()
            .filter_map(|signature| {
                signature
                    .pattern
                    .find(input)
                    .map(|m| SecurityFinding::new(signature.kind, location.clone(), m.as_str()))
            })
            .collect()
    }

    /// Check a user agent against known scanning tools.
    pub fn scan_user_agent(&self, user_agent: &str) -> Option<SecurityFinding> {
        let signature = self.scanners.as_ref()?;
        signature.pattern.find(user_agent).map(|m| {
            SecurityFinding::new(
                signature.kind,
                Location::Header("user-agent".to_string()),
                m.as_str(),
            )
        })
    }
}
