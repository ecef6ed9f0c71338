//! Configuration management for chms-guard.
//!
//! Configuration is read from an optional YAML file and then overridden by
//! `CHMS_GUARD__*` environment variables, e.g.
//! `CHMS_GUARD__SERVER__LISTEN_ADDR=0.0.0.0:8080`.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};
use crate::ratelimit::RateLimitRules;

/// Main configuration for the guard service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Route classes and their limits
    #[serde(default)]
    pub rate_limiting: RateLimitRules,

    /// Request inspection and abuse tracking
    #[serde(default)]
    pub security: SecurityConfig,

    /// Failed-login escalation
    #[serde(default)]
    pub login: LoginConfig,

    /// Accounts accepted by the host binary's login handler
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Log level used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,

    /// Take the client address from `X-Forwarded-For`.
    /// Only enable behind a proxy that overwrites the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_level: default_log_level(),
            json_logs: false,
            trust_forwarded_for: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Deadline for a single store operation in milliseconds
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,

    /// How often expired counters are purged
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_store_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_store_timeout() -> u64 {
    250
}

fn default_sweep_interval() -> u64 {
    30
}

/// Security monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Run signature and abuse checks. Blocked addresses are rejected regardless.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub detect_sql_injection: bool,

    #[serde(default = "default_true")]
    pub detect_xss: bool,

    #[serde(default = "default_true")]
    pub detect_path_traversal: bool,

    #[serde(default = "default_true")]
    pub detect_command_injection: bool,

    #[serde(default = "default_true")]
    pub detect_scanners: bool,

    /// Larger bodies are passed through uninspected
    #[serde(default = "default_max_inspected_body")]
    pub max_inspected_body_bytes: usize,

    /// Requests slower than this are logged
    #[serde(default = "default_slow_request_ms")]
    pub slow_request_ms: u64,

    /// Error responses per address tolerated within `abuse_window_secs`
    #[serde(default = "default_abuse_error_threshold")]
    pub abuse_error_threshold: u64,

    #[serde(default = "default_abuse_window")]
    pub abuse_window_secs: u64,

    /// How long an abusive address stays flagged
    #[serde(default = "default_abuse_flag")]
    pub abuse_flag_secs: u64,

    /// Requests per client and endpoint tolerated within `unusual_access_window_secs`
    #[serde(default = "default_unusual_access_threshold")]
    pub unusual_access_threshold: u64,

    #[serde(default = "default_unusual_access_window")]
    pub unusual_access_window_secs: u64,

    /// Send `Strict-Transport-Security`
    #[serde(default = "default_true")]
    pub hsts: bool,

    /// Value of `Content-Security-Policy`
    #[serde(default = "default_csp")]
    pub content_security_policy: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detect_sql_injection: true,
            detect_xss: true,
            detect_path_traversal: true,
            detect_command_injection: true,
            detect_scanners: true,
            max_inspected_body_bytes: default_max_inspected_body(),
            slow_request_ms: default_slow_request_ms(),
            abuse_error_threshold: default_abuse_error_threshold(),
            abuse_window_secs: default_abuse_window(),
            abuse_flag_secs: default_abuse_flag(),
            unusual_access_threshold: default_unusual_access_threshold(),
            unusual_access_window_secs: default_unusual_access_window(),
            hsts: true,
            content_security_policy: default_csp(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_inspected_body() -> usize {
    64 * 1024
}

fn default_slow_request_ms() -> u64 {
    1000
}

fn default_abuse_error_threshold() -> u64 {
    50
}

fn default_abuse_window() -> u64 {
    300
}

fn default_abuse_flag() -> u64 {
    900
}

fn default_unusual_access_threshold() -> u64 {
    300
}

fn default_unusual_access_window() -> u64 {
    3600
}

fn default_csp() -> String {
    "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; \
     img-src 'self' data:; frame-ancestors 'none'"
        .to_string()
}

/// Failed-login escalation thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginConfig {
    /// Failures per address tolerated before a block
    #[serde(default = "default_address_threshold")]
    pub address_threshold: u64,

    #[serde(default = "default_address_window")]
    pub address_window_secs: u64,

    /// Failures per account tolerated before a warning
    #[serde(default = "default_identity_threshold")]
    pub identity_threshold: u64,

    #[serde(default = "default_identity_window")]
    pub identity_window_secs: u64,

    /// How long an escalated address stays blocked
    #[serde(default = "default_block")]
    pub block_secs: u64,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            address_threshold: default_address_threshold(),
            address_window_secs: default_address_window(),
            identity_threshold: default_identity_threshold(),
            identity_window_secs: default_identity_window(),
            block_secs: default_block(),
        }
    }
}

fn default_address_threshold() -> u64 {
    5
}

fn default_address_window() -> u64 {
    300
}

fn default_identity_threshold() -> u64 {
    3
}

fn default_identity_window() -> u64 {
    900
}

fn default_block() -> u64 {
    3600
}

/// A login accepted by the host binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub user_id: String,
    pub email: String,
    pub password: String,
}

impl GuardConfig {
    /// Load configuration from an optional YAML file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }
        let config: GuardConfig = builder
            .add_source(
                Environment::with_prefix("CHMS_GUARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<GuardConfig>())
            .map_err(|e| GuardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GuardConfig =
            serde_yaml::from_str(yaml).map_err(|e| GuardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.validate()?;

        if self.store.timeout_ms == 0 {
            return Err(GuardError::Config("store.timeout_ms must be positive".into()));
        }
        if self.store.sweep_interval_secs == 0 {
            return Err(GuardError::Config(
                "store.sweep_interval_secs must be positive".into(),
            ));
        }

        let windows = [
            ("security.abuse_window_secs", self.security.abuse_window_secs),
            ("security.abuse_flag_secs", self.security.abuse_flag_secs),
            (
                "security.unusual_access_window_secs",
                self.security.unusual_access_window_secs,
            ),
            ("login.address_window_secs", self.login.address_window_secs),
            ("login.identity_window_secs", self.login.identity_window_secs),
            ("login.block_secs", self.login.block_secs),
        ];
        for (name, value) in windows {
            if value == 0 {
                return Err(GuardError::Config(format!("{} must be positive", name)));
            }
        }

        let mut emails = HashSet::new();
        for account in &self.accounts {
            if account.email.trim().is_empty() || account.password.is_empty() {
                return Err(GuardError::Config(format!(
                    "account {} needs an email and a password",
                    account.user_id
                )));
            }
            if !emails.insert(account.email.trim().to_lowercase()) {
                return Err(GuardError::Config(format!(
                    "duplicate account email: {}",
                    account.email
                )));
            }
        }

        Ok(())
    }
}
