//! Shared state for the middleware and handlers.

use std::sync::Arc;

use crate::config::GuardConfig;
use crate::error::Result;
use crate::ratelimit::RateLimitPolicy;
use crate::security::{AlertSink, LoginGuard, SecurityMonitor};
use crate::store::CounterStore;

use super::auth::SessionRegistry;
use super::decorator::DecoratorSettings;

/// Everything the pipeline needs, shared through an `Arc`.
///
/// All components write to the same counter store.
pub struct GuardState {
    pub policy: RateLimitPolicy,
    pub monitor: Arc<SecurityMonitor>,
    pub login: LoginGuard,
    pub sessions: SessionRegistry,
    pub settings: DecoratorSettings,
    pub trust_forwarded_for: bool,
}

impl GuardState {
    pub fn from_config(
        config: &GuardConfig,
        store: Arc<dyn CounterStore>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self> {
        Ok(Self {
            policy: RateLimitPolicy::new(store.clone(), config.rate_limiting.clone()),
            monitor: Arc::new(SecurityMonitor::new(store.clone(), &config.security)?),
            login: LoginGuard::new(store, alerts, config.login.clone()),
            sessions: SessionRegistry::new(config.accounts.clone()),
            settings: DecoratorSettings::from_config(&config.security),
            trust_forwarded_for: config.server.trust_forwarded_for,
        })
    }
}
