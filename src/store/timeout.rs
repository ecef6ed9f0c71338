//! Deadline wrapper for counter stores.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::backend::{Admission, CounterStore, CounterValue, StoreResult};
use crate::error::StoreError;

/// Wraps a counter store and turns slow round trips into
/// [`StoreError::Timeout`].
pub struct TimeoutStore {
    inner: Arc<dyn CounterStore>,
    timeout: Duration,
}

impl TimeoutStore {
    /// Create a new wrapper around `inner`.
    pub fn new(inner: Arc<dyn CounterStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, operation: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>> + Send,
    {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl CounterStore for TimeoutStore {
    async fn get(&self, key: &str) -> StoreResult<Option<CounterValue>> {
        self.bounded(self.inner.get(key)).await
    }

    async fn increment(&self, key: &str, ttl: Duration) -> StoreResult<CounterValue> {
        self.bounded(self.inner.increment(key, ttl)).await
    }

    async fn increment_below(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> StoreResult<Admission> {
        self.bounded(self.inner.increment_below(key, ceiling, ttl))
            .await
    }

    async fn put_with_ttl(&self, key: &str, value: u64, ttl: Duration) -> StoreResult<()> {
        self.bounded(self.inner.put_with_ttl(key, value, ttl)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.bounded(self.inner.expire(key, ttl)).await
    }
}
