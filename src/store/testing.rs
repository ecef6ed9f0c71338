//! Test doubles for the counter store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::backend::{Admission, CounterStore, CounterValue, StoreResult};
use super::memory::MemoryCounterStore;
use crate::error::StoreError;

/// A store that fails every operation, as if the backend were down.
pub struct UnavailableStore;

fn down<T>() -> StoreResult<T> {
    Err(StoreError::Unavailable("connection refused".to_string()))
}

#[async_trait]
impl CounterStore for UnavailableStore {
    async fn get(&self, _key: &str) -> StoreResult<Option<CounterValue>> {
        down()
    }

    async fn increment(&self, _key: &str, _ttl: Duration) -> StoreResult<CounterValue> {
        down()
    }

    async fn increment_below(
        &self,
        _key: &str,
        _ceiling: u64,
        _ttl: Duration,
    ) -> StoreResult<Admission> {
        down()
    }

    async fn put_with_ttl(&self, _key: &str, _value: u64, _ttl: Duration) -> StoreResult<()> {
        down()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> StoreResult<bool> {
        down()
    }
}

/// A memory store that fails exactly one call on keys starting with a prefix.
///
/// `fail_on` is the 1-based index of the matching call that errors; every
/// other call goes through to the wrapped store.
pub struct FailOnceStore {
    inner: MemoryCounterStore,
    prefix: &'static str,
    fail_on: usize,
    seen: AtomicUsize,
}

impl FailOnceStore {
    pub fn new(prefix: &'static str, fail_on: usize) -> Self {
        Self {
            inner: MemoryCounterStore::new(),
            prefix,
            fail_on,
            seen: AtomicUsize::new(0),
        }
    }

    fn check(&self, key: &str) -> StoreResult<()> {
        if !key.starts_with(self.prefix) {
            return Ok(());
        }
        let call = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return down();
        }
        Ok(())
    }
}

#[async_trait]
impl CounterStore for FailOnceStore {
    async fn get(&self, key: &str) -> StoreResult<Option<CounterValue>> {
        self.check(key)?;
        self.inner.get(key).await
    }

    async fn increment(&self, key: &str, ttl: Duration) -> StoreResult<CounterValue> {
        self.check(key)?;
        self.inner.increment(key, ttl).await
    }

    async fn increment_below(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> StoreResult<Admission> {
        self.check(key)?;
        self.inner.increment_below(key, ceiling, ttl).await
    }

    async fn put_with_ttl(&self, key: &str, value: u64, ttl: Duration) -> StoreResult<()> {
        self.check(key)?;
        self.inner.put_with_ttl(key, value, ttl).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.check(key)?;
        self.inner.expire(key, ttl).await
    }
}
