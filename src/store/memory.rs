//! In-memory counter store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::backend::{Admission, CounterStore, CounterValue, StoreResult};

/// A single counter slot.
#[derive(Debug, Clone, Copy)]
struct Slot {
    count: u64,
    expires_at: Option<Instant>,
}

impl Slot {
    fn fresh(now: Instant, ttl: Duration) -> Self {
        Self {
            count: 0,
            expires_at: Some(now + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    fn ttl(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }

    fn snapshot(&self, now: Instant) -> CounterValue {
        CounterValue {
            count: self.count,
            ttl: self.ttl(now),
        }
    }
}

/// A counter store backed by a concurrent hash map.
///
/// Each operation holds the shard lock for its key for the whole
/// read-modify-write, which makes the conditional increment atomic with
/// respect to other tasks touching the same key. Expired slots are reset
/// lazily on access and removed by [`MemoryCounterStore::purge_expired`].
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    slots: DashMap<String, Slot>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots currently held, including expired ones not yet purged.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Remove every expired slot, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.slots.len())
    }

    /// Clear all counters.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.slots.clear();
    }

    /// Spawn a background task that purges expired slots every `interval`.
    ///
    /// The task holds a weak reference and stops once the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    debug!("Counter store dropped, stopping sweeper");
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    trace!(purged = purged, "Purged expired counters");
                }
            }
        })
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> StoreResult<Option<CounterValue>> {
        let now = Instant::now();
        Ok(self
            .slots
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.snapshot(now)))
    }

    async fn increment(&self, key: &str, ttl: Duration) -> StoreResult<CounterValue> {
        let now = Instant::now();
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::fresh(now, ttl));

        if slot.is_expired(now) {
            *slot = Slot::fresh(now, ttl);
        }
        slot.count += 1;

        Ok(slot.snapshot(now))
    }

    async fn increment_below(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> StoreResult<Admission> {
        let now = Instant::now();
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::fresh(now, ttl));

        if slot.is_expired(now) {
            *slot = Slot::fresh(now, ttl);
        }

        let admitted = slot.count < ceiling;
        if admitted {
            slot.count += 1;
        }

        Ok(Admission {
            admitted,
            count: slot.count,
            ttl: slot.ttl(now),
        })
    }

    async fn put_with_ttl(&self, key: &str, value: u64, ttl: Duration) -> StoreResult<()> {
        let now = Instant::now();
        self.slots.insert(
            key.to_string(),
            Slot {
                count: value,
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        match self.slots.get_mut(key) {
            Some(mut slot) if !slot.is_expired(now) => {
                slot.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
