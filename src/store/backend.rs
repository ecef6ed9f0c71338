//! Counter store trait for abstracting in-memory and remote implementations.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Result type for counter store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A counter together with the time left before it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterValue {
    /// Current count
    pub count: u64,
    /// Time until the counter expires, `None` if it never expires
    pub ttl: Option<Duration>,
}

/// Outcome of a conditional increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Whether the counter was below the ceiling and got incremented
    pub admitted: bool,
    /// Count after the operation (unchanged when not admitted)
    pub count: u64,
    /// Time until the counter expires
    pub ttl: Option<Duration>,
}

/// Trait for shared counter stores with TTL semantics.
///
/// Every operation is atomic per key. Implementations must never split
/// `increment` or `increment_below` into a read followed by a write.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read a counter. Expired counters are reported as absent.
    async fn get(&self, key: &str) -> StoreResult<Option<CounterValue>>;

    /// Increment a counter, creating it with `ttl` when absent or expired.
    ///
    /// The TTL of an existing counter is left untouched.
    async fn increment(&self, key: &str, ttl: Duration) -> StoreResult<CounterValue>;

    /// Increment a counter only while it is below `ceiling`.
    ///
    /// The check and the increment happen as one step, so concurrent callers
    /// sharing a key can never push the count past the ceiling.
    async fn increment_below(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> StoreResult<Admission>;

    /// Overwrite a counter with `value` and a fresh TTL.
    async fn put_with_ttl(&self, key: &str, value: u64, ttl: Duration) -> StoreResult<()>;

    /// Reset the TTL of an existing counter. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;
}
