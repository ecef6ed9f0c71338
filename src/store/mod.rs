//! Counter storage shared by every stateful check.
//!
//! The rate limiter, the security monitor and the failed-login guard keep
//! no state of their own; they read and write TTL counters through the
//! [`CounterStore`] trait, which is injected at construction.

mod backend;
mod memory;
mod timeout;

pub use backend::{Admission, CounterStore, CounterValue, StoreResult};
pub use memory::MemoryCounterStore;
pub use timeout::TimeoutStore;

#[cfg(test)]
pub(crate) mod testing;
