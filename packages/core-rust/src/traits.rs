use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;

/// Capability set the pipeline needs from the shared counter/cache store.
///
/// The store is the single source of truth for cross-request state (rate
/// limit counters, cached responses, latency samples). Implementations must
/// be safe to call from many tasks at once and are shared as
/// `Arc<dyn CounterStore>`; callers never keep their own copy of the data
/// beyond one guard invocation.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Reads a value, `None` if the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Writes a value with a time-to-live in one atomic step.
    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration)
        -> Result<(), StoreError>;

    /// Atomically increments a counter and returns the new count.
    ///
    /// When the key is absent or expired the counter restarts at 1 and `ttl`
    /// is applied. Later increments inside the window leave the expiry alone.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Appends to a list (newest last) and trims it to the `max_len` most
    /// recent entries.
    async fn list_append_bounded(
        &self,
        key: &str,
        value: Bytes,
        max_len: usize,
    ) -> Result<(), StoreError>;

    /// Returns a list's entries oldest first. Missing keys read as empty.
    async fn list_range(&self, key: &str) -> Result<Vec<Bytes>, StoreError>;

    /// Resets a key's time-to-live. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Round-trips to the store to check reachability.
    async fn ping(&self) -> Result<(), StoreError>;
}
