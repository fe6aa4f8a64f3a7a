/// Failures surfaced by a [`CounterStore`](crate::CounterStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached (connection refused, pool exhausted, I/O).
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store did not answer within the per-operation bound.
    #[error("store operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    /// The key holds a value of a different kind (e.g. a list read as a counter).
    #[error("wrong value type at key {key}")]
    WrongType { key: String },
    /// The stored payload could not be decoded.
    #[error("corrupt value at key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    /// `true` when the store itself is unreachable or too slow, as opposed to
    /// a problem with one particular value.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }
}
