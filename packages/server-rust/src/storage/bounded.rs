//! Per-operation timeout decorator for any [`CounterStore`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fitsync_core::{CounterStore, StoreError};

/// Wraps a store so no single operation can take longer than `op_timeout`.
///
/// A slow or wedged store then surfaces as [`StoreError::Timeout`], which the
/// guards treat the same way as an unreachable store.
pub struct BoundedStore {
    inner: Arc<dyn CounterStore>,
    op_timeout: Duration,
}

impl BoundedStore {
    #[must_use]
    pub fn new(inner: Arc<dyn CounterStore>, op_timeout: Duration) -> Self {
        Self { inner, op_timeout }
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>> + Send,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_elapsed) => {
                #[allow(clippy::cast_possible_truncation)]
                let timeout_ms = self.op_timeout.as_millis() as u64;
                Err(StoreError::Timeout { timeout_ms })
            }
        }
    }
}

#[async_trait]
impl CounterStore for BoundedStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        self.bounded(self.inner.get(key)).await
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.bounded(self.inner.set_with_ttl(key, value, ttl)).await
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        self.bounded(self.inner.incr_with_ttl(key, ttl)).await
    }

    async fn list_append_bounded(
        &self,
        key: &str,
        value: Bytes,
        max_len: usize,
    ) -> Result<(), StoreError> {
        self.bounded(self.inner.list_append_bounded(key, value, max_len))
            .await
    }

    async fn list_range(&self, key: &str) -> Result<Vec<Bytes>, StoreError> {
        self.bounded(self.inner.list_range(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.bounded(self.inner.expire(key, ttl)).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.bounded(self.inner.ping()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::engines::MemoryCounterStore;

    /// Store whose reads never finish in time.
    struct StalledStore;

    #[async_trait]
    impl CounterStore for StalledStore {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>, StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
        async fn set_with_ttl(&self, _: &str, _: Bytes, _: Duration) -> Result<(), StoreError> {
            Ok(())
        }
        async fn incr_with_ttl(&self, _: &str, _: Duration) -> Result<i64, StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(1)
        }
        async fn list_append_bounded(&self, _: &str, _: Bytes, _: usize) -> Result<(), StoreError> {
            Ok(())
        }
        async fn list_range(&self, _: &str) -> Result<Vec<Bytes>, StoreError> {
            Ok(Vec::new())
        }
        async fn expire(&self, _: &str, _: Duration) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_operation_times_out() {
        let store = BoundedStore::new(Arc::new(StalledStore), Duration::from_millis(250));
        let err = store.get("k").await.unwrap_err();
        assert_eq!(err, StoreError::Timeout { timeout_ms: 250 });
        assert!(err.is_unavailable());

        let err = store
            .incr_with_ttl("k", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn fast_operations_pass_through() {
        let store = BoundedStore::new(
            Arc::new(MemoryCounterStore::new()),
            Duration::from_millis(250),
        );
        assert_eq!(store.incr_with_ttl("k", Duration::from_secs(1)).await.unwrap(), 1);
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from("1")));
        store.ping().await.unwrap();
    }
}
