//! Store doubles shared by unit tests.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fitsync_core::{CounterStore, StoreError};

/// Store whose every operation fails as unreachable.
pub(crate) struct DownStore;

fn down<T>() -> Result<T, StoreError> {
    Err(StoreError::Unavailable("connection refused".into()))
}

#[async_trait]
impl CounterStore for DownStore {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>, StoreError> {
        down()
    }

    async fn set_with_ttl(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<(), StoreError> {
        down()
    }

    async fn incr_with_ttl(&self, _key: &str, _ttl: Duration) -> Result<i64, StoreError> {
        down()
    }

    async fn list_append_bounded(
        &self,
        _key: &str,
        _value: Bytes,
        _max_len: usize,
    ) -> Result<(), StoreError> {
        down()
    }

    async fn list_range(&self, _key: &str) -> Result<Vec<Bytes>, StoreError> {
        down()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
        down()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        down()
    }
}

/// Store whose every operation hangs forever.
pub(crate) struct HungStore;

#[async_trait]
impl CounterStore for HungStore {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>, StoreError> {
        std::future::pending().await
    }

    async fn set_with_ttl(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn incr_with_ttl(&self, _key: &str, _ttl: Duration) -> Result<i64, StoreError> {
        std::future::pending().await
    }

    async fn list_append_bounded(
        &self,
        _key: &str,
        _value: Bytes,
        _max_len: usize,
    ) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn list_range(&self, _key: &str) -> Result<Vec<Bytes>, StoreError> {
        std::future::pending().await
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
        std::future::pending().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        std::future::pending().await
    }
}
