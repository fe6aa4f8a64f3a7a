//! Builds the process-wide store handle from configuration.

use std::sync::Arc;

use fitsync_core::CounterStore;
use tracing::{info, warn};

use crate::service::config::StoreConfig;
use crate::storage::bounded::BoundedStore;
use crate::storage::engines::{MemoryCounterStore, RedisCounterStore};

/// Creates the configured backend wrapped in a [`BoundedStore`].
///
/// With a Redis URL the pool is created and pinged once through the wrapper,
/// so the ping gives up after `op_timeout`. A failed ping is logged but not
/// fatal, since every guard already degrades when the store is unreachable.
/// Without a URL the in-memory backend is used.
///
/// # Errors
///
/// Returns an error if the Redis URL is malformed or the pool cannot be built.
pub async fn connect(config: &StoreConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    let Some(url) = config.redis_url.as_deref() else {
        info!("no redis url configured, using in-memory store (single instance only)");
        return Ok(Arc::new(BoundedStore::new(
            Arc::new(MemoryCounterStore::new()),
            config.op_timeout,
        )));
    };

    let redis = RedisCounterStore::new(url, config.pool_size)
        .map_err(|e| anyhow::anyhow!("failed to create redis pool: {e}"))?;
    let store = Arc::new(BoundedStore::new(Arc::new(redis), config.op_timeout));
    if startup_ping(store.as_ref()).await {
        info!(pool_size = config.pool_size, "connected to redis store");
    }
    Ok(store)
}

async fn startup_ping(store: &dyn CounterStore) -> bool {
    match store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "redis store not reachable at startup");
            false
        }
    }
}
