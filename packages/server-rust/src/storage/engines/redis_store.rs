//! Redis-backed [`CounterStore`] shared by every service instance.
//!
//! Connections come from a `deadpool-redis` pool built once at startup.
//! Multi-step operations run server-side as one unit: the windowed
//! increment is a Lua script, the bounded list append a `MULTI` pipeline
//! (`RPUSH` + `LTRIM`). List retention is refreshed by the caller via
//! [`CounterStore::expire`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use fitsync_core::{CounterStore, StoreError};
use redis::{AsyncCommands, ErrorKind, RedisError, Script};

/// `INCR` and, when the key was just created, `PEXPIRE` in the same atomic step.
const INCR_WITH_TTL_LUA: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

pub struct RedisCounterStore {
    pool: Pool,
    incr_script: Script,
}

impl RedisCounterStore {
    /// Builds the connection pool. No connection is opened until first use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the URL is malformed or the pool
    /// cannot be created.
    pub fn new(url: &str, pool_size: usize) -> Result<Self, StoreError> {
        let mut cfg = Config::from_url(url);
        cfg.pool = Some(PoolConfig::new(pool_size));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            pool,
            incr_script: Script::new(INCR_WITH_TTL_LUA),
        })
    }

    async fn conn(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

/// `WRONGTYPE` replies from the server and client-side decode mismatches both
/// mean the key holds another kind of value.
fn map_redis_err(key: &str, err: &RedisError) -> StoreError {
    if err.kind() == ErrorKind::TypeError || err.code() == Some("WRONGTYPE") {
        StoreError::WrongType {
            key: key.to_string(),
        }
    } else {
        StoreError::Unavailable(err.to_string())
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut conn = self.conn().await?;
        let raw: Option<Vec<u8>> = conn.get(key).await.map_err(|e| map_redis_err(key, &e))?;
        Ok(raw.map(Bytes::from))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let millis = u64::try_from(ttl_millis(ttl)).unwrap_or(u64::MAX);
        let (): () = conn
            .pset_ex(key, value.as_ref(), millis)
            .await
            .map_err(|e| map_redis_err(key, &e))?;
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut conn = self.conn().await?;
        let count: i64 = self
            .incr_script
            .key(key)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_err(key, &e))?;
        Ok(count)
    }

    async fn list_append_bounded(
        &self,
        key: &str,
        value: Bytes,
        max_len: usize,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        if max_len == 0 {
            // `LTRIM key -0 -1` would keep everything.
            let (): () = conn.del(key).await.map_err(|e| map_redis_err(key, &e))?;
            return Ok(());
        }
        let keep = isize::try_from(max_len).unwrap_or(isize::MAX);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .rpush(key, value.as_ref())
            .ignore()
            .ltrim(key, -keep, -1)
            .ignore();
        let (): () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err(key, &e))?;
        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<Bytes>, StoreError> {
        let mut conn = self.conn().await?;
        let raw: Vec<Vec<u8>> = conn
            .lrange(key, 0, -1)
            .await
            .map_err(|e| map_redis_err(key, &e))?;
        Ok(raw.into_iter().map(Bytes::from).collect())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let applied: bool = conn
            .pexpire(key, ttl_millis(ttl))
            .await
            .map_err(|e| map_redis_err(key, &e))?;
        Ok(applied)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
