use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{error::CacheResult, traits::KvCache};

/// Redis-backed key-value cache for the exact tier and metrics counters.
pub struct RedisKvCache {
    client: redis::Client,
}

impl RedisKvCache {
    pub fn from_url(url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> CacheResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl KvCache for RedisKvCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        // SETEX rejects a zero expiry; clamp to one second.
        let secs = ttl.as_secs().max(1);
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(secs)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        let mut conn = self.connection().await?;
        let value: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }
}
