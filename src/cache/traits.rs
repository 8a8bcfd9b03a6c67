use std::time::Duration;

use async_trait::async_trait;

use super::error::{CacheError, CacheResult};

/// Key-value store behind the exact cache and the metrics counters.
///
/// Implementations must be shareable across workers; failures are surfaced
/// as errors and the cache layer degrades to miss behavior rather than
/// failing the request.
#[async_trait]
pub trait KvCache: Send + Sync {
    /// Get raw bytes, `None` on miss or expiry.
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set raw bytes with a TTL (SETEX semantics).
    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Increment a counter, returning the new value. Counters never expire;
    /// they back fire-and-forget metrics.
    async fn incr(&self, key: &str) -> CacheResult<i64>;
}

/// JSON helpers layered over the byte interface.
pub trait KvCacheExt: KvCache {
    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.get_bytes(key).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| CacheError::Deserialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set_json<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set_bytes(key, &bytes, ttl).await
    }
}

impl<T: KvCache + ?Sized> KvCacheExt for T {}
