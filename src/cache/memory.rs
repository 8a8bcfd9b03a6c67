use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{error::CacheResult, traits::KvCache};

const DEFAULT_MAX_ENTRIES: usize = 100_000;
const EVICTION_BATCH_SIZE: usize = 100;

struct CacheEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
    last_accessed: Instant,
}

impl CacheEntry {
    fn new(data: Vec<u8>, expires_at: Option<Instant>) -> Self {
        Self {
            data,
            expires_at,
            last_accessed: Instant::now(),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

/// In-memory key-value cache backed by `DashMap`.
///
/// Single-node only: each process keeps its own entries and counters, so
/// hit rates and metrics are per-node. Deployments that need shared state
/// use the Redis implementation.
pub struct MemoryKvCache {
    data: Arc<DashMap<String, CacheEntry>>,
    counters: Arc<DashMap<String, Arc<AtomicI64>>>,
    max_entries: usize,
}

impl MemoryKvCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            counters: Arc::new(DashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    fn evict_if_needed(&self) {
        if self.data.len() < self.max_entries {
            return;
        }

        // First pass: remove all expired entries.
        self.data.retain(|_, entry| !entry.is_expired());

        let current_len = self.data.len();
        if current_len < self.max_entries {
            return;
        }

        // Still at capacity: evict the least recently used batch.
        let target_size = self.max_entries.saturating_sub(EVICTION_BATCH_SIZE);
        let to_evict = current_len.saturating_sub(target_size);

        let mut entries: Vec<_> = self
            .data
            .iter()
            .map(|entry| (entry.key().clone(), entry.last_accessed))
            .collect();
        entries.sort_by_key(|(_, last_accessed)| *last_accessed);

        for (key, _) in entries.into_iter().take(to_evict) {
            self.data.remove(&key);
        }
    }
}

impl Default for MemoryKvCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvCache for MemoryKvCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        if let Some(mut entry) = self.data.get_mut(key) {
            if entry.is_expired() {
                drop(entry);
                self.data.remove(key);
                return Ok(None);
            }
            entry.touch();
            Ok(Some(entry.data.clone()))
        } else {
            Ok(None)
        }
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.evict_if_needed();

        let expires_at = if !ttl.is_zero() {
            Some(Instant::now() + ttl)
        } else {
            None
        };

        self.data
            .insert(key.to_string(), CacheEntry::new(value.to_vec(), expires_at));
        Ok(())
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        let counter = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AtomicI64::new(0)))
            .clone();
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}
