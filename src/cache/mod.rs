mod error;
mod keys;
pub mod memory;
mod provenance;
mod redis;
mod response_cache;
mod semantic;
mod traits;
pub mod vector_store;

pub use error::{CacheError, CacheResult};
pub use keys::{CacheKeys, plan_signature};
pub use memory::MemoryKvCache;
pub use provenance::{
    CacheProvenance, ExactProvenance, SchedulerProvenance, SemanticProvenance,
};
pub use redis::RedisKvCache;
pub use response_cache::{ExactLookup, ResponseCache};
pub use semantic::{SemanticCache, SemanticLookup};
pub use traits::{KvCache, KvCacheExt};
