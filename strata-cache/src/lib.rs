//! Tiered typed cache with group-scoped invalidation.
//!
//! Layers, bottom up:
//!
//! - [`CacheBackend`] — a single byte-level KV tier (in-process, memcache,
//!   redis).
//! - [`TieredCache`] — ordered composition: read cascade with back-fill,
//!   write fan-out.
//! - [`CacheMonitor`] — per-group member sets and last-update stamps, so a
//!   write in one process invalidates the group for every reader sharing
//!   the central tier.
//! - [`TypedCache`] — typed entry points: fingerprinted keys, JSON
//!   envelopes, monitor integration, read-through loading.
//!
//! # Example
//!
//! ```ignore
//! let memory: Arc<dyn CacheBackend> =
//!     Arc::new(MemoryBackend::new(MemoryCacheConfig::default()));
//! let cache = TypedCache::new(memory, MonitorConfig::default());
//!
//! cache.set("accounts", "a-1", &account).await?;
//! let cached: Account = cache.get("accounts", "a-1").await?;
//! ```

pub mod backend;
pub mod key;
pub mod memory;
pub mod metrics;
pub mod monitor;
pub mod redis;
pub mod remote;
pub mod tiered;
pub mod typed;

pub use backend::CacheBackend;
pub use key::{cache_key, type_token};
pub use memory::MemoryBackend;
pub use metrics::{CacheCommand, CacheStatus, OpMetrics};
pub use monitor::{CacheMonitor, TransactionGuard, GROUP_PREFIX};
pub use redis::RedisBackend;
pub use remote::{MemcachedBackend, MemcachedClient};
pub use tiered::{CacheSource, TieredCache};
pub use typed::{Envelope, TypedCache};

pub use strata_core::{CacheError, MonitorConfig};
