//! Cache backend contract.
//!
//! A backend is a single KV tier speaking bytes. Implementations must keep
//! absence (`CacheError::Miss`) distinct from transport failure so the
//! layers above can treat the two differently: a miss falls through to a
//! loader, a transport failure is logged and then treated as a miss.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use strata_core::CacheError;

/// A single cache tier with a byte-level KV contract.
///
/// # Groups
///
/// The `group` parameter is advisory for leaf tiers (the key already encodes
/// it) but is threaded through so composites can make group-aware decisions
/// and so op logs stay attributable.
///
/// # TTL
///
/// `set` applies the backend's configured default TTL; `set_with_ttl` pins
/// an explicit one. No entry-ordering guarantees are made.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch raw stored bytes. `Err(CacheError::Miss)` when absent or
    /// expired; any other error is a transport problem.
    async fn get(&self, group: &str, key: &str) -> Result<Vec<u8>, CacheError>;

    /// Store bytes under the backend's default TTL.
    async fn set(&self, group: &str, key: &str, value: &[u8]) -> Result<(), CacheError>;

    /// Store bytes with an explicit TTL.
    async fn set_with_ttl(
        &self,
        ttl: Duration,
        group: &str,
        key: &str,
        value: &[u8],
    ) -> Result<(), CacheError>;

    /// Best-effort, idempotent delete.
    async fn delete_key(&self, key: &str) -> Result<(), CacheError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), CacheError>;

    /// Release held resources. Safe to call more than once.
    async fn close(&self);

    /// Display name, `<KIND>_<instance>`.
    fn name(&self) -> String;

    /// Constituent tiers for composite backends; empty for leaves. Keys are
    /// the tier's position in the cascade.
    fn parent_backends(&self) -> HashMap<String, Arc<dyn CacheBackend>> {
        HashMap::new()
    }
}
