//! Memcache-style remote tier.
//!
//! The concrete client library is an external collaborator: only its
//! interface matters here. The backend owns the enabled switch, the default
//! TTL, and the op metrics; the [`MemcachedClient`] implementation owns the
//! wire protocol.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use strata_core::{CacheError, MemcachedConfig};

use crate::backend::CacheBackend;
use crate::metrics::{CacheCommand, OpMetrics};

/// Minimal client contract for a memcached-compatible server pool.
///
/// `get` returns `Ok(None)` for a plain miss so the backend can map it to
/// the miss sentinel while transport failures stay errors.
#[async_trait]
pub trait MemcachedClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn ping(&self) -> Result<(), CacheError>;
}

/// Remote memcache-style tier.
///
/// Disabled instances short-circuit: reads miss, writes and deletes succeed
/// as no-ops. That lets a tiered cascade keep a memcached slot configured
/// while the pool is drained.
pub struct MemcachedBackend {
    client: Arc<dyn MemcachedClient>,
    default_ttl: Duration,
    enabled: bool,
    metrics: OpMetrics,
}

impl MemcachedBackend {
    pub fn new(client: Arc<dyn MemcachedClient>, config: MemcachedConfig) -> Self {
        Self {
            client,
            default_ttl: config.default_ttl,
            enabled: config.enabled,
            metrics: OpMetrics::new("memcache", config.instance),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl CacheBackend for MemcachedBackend {
    async fn get(&self, _group: &str, key: &str) -> Result<Vec<u8>, CacheError> {
        if !self.enabled {
            return Err(CacheError::Miss);
        }
        let started = Instant::now();
        let result = match self.client.get(key).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(CacheError::Miss),
            Err(err) => Err(err),
        };
        self.metrics.observe_read(started, &result);
        result
    }

    async fn set(&self, group: &str, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.set_with_ttl(self.default_ttl, group, key, value).await
    }

    async fn set_with_ttl(
        &self,
        ttl: Duration,
        _group: &str,
        key: &str,
        value: &[u8],
    ) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        let started = Instant::now();
        let result = self.client.set(key, value, ttl).await;
        self.metrics
            .observe_write(CacheCommand::Set, started, &result);
        result
    }

    async fn delete_key(&self, key: &str) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        let started = Instant::now();
        let result = self.client.delete(key).await;
        self.metrics
            .observe_write(CacheCommand::Delete, started, &result);
        result
    }

    async fn ping(&self) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        self.client.ping().await
    }

    async fn close(&self) {}

    fn name(&self) -> String {
        format!("MEMCACHE_{}", self.metrics.instance())
    }
}
